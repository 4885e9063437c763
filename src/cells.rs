use std::{cmp::Ordering, collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use priority_queue::PriorityQueue;
use tokio::{
    sync::{watch, Notify, RwLock},
    time::Instant,
};
use tracing::{info, trace, warn};

use crate::{
    data_model::{CellPresence, CellSet},
    state_store::Error,
};

pub const DEFAULT_CELL_PRESENCE_TTL: Duration = Duration::from_secs(30);

/// Where convergence and retirement learn which cells are alive.
#[async_trait]
pub trait CellPresenceSource: Send + Sync {
    async fn cells(&self) -> Result<CellSet, Error>;

    /// Fails with `Error::ResourceNotFound` when the cell is not alive.
    async fn cell_by_id(&self, cell_id: &str) -> Result<CellPresence, Error>;
}

/// Wrapper for `tokio::time::Instant` that reverses the ordering for deadline.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
struct ReverseInstant(Instant);

impl Ord for ReverseInstant {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.cmp(&self.0)
    }
}

impl PartialOrd for ReverseInstant {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

enum WaitResult {
    Deadline,
    Notified,
    Shutdown,
}

/// In-process presence for cells that heartbeat directly to this server.
///
/// A cell stays present until its deadline lapses without a heartbeat.
pub struct CellRegistry {
    ttl: Duration,
    deadlines: RwLock<PriorityQueue<String, ReverseInstant>>,
    cells: RwLock<HashMap<String, CellPresence>>,
    notify: Notify,
}

impl CellRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            deadlines: RwLock::new(PriorityQueue::new()),
            cells: RwLock::new(HashMap::new()),
            notify: Notify::new(),
        }
    }

    /// Registers the cell or refreshes its presence and deadline.
    pub async fn heartbeat(&self, cell: CellPresence) {
        let deadline = ReverseInstant(Instant::now() + self.ttl);
        trace!(cell_id = cell.cell_id, "cell heartbeat received");

        let first_cell = {
            let mut deadlines = self.deadlines.write().await;
            let was_empty = deadlines.is_empty();
            if deadlines.change_priority(&cell.cell_id, deadline).is_none() {
                info!(cell_id = cell.cell_id, rep_address = cell.rep_address, "cell registered");
                deadlines.push(cell.cell_id.clone(), deadline);
            }
            was_empty
        };
        self.cells.write().await.insert(cell.cell_id.clone(), cell);

        if first_cell {
            self.notify.notify_one();
        }
    }

    pub async fn deregister(&self, cell_id: &str) -> Option<CellPresence> {
        self.deadlines.write().await.remove(cell_id);
        self.cells.write().await.remove(cell_id)
    }

    /// Drops every cell whose deadline has passed and returns their ids.
    pub async fn remove_lapsed(&self) -> Vec<String> {
        let now = Instant::now();
        let mut lapsed = Vec::new();
        {
            let mut deadlines = self.deadlines.write().await;
            while let Some((_, deadline)) = deadlines.peek() {
                if deadline.0 > now {
                    break;
                }
                match deadlines.pop() {
                    Some((cell_id, _)) => lapsed.push(cell_id),
                    None => break,
                }
            }
        }

        if !lapsed.is_empty() {
            let mut cells = self.cells.write().await;
            for cell_id in &lapsed {
                cells.remove(cell_id);
                warn!(cell_id, "cell presence lapsed");
            }
        }
        lapsed
    }

    async fn wait_for_event(&self, shutdown_rx: &mut watch::Receiver<()>) -> WaitResult {
        let next_deadline = {
            let deadlines = self.deadlines.read().await;
            deadlines.peek().map(|(_, deadline)| deadline.0)
        };

        match next_deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => WaitResult::Deadline,
                    _ = self.notify.notified() => WaitResult::Notified,
                    _ = shutdown_rx.changed() => WaitResult::Shutdown,
                }
            }
            None => {
                tokio::select! {
                    _ = self.notify.notified() => WaitResult::Notified,
                    _ = shutdown_rx.changed() => WaitResult::Shutdown,
                }
            }
        }
    }

    /// Drops lapsed cells as their deadlines pass, until shutdown.
    pub async fn start_monitor(self: Arc<Self>, mut shutdown_rx: watch::Receiver<()>) {
        loop {
            match self.wait_for_event(&mut shutdown_rx).await {
                WaitResult::Deadline => {
                    self.remove_lapsed().await;
                }
                WaitResult::Notified => continue,
                WaitResult::Shutdown => {
                    trace!("cell monitor received shutdown signal");
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl CellPresenceSource for CellRegistry {
    async fn cells(&self) -> Result<CellSet, Error> {
        Ok(self.cells.read().await.values().cloned().collect())
    }

    async fn cell_by_id(&self, cell_id: &str) -> Result<CellPresence, Error> {
        self.cells
            .read()
            .await
            .get(cell_id)
            .cloned()
            .ok_or_else(|| Error::ResourceNotFound {
                key: cell_id.to_string(),
            })
    }
}
