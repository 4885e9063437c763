//! Controllers that combine store operations with the scheduling service,
//! the cells and the event hub.
//!
//! Store operations return the records before and after a transition; the
//! controllers turn those into events and start requests. A failure to
//! reach the scheduling service is logged and never undoes a committed
//! transition: the next convergence pass picks the slot up again.

use std::{collections::BTreeMap, sync::Arc};

use tracing::{error, info, warn};

use crate::{
    cells::CellPresenceSource,
    clients::{AuctioneerClient, CellClientFactory},
    data_model::{ActualLrp, ActualLrpKey, DesiredLrpSchedulingInfo, Event, LrpStartRequest},
    events::EventEmitter,
    state_store::StateStore,
};

pub mod desired_lrp;
pub mod evacuation;
pub mod lrp_convergence;
pub mod lrp_lifecycle;
pub mod retirer;
pub mod task_convergence;
pub mod tasks;

pub use desired_lrp::DesiredLrpController;
pub use evacuation::EvacuationController;
pub use lrp_convergence::LrpConvergenceController;
pub use lrp_lifecycle::LrpLifecycleController;
pub use retirer::ActualLrpRetirer;
pub use task_convergence::TaskConvergenceController;
pub use tasks::TaskController;

/// What every controller talks to.
#[derive(Clone)]
pub struct ControllerContext {
    pub store: Arc<StateStore>,
    pub cells: Arc<dyn CellPresenceSource>,
    pub auctioneer: Arc<dyn AuctioneerClient>,
    pub cell_clients: Arc<dyn CellClientFactory>,
    pub emitter: Arc<dyn EventEmitter>,
}

impl ControllerContext {
    pub(crate) fn emit(&self, event: Event) {
        self.emitter.emit(event);
    }

    /// Emits a change event unless the transition was a no-op.
    pub(crate) fn emit_actual_lrp_change(&self, before: ActualLrp, after: ActualLrp, evacuating: bool) {
        if before != after {
            self.emit(Event::ActualLrpChanged {
                before,
                after,
                evacuating,
            });
        }
    }

    /// Asks for one slot to be placed, looking up its desired LRP first.
    pub(crate) async fn request_start(&self, key: &ActualLrpKey) {
        let scheduling_info = match self.store.desired_lrp_scheduling_info(&key.process_guid).await {
            Ok(record) => record.value,
            Err(err) => {
                warn!(
                    process_guid = key.process_guid,
                    index = key.index,
                    "not requesting start, desired lrp unavailable: {}",
                    err
                );
                return;
            }
        };
        let mut starts = StartRequests::default();
        starts.add(&scheduling_info, key.index);
        self.dispatch_starts(starts).await;
    }

    /// Sends the coalesced start requests. Failures are logged only.
    pub(crate) async fn dispatch_starts(&self, starts: StartRequests) {
        if starts.is_empty() {
            return;
        }
        let requests = starts.into_requests();
        let indices: usize = requests.iter().map(|r| r.indices.len()).sum();
        match self.auctioneer.request_lrp_starts(requests).await {
            Ok(()) => info!(indices, "requested lrp starts"),
            Err(err) => error!(indices, "failed to request lrp starts: {:?}", err),
        }
    }
}

/// Start requests coalesced per desired LRP.
#[derive(Debug, Default)]
pub struct StartRequests(BTreeMap<String, LrpStartRequest>);

impl StartRequests {
    pub fn add(&mut self, scheduling_info: &DesiredLrpSchedulingInfo, index: u32) {
        self.0
            .entry(scheduling_info.key.process_guid.clone())
            .or_insert_with(|| LrpStartRequest::new(scheduling_info, Vec::new()))
            .add_index(index);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// One request per desired LRP, ordered by process guid, with sorted
    /// indices.
    pub fn into_requests(self) -> Vec<LrpStartRequest> {
        self.0
            .into_values()
            .map(|mut request| {
                request.indices.sort_unstable();
                request
            })
            .collect()
    }
}

impl<'a> Extend<(&'a DesiredLrpSchedulingInfo, u32)> for StartRequests {
    fn extend<T: IntoIterator<Item = (&'a DesiredLrpSchedulingInfo, u32)>>(&mut self, iter: T) {
        for (scheduling_info, index) in iter {
            self.add(scheduling_info, index);
        }
    }
}
