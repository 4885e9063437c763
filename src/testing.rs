//! In-process fakes for the outbound collaborators, and a harness that
//! wires every controller against them and an in-memory store.

use std::{
    sync::{Arc, Mutex, RwLock},
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bbs_utils::clock::FakeClock;
use bytes::Bytes;
use tokio::sync::Barrier;

use crate::{
    cells::CellPresenceSource,
    clients::{AuctioneerClient, CellClient, CellClientFactory},
    data_model::{
        test_objects::tests::{mock_cell, mock_instance_key, mock_net_info, TEST_DOMAIN},
        ActualLrpInstanceKey,
        ActualLrpKey,
        CellPresence,
        CellSet,
        Event,
        LrpStartRequest,
        Task,
    },
    events::EventEmitter,
    processor::{
        lrp_convergence::DEFAULT_STALE_UNCLAIMED,
        retirer::DEFAULT_RETIRE_MAX_ATTEMPTS,
        ActualLrpRetirer,
        ControllerContext,
        DesiredLrpController,
        EvacuationController,
        LrpConvergenceController,
        LrpLifecycleController,
        TaskController,
        TaskConvergenceController,
    },
    state_store::{
        convergence::TaskConvergencePolicy,
        driver::{self, memory::InMemoryDriver, Entry, Version, VersionedStore},
        Error,
        StateStore,
        StateStoreOptions,
    },
};

/// A fixed set of live cells that tests can replace.
pub struct StaticCellPresence {
    cells: RwLock<CellSet>,
}

impl StaticCellPresence {
    pub fn new(cells: impl IntoIterator<Item = CellPresence>) -> Self {
        Self {
            cells: RwLock::new(cells.into_iter().collect()),
        }
    }

    pub fn set(&self, cells: impl IntoIterator<Item = CellPresence>) {
        *self.cells.write().unwrap() = cells.into_iter().collect();
    }
}

#[async_trait]
impl CellPresenceSource for StaticCellPresence {
    async fn cells(&self) -> Result<CellSet, Error> {
        Ok(self.cells.read().unwrap().clone())
    }

    async fn cell_by_id(&self, cell_id: &str) -> Result<CellPresence, Error> {
        self.cells
            .read()
            .unwrap()
            .get(cell_id)
            .cloned()
            .ok_or_else(|| Error::ResourceNotFound {
                key: cell_id.to_string(),
            })
    }
}

/// Records every batch it is handed, failing them when told to.
#[derive(Default)]
pub struct FakeAuctioneerClient {
    lrp_starts: Mutex<Vec<Vec<LrpStartRequest>>>,
    task_auctions: Mutex<Vec<Vec<Task>>>,
    failing: Mutex<bool>,
}

impl FakeAuctioneerClient {
    pub fn lrp_starts(&self) -> Vec<Vec<LrpStartRequest>> {
        self.lrp_starts.lock().unwrap().clone()
    }

    pub fn task_auctions(&self) -> Vec<Vec<Task>> {
        self.task_auctions.lock().unwrap().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    fn outcome(&self) -> Result<()> {
        if *self.failing.lock().unwrap() {
            return Err(anyhow!("auctioneer unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl AuctioneerClient for FakeAuctioneerClient {
    async fn request_lrp_starts(&self, starts: Vec<LrpStartRequest>) -> Result<()> {
        self.lrp_starts.lock().unwrap().push(starts);
        self.outcome()
    }

    async fn request_task_auctions(&self, tasks: Vec<Task>) -> Result<()> {
        self.task_auctions.lock().unwrap().push(tasks);
        self.outcome()
    }
}

#[derive(Default)]
struct CellCalls {
    stops: Vec<(ActualLrpKey, ActualLrpInstanceKey)>,
    stop_attempts: u32,
    cancels: Vec<String>,
    fail_next: u32,
}

impl CellCalls {
    fn take_failure(&mut self) -> bool {
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return true;
        }
        false
    }
}

/// Hands out clients that share one call log.
#[derive(Default)]
pub struct FakeCellClientFactory {
    calls: Arc<Mutex<CellCalls>>,
}

impl FakeCellClientFactory {
    pub fn stops(&self) -> Vec<(ActualLrpKey, ActualLrpInstanceKey)> {
        self.calls.lock().unwrap().stops.clone()
    }

    pub fn stop_attempts(&self) -> u32 {
        self.calls.lock().unwrap().stop_attempts
    }

    pub fn cancels(&self) -> Vec<String> {
        self.calls.lock().unwrap().cancels.clone()
    }

    /// Fails the next `n` calls made through any client.
    pub fn fail_next(&self, n: u32) {
        self.calls.lock().unwrap().fail_next = n;
    }
}

impl CellClientFactory for FakeCellClientFactory {
    fn create_client(&self, _rep_address: &str) -> Result<Arc<dyn CellClient>> {
        Ok(Arc::new(FakeCellClient {
            calls: self.calls.clone(),
        }))
    }
}

struct FakeCellClient {
    calls: Arc<Mutex<CellCalls>>,
}

#[async_trait]
impl CellClient for FakeCellClient {
    async fn stop_lrp_instance(&self, key: &ActualLrpKey, instance_key: &ActualLrpInstanceKey) -> Result<()> {
        let mut calls = self.calls.lock().unwrap();
        calls.stop_attempts += 1;
        if calls.take_failure() {
            return Err(anyhow!("cell unreachable"));
        }
        calls.stops.push((key.clone(), instance_key.clone()));
        Ok(())
    }

    async fn cancel_task(&self, task_guid: &str) -> Result<()> {
        let mut calls = self.calls.lock().unwrap();
        if calls.take_failure() {
            return Err(anyhow!("cell unreachable"));
        }
        calls.cancels.push(task_guid.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingEmitter {
    events: Mutex<Vec<Event>>,
}

impl RecordingEmitter {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn event_types(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.event_type().to_string())
            .collect()
    }
}

impl EventEmitter for RecordingEmitter {
    fn emit(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

/// In-memory driver whose reads of one key hold until `parties` readers
/// have arrived, so concurrent writers all observe the same version.
pub struct GatedDriver {
    inner: InMemoryDriver,
    key: String,
    barrier: Barrier,
    remaining: Mutex<usize>,
}

impl GatedDriver {
    pub fn new(clock: FakeClock, key: impl Into<String>, parties: usize) -> Self {
        Self {
            inner: InMemoryDriver::new(Arc::new(clock)),
            key: key.into(),
            barrier: Barrier::new(parties),
            remaining: Mutex::new(parties),
        }
    }

    fn take_gate(&self, key: &str) -> bool {
        if key != self.key {
            return false;
        }
        let mut remaining = self.remaining.lock().unwrap();
        if *remaining == 0 {
            return false;
        }
        *remaining -= 1;
        true
    }
}

#[async_trait]
impl VersionedStore for GatedDriver {
    async fn get(&self, key: &str) -> Result<Entry, driver::Error> {
        let entry = self.inner.get(key).await;
        if self.take_gate(key) {
            self.barrier.wait().await;
        }
        entry
    }

    async fn get_tree(&self, prefix: &str) -> Result<Vec<Entry>, driver::Error> {
        self.inner.get_tree(prefix).await
    }

    async fn create(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<Version, driver::Error> {
        self.inner.create(key, value, ttl).await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
        expected: Version,
    ) -> Result<Version, driver::Error> {
        self.inner.compare_and_swap(key, value, ttl, expected).await
    }

    async fn compare_and_delete(&self, key: &str, expected: Version) -> Result<(), driver::Error> {
        self.inner.compare_and_delete(key, expected).await
    }

    async fn delete(&self, key: &str, recursive: bool) -> Result<(), driver::Error> {
        self.inner.delete(key, recursive).await
    }
}

/// Every controller wired against fakes. Cell `c1` is alive.
pub struct TestHarness {
    pub clock: FakeClock,
    pub store: Arc<StateStore>,
    pub cells: Arc<StaticCellPresence>,
    pub auctioneer: Arc<FakeAuctioneerClient>,
    pub cell_clients: Arc<FakeCellClientFactory>,
    pub emitter: Arc<RecordingEmitter>,
    pub retirer: Arc<ActualLrpRetirer>,
    pub lifecycle: LrpLifecycleController,
    pub evacuation: EvacuationController,
    pub desired_lrps: DesiredLrpController,
    pub tasks: TaskController,
    pub lrp_convergence: LrpConvergenceController,
    pub task_convergence: TaskConvergenceController,
}

impl TestHarness {
    pub fn new() -> Self {
        let clock = FakeClock::default();
        let store = Arc::new(StateStore::in_memory(
            Arc::new(clock.clone()),
            StateStoreOptions::default(),
        ));
        let cells = Arc::new(StaticCellPresence::new([mock_cell("c1")]));
        let auctioneer = Arc::new(FakeAuctioneerClient::default());
        let cell_clients = Arc::new(FakeCellClientFactory::default());
        let emitter = Arc::new(RecordingEmitter::default());

        let ctx = ControllerContext {
            store: store.clone(),
            cells: cells.clone(),
            auctioneer: auctioneer.clone(),
            cell_clients: cell_clients.clone(),
            emitter: emitter.clone(),
        };
        let retirer = Arc::new(ActualLrpRetirer::new(ctx.clone(), DEFAULT_RETIRE_MAX_ATTEMPTS));

        Self {
            lifecycle: LrpLifecycleController::new(ctx.clone(), retirer.clone()),
            evacuation: EvacuationController::new(ctx.clone()),
            desired_lrps: DesiredLrpController::new(ctx.clone(), retirer.clone()),
            tasks: TaskController::new(ctx.clone()),
            lrp_convergence: LrpConvergenceController::new(
                ctx.clone(),
                retirer.clone(),
                DEFAULT_STALE_UNCLAIMED,
            ),
            task_convergence: TaskConvergenceController::new(ctx.clone(), TaskConvergencePolicy::default()),
            clock,
            store,
            cells,
            auctioneer,
            cell_clients,
            emitter,
            retirer,
        }
    }

    /// Writes a Running record on `cell_id` straight into the store.
    pub async fn running_actual_lrp(&self, process_guid: &str, index: u32, cell_id: &str) -> ActualLrpKey {
        let key = ActualLrpKey::new(process_guid, index, TEST_DOMAIN);
        let instance_key = mock_instance_key(&format!("ig-{process_guid}-{index}"), cell_id);
        self.store
            .start_actual_lrp(&key, &instance_key, &mock_net_info())
            .await
            .unwrap();
        key
    }
}
