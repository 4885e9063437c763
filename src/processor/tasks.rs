use tracing::{error, info, warn};

use super::ControllerContext;
use crate::{
    data_model::{Event, Task, TaskState},
    state_store::Error,
};

pub struct TaskController {
    ctx: ControllerContext,
}

impl TaskController {
    pub fn new(ctx: ControllerContext) -> Self {
        Self { ctx }
    }

    fn emit_task_change(&self, before: Task, after: Task) {
        if before != after {
            self.ctx.emit(Event::TaskChanged { before, after });
        }
    }

    /// Persists the task and submits it for auction.
    pub async fn desire_task(&self, task: &Task) -> Result<Task, Error> {
        let task = self.ctx.store.desire_task(task).await?;
        self.ctx.emit(Event::TaskCreated { task: task.clone() });
        if let Err(err) = self.ctx.auctioneer.request_task_auctions(vec![task.clone()]).await {
            error!(task_guid = task.task_guid, "failed to request task auction: {:?}", err);
        }
        Ok(task)
    }

    pub async fn start_task(&self, task_guid: &str, cell_id: &str) -> Result<(), Error> {
        let (before, after) = self.ctx.store.start_task(task_guid, cell_id).await?;
        self.emit_task_change(before, after);
        Ok(())
    }

    /// Cancels the task. A task that was already running is also cancelled
    /// on its cell, on a best-effort basis.
    pub async fn cancel_task(&self, task_guid: &str) -> Result<(), Error> {
        let (before, after) = self.ctx.store.cancel_task(task_guid).await?;
        let running_on = (before.state == TaskState::Running).then(|| before.cell_id.clone());
        self.emit_task_change(before, after);

        let Some(cell_id) = running_on else {
            return Ok(());
        };
        let cell = match self.ctx.cells.cell_by_id(&cell_id).await {
            Ok(cell) => cell,
            Err(err) => {
                warn!(task_guid, cell_id, "not cancelling task on cell: {}", err);
                return Ok(());
            }
        };
        let cancelled = match self.ctx.cell_clients.create_client(&cell.rep_address) {
            Ok(client) => client.cancel_task(task_guid).await,
            Err(err) => Err(err),
        };
        match cancelled {
            Ok(()) => info!(task_guid, cell_id, "cancelled task on cell"),
            Err(err) => error!(task_guid, cell_id, "failed to cancel task on cell: {:?}", err),
        }
        Ok(())
    }

    pub async fn fail_task(&self, task_guid: &str, failure_reason: &str) -> Result<(), Error> {
        let (before, after) = self.ctx.store.fail_task(task_guid, failure_reason).await?;
        self.emit_task_change(before, after);
        Ok(())
    }

    pub async fn complete_task(
        &self,
        task_guid: &str,
        cell_id: &str,
        failed: bool,
        failure_reason: &str,
        result: &str,
    ) -> Result<(), Error> {
        let (before, after) = self
            .ctx
            .store
            .complete_task(task_guid, cell_id, failed, failure_reason, result)
            .await?;
        self.emit_task_change(before, after);
        Ok(())
    }

    pub async fn resolving_task(&self, task_guid: &str) -> Result<(), Error> {
        let (before, after) = self.ctx.store.resolving_task(task_guid).await?;
        self.emit_task_change(before, after);
        Ok(())
    }

    pub async fn delete_task(&self, task_guid: &str) -> Result<(), Error> {
        let task = self.ctx.store.delete_task(task_guid).await?;
        self.ctx.emit(Event::TaskRemoved { task });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{data_model::test_objects::tests::mock_task, testing::TestHarness};

    #[tokio::test]
    async fn test_desire_requests_auction() {
        let h = TestHarness::new();
        h.tasks.desire_task(&mock_task("t")).await.unwrap();
        let auctions = h.auctioneer.task_auctions();
        assert_eq!(auctions.len(), 1);
        assert_eq!(auctions[0][0].task_guid, "t");
        assert_eq!(h.emitter.event_types(), vec!["task_created"]);
    }

    #[tokio::test]
    async fn test_desire_survives_auction_failure() {
        let h = TestHarness::new();
        h.auctioneer.set_failing(true);
        let task = h.tasks.desire_task(&mock_task("t")).await.unwrap();
        assert_eq!(task.state, TaskState::Pending);
        assert!(h.store.task_by_guid("t").await.is_ok());
    }

    #[tokio::test]
    async fn test_cancel_running_task_notifies_cell() {
        let h = TestHarness::new();
        h.tasks.desire_task(&mock_task("t")).await.unwrap();
        h.tasks.start_task("t", "c1").await.unwrap();

        h.tasks.cancel_task("t").await.unwrap();
        assert_eq!(h.cell_clients.cancels(), vec!["t".to_string()]);
        let task = h.store.task_by_guid("t").await.unwrap();
        assert_eq!(task.state, TaskState::Completed);
        assert!(task.failed);
    }

    #[tokio::test]
    async fn test_cancel_pending_task_skips_cell() {
        let h = TestHarness::new();
        h.tasks.desire_task(&mock_task("t")).await.unwrap();
        h.tasks.cancel_task("t").await.unwrap();
        assert!(h.cell_clients.cancels().is_empty());
    }

    #[tokio::test]
    async fn test_full_lifecycle_events() {
        let h = TestHarness::new();
        h.tasks.desire_task(&mock_task("t")).await.unwrap();
        h.tasks.start_task("t", "c1").await.unwrap();
        h.tasks.start_task("t", "c1").await.unwrap();
        h.tasks.complete_task("t", "c1", false, "", "ok").await.unwrap();
        h.tasks.resolving_task("t").await.unwrap();
        h.tasks.delete_task("t").await.unwrap();

        assert_eq!(
            h.emitter.event_types(),
            vec![
                "task_created",
                "task_changed",
                "task_changed",
                "task_changed",
                "task_removed"
            ]
        );
    }

    #[tokio::test]
    async fn test_fail_task() {
        let h = TestHarness::new();
        h.tasks.desire_task(&mock_task("t")).await.unwrap();
        h.tasks.fail_task("t", "no cells").await.unwrap();
        let task = h.store.task_by_guid("t").await.unwrap();
        assert_eq!(task.failure_reason, "no cells");
        assert!(h.tasks.fail_task("t", "again").await.is_err());
    }
}
