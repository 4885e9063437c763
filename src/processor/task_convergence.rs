use tracing::{error, info, info_span, warn, Instrument};

use super::ControllerContext;
use crate::{
    data_model::{Event, Task},
    state_store::{
        convergence::{calculate_task_convergence, TaskChanges, TaskConvergencePolicy},
        Error,
    },
};

/// Periodic task cleanup: re-auctions pending tasks that were never
/// picked up, fails tasks stranded on vanished cells and expires finished
/// tasks nobody resolved.
pub struct TaskConvergenceController {
    ctx: ControllerContext,
    policy: TaskConvergencePolicy,
}

impl TaskConvergenceController {
    pub fn new(ctx: ControllerContext, policy: TaskConvergencePolicy) -> Self {
        Self { ctx, policy }
    }

    pub async fn converge_tasks(&self) -> Result<TaskChanges, Error> {
        async {
            let store = &self.ctx.store;
            let tasks = store.gather_tasks().await?;
            let cells = self.ctx.cells.cells().await?;
            let changes = calculate_task_convergence(&tasks, &cells, store.now(), &self.policy);
            info!(
                to_auction = changes.to_auction.len(),
                to_fail = changes.to_fail.len(),
                to_demote = changes.to_demote.len(),
                to_expire = changes.to_expire.len(),
                "calculated task convergence"
            );

            self.fail_tasks(&changes.to_fail).await;
            self.demote_tasks(&changes.to_demote).await;
            self.expire_tasks(&changes.to_expire).await;
            if !changes.to_auction.is_empty() {
                let count = changes.to_auction.len();
                if let Err(err) = self
                    .ctx
                    .auctioneer
                    .request_task_auctions(changes.to_auction.clone())
                    .await
                {
                    error!(count, "failed to request task auctions: {:?}", err);
                }
            }
            Ok::<_, Error>(changes)
        }
        .instrument(info_span!("task_convergence"))
        .await
    }

    async fn fail_tasks(&self, to_fail: &[(Task, &'static str)]) {
        let store = &self.ctx.store;
        let works = to_fail.iter().map(|(task, reason)| {
            move || async move {
                match store.fail_task(&task.task_guid, reason).await {
                    Ok((before, after)) => self.ctx.emit(Event::TaskChanged { before, after }),
                    Err(err) => warn!(task_guid = task.task_guid, "failed to fail task: {}", err),
                }
            }
        });
        store.throttler().run(works).await;
    }

    async fn demote_tasks(&self, to_demote: &[Task]) {
        let store = &self.ctx.store;
        let works = to_demote.iter().map(|task| {
            move || async move {
                match store.demote_resolving_task(&task.task_guid).await {
                    Ok((before, after)) => self.ctx.emit(Event::TaskChanged { before, after }),
                    Err(err) => warn!(task_guid = task.task_guid, "failed to demote task: {}", err),
                }
            }
        });
        store.throttler().run(works).await;
    }

    async fn expire_tasks(&self, to_expire: &[Task]) {
        let store = &self.ctx.store;
        let works = to_expire.iter().map(|task| {
            move || async move {
                match store.expire_task(&task.task_guid).await {
                    Ok(task) => self.ctx.emit(Event::TaskRemoved { task }),
                    Err(err) => warn!(task_guid = task.task_guid, "failed to expire task: {}", err),
                }
            }
        });
        store.throttler().run(works).await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        data_model::{test_objects::tests::mock_task, TaskState},
        state_store::convergence::tasks::{CELL_DISAPPEARED_REASON, NOT_STARTED_REASON},
        testing::TestHarness,
    };

    #[tokio::test]
    async fn test_pending_task_is_kicked() {
        let h = TestHarness::new();
        h.store.desire_task(&mock_task("t")).await.unwrap();

        let changes = h.task_convergence.converge_tasks().await.unwrap();
        assert!(changes.is_empty());
        assert!(h.auctioneer.task_auctions().is_empty());

        h.clock.advance(Duration::from_secs(31));
        let changes = h.task_convergence.converge_tasks().await.unwrap();
        assert_eq!(changes.to_auction.len(), 1);
        let auctions = h.auctioneer.task_auctions();
        assert_eq!(auctions.len(), 1);
        assert_eq!(auctions[0][0].task_guid, "t");
    }

    #[tokio::test]
    async fn test_old_pending_task_fails() {
        let h = TestHarness::new();
        h.store.desire_task(&mock_task("t")).await.unwrap();
        h.clock.advance(Duration::from_secs(1801));

        h.task_convergence.converge_tasks().await.unwrap();
        let task = h.store.task_by_guid("t").await.unwrap();
        assert_eq!(task.state, TaskState::Completed);
        assert!(task.failed);
        assert_eq!(task.failure_reason, NOT_STARTED_REASON);
        assert_eq!(h.emitter.event_types(), vec!["task_changed"]);
    }

    #[tokio::test]
    async fn test_task_on_missing_cell_fails() {
        let h = TestHarness::new();
        h.store.desire_task(&mock_task("t")).await.unwrap();
        h.store.start_task("t", "c1").await.unwrap();
        h.cells.set([]);

        h.task_convergence.converge_tasks().await.unwrap();
        let task = h.store.task_by_guid("t").await.unwrap();
        assert!(task.failed);
        assert_eq!(task.failure_reason, CELL_DISAPPEARED_REASON);
    }

    #[tokio::test]
    async fn test_task_on_live_cell_is_left_alone() {
        let h = TestHarness::new();
        h.store.desire_task(&mock_task("t")).await.unwrap();
        h.store.start_task("t", "c1").await.unwrap();
        h.clock.advance(Duration::from_secs(60));

        let changes = h.task_convergence.converge_tasks().await.unwrap();
        assert!(changes.is_empty());
        assert_eq!(h.store.task_by_guid("t").await.unwrap().state, TaskState::Running);
    }

    #[tokio::test]
    async fn test_unresolved_tasks_expire() {
        let h = TestHarness::new();
        h.store.desire_task(&mock_task("t")).await.unwrap();
        h.store.fail_task("t", "boom").await.unwrap();
        h.clock.advance(Duration::from_secs(121));

        let changes = h.task_convergence.converge_tasks().await.unwrap();
        assert_eq!(changes.to_expire.len(), 1);
        assert!(h.store.task_by_guid("t").await.unwrap_err().is_not_found());
        assert_eq!(h.emitter.event_types(), vec!["task_removed"]);
    }

    #[tokio::test]
    async fn test_stuck_resolving_task_is_demoted() {
        let h = TestHarness::new();
        h.store.desire_task(&mock_task("t")).await.unwrap();
        h.store.fail_task("t", "boom").await.unwrap();
        h.store.resolving_task("t").await.unwrap();
        h.clock.advance(Duration::from_secs(31));

        let changes = h.task_convergence.converge_tasks().await.unwrap();
        assert_eq!(changes.to_demote.len(), 1);
        assert_eq!(h.store.task_by_guid("t").await.unwrap().state, TaskState::Completed);
    }

    #[tokio::test]
    async fn test_auction_failure_is_not_fatal() {
        let h = TestHarness::new();
        h.store.desire_task(&mock_task("t")).await.unwrap();
        h.clock.advance(Duration::from_secs(31));
        h.auctioneer.set_failing(true);

        let changes = h.task_convergence.converge_tasks().await.unwrap();
        assert_eq!(changes.to_auction.len(), 1);
        assert_eq!(h.store.task_by_guid("t").await.unwrap().state, TaskState::Pending);
    }
}
