use std::time::Duration;

use bbs_utils::elapsed_since;
use tracing::{info, warn};

use crate::{
    data_model::{CellSet, Task, TaskState},
    state_store::{keys, Error, StateStore},
};

pub const NOT_STARTED_REASON: &str = "not started within time limit";
pub const CELL_DISAPPEARED_REASON: &str = "cell disappeared before completion";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskConvergencePolicy {
    /// Pending tasks are re-auctioned, and Resolving tasks demoted, once
    /// they have not changed for this long.
    pub kick: Duration,
    pub expire_pending: Duration,
    pub expire_completed: Duration,
}

impl Default for TaskConvergencePolicy {
    fn default() -> Self {
        Self {
            kick: Duration::from_secs(30),
            expire_pending: Duration::from_secs(30 * 60),
            expire_completed: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskChanges {
    pub to_auction: Vec<Task>,
    pub to_fail: Vec<(Task, &'static str)>,
    pub to_demote: Vec<Task>,
    pub to_expire: Vec<Task>,
}

impl TaskChanges {
    pub fn is_empty(&self) -> bool {
        self.to_auction.is_empty() &&
            self.to_fail.is_empty() &&
            self.to_demote.is_empty() &&
            self.to_expire.is_empty()
    }
}

pub fn calculate_task_convergence(
    tasks: &[Task],
    cells: &CellSet,
    now: u64,
    policy: &TaskConvergencePolicy,
) -> TaskChanges {
    let mut changes = TaskChanges::default();
    for task in tasks {
        let since_update = elapsed_since(now, task.updated_at);
        match task.state {
            TaskState::Pending => {
                if elapsed_since(now, task.created_at) >= policy.expire_pending {
                    changes.to_fail.push((task.clone(), NOT_STARTED_REASON));
                } else if since_update >= policy.kick {
                    changes.to_auction.push(task.clone());
                }
            }
            TaskState::Running => {
                if !cells.has_cell_id(&task.cell_id) {
                    changes.to_fail.push((task.clone(), CELL_DISAPPEARED_REASON));
                }
            }
            TaskState::Completed | TaskState::Resolving => {
                if elapsed_since(now, task.first_completed_at) >= policy.expire_completed {
                    changes.to_expire.push(task.clone());
                } else if task.state == TaskState::Resolving && since_update >= policy.kick {
                    changes.to_demote.push(task.clone());
                }
            }
        }
    }
    changes
}

impl StateStore {
    /// Reads every task, pruning records that fail to decode or validate.
    pub async fn gather_tasks(&self) -> Result<Vec<Task>, Error> {
        let (records, mut malformed) = self.read_tree::<Task>(keys::TASK_ROOT).await?;
        let mut tasks = Vec::with_capacity(records.len());
        for record in records {
            match record.value.validate() {
                Ok(()) => tasks.push(record.value),
                Err(err) => {
                    warn!(key = record.key, "found invalid task: {}", err);
                    malformed.push(record.into_location());
                }
            }
        }
        let pruned = self.prune(malformed).await;
        info!(tasks = tasks.len(), pruned, "gathered tasks");
        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use bbs_utils::clock::{Clock, FakeClock};

    use super::*;
    use crate::{
        data_model::test_objects::tests::{mock_cell, mock_task},
        state_store::test_state_store::{new_store, put_raw, raw},
    };

    fn task_in(state: TaskState, age: Duration, now: u64) -> Task {
        let mut task = mock_task(&format!("{state}-{}", age.as_secs()));
        let at = now - age.as_nanos() as u64;
        task.state = state;
        task.created_at = at;
        task.updated_at = at;
        if matches!(state, TaskState::Completed | TaskState::Resolving) {
            task.first_completed_at = at;
        }
        if state == TaskState::Running {
            task.cell_id = "c1".to_string();
        }
        task
    }

    #[test]
    fn test_task_convergence_rules() {
        let now = FakeClock::default().now_ns();
        let policy = TaskConvergencePolicy::default();
        let cells = CellSet::from_iter([mock_cell("c1")]);

        let fresh_pending = task_in(TaskState::Pending, Duration::from_secs(1), now);
        let kicked_pending = task_in(TaskState::Pending, Duration::from_secs(31), now);
        let expired_pending = task_in(TaskState::Pending, Duration::from_secs(1801), now);
        let running = task_in(TaskState::Running, Duration::from_secs(500), now);
        let mut orphaned = task_in(TaskState::Running, Duration::from_secs(1), now);
        orphaned.task_guid = "orphaned".to_string();
        orphaned.cell_id = "c-dead".to_string();
        let stuck_resolving = task_in(TaskState::Resolving, Duration::from_secs(40), now);
        let old_completed = task_in(TaskState::Completed, Duration::from_secs(121), now);
        let recent_completed = task_in(TaskState::Completed, Duration::from_secs(40), now);

        let changes = calculate_task_convergence(
            &[
                fresh_pending,
                kicked_pending.clone(),
                expired_pending.clone(),
                running,
                orphaned.clone(),
                stuck_resolving.clone(),
                old_completed.clone(),
                recent_completed,
            ],
            &cells,
            now,
            &policy,
        );

        assert_eq!(changes.to_auction, vec![kicked_pending]);
        assert_eq!(
            changes.to_fail,
            vec![
                (expired_pending, NOT_STARTED_REASON),
                (orphaned, CELL_DISAPPEARED_REASON)
            ]
        );
        assert_eq!(changes.to_demote, vec![stuck_resolving]);
        assert_eq!(changes.to_expire, vec![old_completed]);
    }

    #[tokio::test]
    async fn test_gather_tasks_prunes_invalid() {
        let (store, _) = new_store();
        store.desire_task(&mock_task("good")).await.unwrap();
        put_raw(&store, &keys::task_key("bad"), b"[]").await;
        let mut invalid = mock_task("invalid");
        invalid.domain = String::new();
        put_raw(&store, &keys::task_key("invalid"), serde_json::to_vec(&invalid).unwrap()).await;

        let tasks = store.gather_tasks().await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].task_guid, "good");
        assert!(raw(&store, &keys::task_key("bad")).await.is_none());
        assert!(raw(&store, &keys::task_key("invalid")).await.is_none());
    }
}
