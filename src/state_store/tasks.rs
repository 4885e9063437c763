use tracing::info;

use super::{keys, Error, Record, StateStore};
use crate::data_model::{Task, TaskFilter, TaskState};

pub const TASK_CANCELLED_REASON: &str = "task was cancelled";

fn transition_error(from: TaskState, to: TaskState) -> Error {
    Error::InvalidStateTransition { from, to }
}

impl StateStore {
    pub async fn desire_task(&self, task: &Task) -> Result<Task, Error> {
        let now = self.now();
        let mut task = task.clone();
        task.state = TaskState::Pending;
        task.cell_id.clear();
        task.created_at = now;
        task.updated_at = now;
        task.first_completed_at = 0;
        task.validate()?;
        self.create_record(&keys::task_key(&task.task_guid), &task, None)
            .await?;
        info!(task_guid = task.task_guid, domain = task.domain, "desired task");
        Ok(task)
    }

    pub async fn task_by_guid(&self, task_guid: &str) -> Result<Task, Error> {
        Ok(self.read::<Task>(&keys::task_key(task_guid)).await?.value)
    }

    pub async fn tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, Error> {
        let (records, _) = self.read_tree::<Task>(keys::TASK_ROOT).await?;
        Ok(records
            .into_iter()
            .map(|r| r.value)
            .filter(|t| filter.matches(t))
            .collect())
    }

    /// Read-modify-CAS over one task. `mutate` returns `false` to leave the
    /// record untouched.
    async fn mutate_task<F>(&self, task_guid: &str, mutate: F) -> Result<(Task, Task), Error>
    where
        F: FnOnce(&mut Task, u64) -> Result<bool, Error>,
    {
        let record: Record<Task> = self.read(&keys::task_key(task_guid)).await?;
        let before = record.value;
        let mut after = before.clone();
        let now = self.now();
        if !mutate(&mut after, now)? {
            return Ok((before.clone(), before));
        }
        after.updated_at = now;
        self.swap_record(&record.key, &after, None, record.version)
            .await?;
        Ok((before, after))
    }

    /// Moves a Pending task to Running on `cell_id`. Starting it again on
    /// the same cell leaves it unchanged.
    pub async fn start_task(&self, task_guid: &str, cell_id: &str) -> Result<(Task, Task), Error> {
        let result = self
            .mutate_task(task_guid, |task, _| {
                if task.state == TaskState::Running && task.cell_id == cell_id {
                    return Ok(false);
                }
                if task.state != TaskState::Pending {
                    return Err(transition_error(task.state, TaskState::Running));
                }
                task.state = TaskState::Running;
                task.cell_id = cell_id.to_string();
                Ok(true)
            })
            .await?;
        info!(task_guid, cell_id, "started task");
        Ok(result)
    }

    pub async fn cancel_task(&self, task_guid: &str) -> Result<(Task, Task), Error> {
        let result = self
            .mutate_task(task_guid, |task, now| {
                if !matches!(task.state, TaskState::Pending | TaskState::Running) {
                    return Err(transition_error(task.state, TaskState::Completed));
                }
                task.complete(true, TASK_CANCELLED_REASON, "", now);
                Ok(true)
            })
            .await?;
        info!(task_guid, "cancelled task");
        Ok(result)
    }

    pub async fn fail_task(&self, task_guid: &str, failure_reason: &str) -> Result<(Task, Task), Error> {
        let result = self
            .mutate_task(task_guid, |task, now| {
                if !matches!(task.state, TaskState::Pending | TaskState::Running) {
                    return Err(transition_error(task.state, TaskState::Completed));
                }
                task.complete(true, failure_reason, "", now);
                Ok(true)
            })
            .await?;
        info!(task_guid, failure_reason, "failed task");
        Ok(result)
    }

    pub async fn complete_task(
        &self,
        task_guid: &str,
        cell_id: &str,
        failed: bool,
        failure_reason: &str,
        result: &str,
    ) -> Result<(Task, Task), Error> {
        let outcome = self
            .mutate_task(task_guid, |task, now| {
                if task.state != TaskState::Running {
                    return Err(transition_error(task.state, TaskState::Completed));
                }
                if task.cell_id != cell_id {
                    return Err(Error::InvalidRequest {
                        reason: format!(
                            "task {} is running on cell {}, not {}",
                            task.task_guid, task.cell_id, cell_id
                        ),
                    });
                }
                task.complete(failed, failure_reason, result, now);
                Ok(true)
            })
            .await?;
        info!(task_guid, cell_id, failed, "completed task");
        Ok(outcome)
    }

    pub async fn resolving_task(&self, task_guid: &str) -> Result<(Task, Task), Error> {
        self.mutate_task(task_guid, |task, _| {
            if task.state != TaskState::Completed {
                return Err(transition_error(task.state, TaskState::Resolving));
            }
            task.state = TaskState::Resolving;
            Ok(true)
        })
        .await
    }

    /// Moves a Resolving task back to Completed so it can be resolved
    /// again.
    pub(crate) async fn demote_resolving_task(&self, task_guid: &str) -> Result<(Task, Task), Error> {
        self.mutate_task(task_guid, |task, _| {
            if task.state != TaskState::Resolving {
                return Err(transition_error(task.state, TaskState::Completed));
            }
            task.state = TaskState::Completed;
            Ok(true)
        })
        .await
    }

    pub async fn delete_task(&self, task_guid: &str) -> Result<Task, Error> {
        let record: Record<Task> = self.read(&keys::task_key(task_guid)).await?;
        if record.value.state != TaskState::Resolving {
            return Err(transition_error(record.value.state, TaskState::Resolving));
        }
        self.delete_record(&record.key, record.version).await?;
        info!(task_guid, "deleted task");
        Ok(record.value)
    }

    /// Deletes a task regardless of state, conditioned on the version read.
    pub(crate) async fn expire_task(&self, task_guid: &str) -> Result<Task, Error> {
        let record: Record<Task> = self.read(&keys::task_key(task_guid)).await?;
        self.delete_record(&record.key, record.version).await?;
        Ok(record.value)
    }
}
