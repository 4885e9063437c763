use serde::{Deserialize, Serialize};
use strum::AsRefStr;

use super::{ActualLrp, ActualLrpInstanceKey, ActualLrpKey, DesiredLrp, Task};

/// Domain events emitted by the state machine, the evacuation protocol and
/// convergence. Subscribers receive them through the event hub.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "snake_case")]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    ActualLrpCreated {
        actual_lrp: ActualLrp,
        evacuating: bool,
    },
    ActualLrpChanged {
        before: ActualLrp,
        after: ActualLrp,
        evacuating: bool,
    },
    ActualLrpRemoved {
        actual_lrp: ActualLrp,
        evacuating: bool,
    },
    ActualLrpCrashed {
        key: ActualLrpKey,
        instance_key: ActualLrpInstanceKey,
        crash_count: u32,
        crash_reason: String,
        since: u64,
    },
    DesiredLrpCreated {
        desired_lrp: DesiredLrp,
    },
    DesiredLrpChanged {
        before: DesiredLrp,
        after: DesiredLrp,
    },
    DesiredLrpRemoved {
        desired_lrp: DesiredLrp,
    },
    TaskCreated {
        task: Task,
    },
    TaskChanged {
        before: Task,
        after: Task,
    },
    TaskRemoved {
        task: Task,
    },
}

impl Event {
    pub fn event_type(&self) -> &str {
        self.as_ref()
    }

    /// Key used to route and log the event.
    pub fn key(&self) -> String {
        match self {
            Event::ActualLrpCreated { actual_lrp, .. } |
            Event::ActualLrpRemoved { actual_lrp, .. } => actual_lrp.key.to_string(),
            Event::ActualLrpChanged { after, .. } => after.key.to_string(),
            Event::ActualLrpCrashed { key, .. } => key.to_string(),
            Event::DesiredLrpCreated { desired_lrp } | Event::DesiredLrpRemoved { desired_lrp } => {
                desired_lrp.process_guid.clone()
            }
            Event::DesiredLrpChanged { after, .. } => after.process_guid.clone(),
            Event::TaskCreated { task } | Event::TaskRemoved { task } => task.task_guid.clone(),
            Event::TaskChanged { after, .. } => after.task_guid.clone(),
        }
    }

    /// The crash event that accompanies an instance record moving out of
    /// Claimed or Running because of a crash.
    pub fn crashed(after: &ActualLrp, instance_key: ActualLrpInstanceKey) -> Self {
        Event::ActualLrpCrashed {
            key: after.key.clone(),
            instance_key,
            crash_count: after.crash_count,
            crash_reason: after.crash_reason.clone(),
            since: after.since,
        }
    }
}
