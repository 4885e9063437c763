pub mod events;
pub mod restart_calculator;
#[cfg(test)]
pub mod test_objects;

use std::{
    collections::HashMap,
    fmt::{self, Display},
};

use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use strum::AsRefStr;
use uuid::Uuid;

pub use self::{
    events::Event,
    restart_calculator::{RestartCalculator, RestartPolicy},
};

/// Collected reasons a record failed semantic validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", .0.join(", "))]
pub struct ValidationError(pub Vec<String>);

#[derive(Default)]
struct Validator {
    errors: Vec<String>,
}

impl Validator {
    fn check(&mut self, ok: bool, msg: impl Into<String>) -> &mut Self {
        if !ok {
            self.errors.push(msg.into());
        }
        self
    }

    /// Values used as a single segment of a store key must not contain the
    /// key separator.
    fn key_segment(&mut self, value: &str, name: &str) -> &mut Self {
        self.check(!value.is_empty(), format!("{name} is empty"))
            .check(!value.contains('/'), format!("{name} must not contain '/'"))
    }

    fn merge(&mut self, other: Result<(), ValidationError>) -> &mut Self {
        if let Err(ValidationError(errors)) = other {
            self.errors.extend(errors);
        }
        self
    }

    fn finish(&mut self) -> Result<(), ValidationError> {
        if self.errors.is_empty() {
            return Ok(());
        }
        Err(ValidationError(std::mem::take(&mut self.errors)))
    }
}

/// Identifies a logical instance slot of a long-running process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ActualLrpKey {
    pub process_guid: String,
    pub index: u32,
    pub domain: String,
}

impl ActualLrpKey {
    pub fn new(process_guid: impl Into<String>, index: u32, domain: impl Into<String>) -> Self {
        Self {
            process_guid: process_guid.into(),
            index,
            domain: domain.into(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        Validator::default()
            .key_segment(&self.process_guid, "process_guid")
            .check(!self.domain.is_empty(), "domain is empty")
            .finish()
    }
}

impl Display for ActualLrpKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.process_guid, self.index)
    }
}

/// Identifies the concrete execution occupying a slot. The default (empty)
/// value means nothing occupies the slot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct ActualLrpInstanceKey {
    pub instance_guid: String,
    pub cell_id: String,
}

impl ActualLrpInstanceKey {
    pub fn new(instance_guid: impl Into<String>, cell_id: impl Into<String>) -> Self {
        Self {
            instance_guid: instance_guid.into(),
            cell_id: cell_id.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.instance_guid.is_empty() && self.cell_id.is_empty()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        Validator::default()
            .check(!self.instance_guid.is_empty(), "instance_guid is empty")
            .check(!self.cell_id.is_empty(), "cell_id is empty")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct PortMapping {
    pub container_port: u32,
    pub host_port: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct ActualLrpNetInfo {
    pub address: String,
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    #[serde(default)]
    pub instance_address: String,
}

impl ActualLrpNetInfo {
    pub fn new(address: impl Into<String>, ports: Vec<PortMapping>) -> Self {
        Self {
            address: address.into(),
            ports,
            instance_address: String::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.address.is_empty() && self.ports.is_empty() && self.instance_address.is_empty()
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    Default,
    strum::Display,
    AsRefStr,
)]
#[strum(serialize_all = "UPPERCASE")]
pub enum ActualLrpState {
    #[default]
    Unclaimed,
    Claimed,
    Running,
    Crashed,
}

/// Total order over a record's mutation history.
///
/// `epoch` is minted whenever a record is (re)created and never reused, so a
/// tag from a deleted-then-recreated record never compares as "older" than
/// one from the new lineage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct ModificationTag {
    pub epoch: String,
    pub index: u32,
}

impl ModificationTag {
    pub fn new() -> Self {
        Self {
            epoch: Uuid::new_v4().to_string(),
            index: 0,
        }
    }

    pub fn increment(&mut self) {
        self.index += 1;
    }

    /// Whether `other` describes a later version of the record than `self`.
    pub fn succeeded_by(&self, other: &ModificationTag) -> bool {
        if self.epoch.is_empty() || other.epoch.is_empty() {
            return true;
        }
        self.epoch != other.epoch || self.index < other.index
    }
}

/// The instance record of a slot, and the shape of the evacuating record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActualLrp {
    pub key: ActualLrpKey,
    #[serde(default)]
    pub instance_key: ActualLrpInstanceKey,
    #[serde(default)]
    pub net_info: ActualLrpNetInfo,
    pub state: ActualLrpState,
    /// Nanoseconds since the Unix Epoch of the last state change.
    pub since: u64,
    #[serde(default)]
    pub crash_count: u32,
    #[serde(default)]
    pub crash_reason: String,
    #[serde(default)]
    pub placement_error: String,
    #[serde(default)]
    pub modification_tag: ModificationTag,
}

impl ActualLrp {
    pub fn new_unclaimed(key: ActualLrpKey, now: u64) -> Self {
        Self {
            key,
            instance_key: Default::default(),
            net_info: Default::default(),
            state: ActualLrpState::Unclaimed,
            since: now,
            crash_count: 0,
            crash_reason: String::new(),
            placement_error: String::new(),
            modification_tag: ModificationTag::new(),
        }
    }

    pub fn new_running(
        key: ActualLrpKey,
        instance_key: ActualLrpInstanceKey,
        net_info: ActualLrpNetInfo,
        now: u64,
    ) -> Self {
        Self {
            instance_key,
            net_info,
            state: ActualLrpState::Running,
            ..Self::new_unclaimed(key, now)
        }
    }

    /// Checks the state-dependent shape of the record: the instance key is
    /// present iff Claimed or Running, and net info is present iff Running.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut v = Validator::default();
        v.merge(self.key.validate())
            .check(self.since > 0, "since is not set");

        match self.state {
            ActualLrpState::Unclaimed | ActualLrpState::Crashed => {
                v.check(
                    self.instance_key.is_empty(),
                    format!("instance key must be empty when {}", self.state),
                )
                .check(
                    self.net_info.is_empty(),
                    format!("net info must be empty when {}", self.state),
                );
            }
            ActualLrpState::Claimed => {
                v.merge(self.instance_key.validate())
                    .check(self.net_info.is_empty(), "net info must be empty when CLAIMED");
            }
            ActualLrpState::Running => {
                v.merge(self.instance_key.validate())
                    .check(!self.net_info.address.is_empty(), "net info address is empty");
            }
        }
        v.finish()
    }

    /// Legality of moving this record to `to` on behalf of the execution
    /// identified by `instance_key`.
    ///
    /// Claimed and Running are reachable from Unclaimed, or from Claimed and
    /// Running when the caller already owns the slot. Crashed is reachable
    /// only by the owner of a Claimed or Running instance. Unclaimed is
    /// reachable whenever the caller's instance key matches the stored one,
    /// which for Crashed records means the empty key.
    pub fn allows_transition_to(
        &self,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
        to: ActualLrpState,
    ) -> bool {
        if self.key != *key {
            return false;
        }

        match to {
            ActualLrpState::Claimed | ActualLrpState::Running => match self.state {
                ActualLrpState::Unclaimed => true,
                ActualLrpState::Claimed | ActualLrpState::Running => {
                    self.instance_key == *instance_key
                }
                ActualLrpState::Crashed => false,
            },
            ActualLrpState::Crashed => {
                matches!(
                    self.state,
                    ActualLrpState::Claimed | ActualLrpState::Running
                ) && self.instance_key == *instance_key
            }
            ActualLrpState::Unclaimed => self.instance_key == *instance_key,
        }
    }

    /// Same slot, same execution, same address and state. Timestamps, crash
    /// bookkeeping and the modification tag are ignored.
    pub fn is_equivalent_to(&self, other: &ActualLrp) -> bool {
        self.key == other.key &&
            self.instance_key == other.instance_key &&
            self.net_info == other.net_info &&
            self.state == other.state
    }

    pub fn cell_id(&self) -> Option<&str> {
        if self.instance_key.cell_id.is_empty() {
            None
        } else {
            Some(&self.instance_key.cell_id)
        }
    }
}

impl Display for ActualLrp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ActualLrp(key: {}, state: {}, instance: {}, cell: {})",
            self.key, self.state, self.instance_key.instance_guid, self.instance_key.cell_id
        )
    }
}

/// The instance record and evacuating record of one slot, as returned by
/// queries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ActualLrpGroup {
    pub instance: Option<ActualLrp>,
    pub evacuating: Option<ActualLrp>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActualLrpFilter {
    pub domain: Option<String>,
    pub cell_id: Option<String>,
    pub process_guid: Option<String>,
}

impl ActualLrpFilter {
    pub fn matches(&self, lrp: &ActualLrp) -> bool {
        if let Some(domain) = &self.domain {
            if lrp.key.domain != *domain {
                return false;
            }
        }
        if let Some(cell_id) = &self.cell_id {
            if lrp.instance_key.cell_id != *cell_id {
                return false;
            }
        }
        if let Some(process_guid) = &self.process_guid {
            if lrp.key.process_guid != *process_guid {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DesiredLrpKey {
    pub process_guid: String,
    pub domain: String,
    pub log_guid: String,
}

impl DesiredLrpKey {
    pub fn validate(&self) -> Result<(), ValidationError> {
        Validator::default()
            .key_segment(&self.process_guid, "process_guid")
            .check(!self.domain.is_empty(), "domain is empty")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Resource {
    pub memory_mb: u32,
    pub disk_mb: u32,
    #[serde(default)]
    pub max_pids: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RunAction {
    pub path: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvironmentVariable {
    pub name: String,
    pub value: String,
}

/// Placement half of a desired LRP. Its presence is the authoritative signal
/// that the desired LRP exists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DesiredLrpSchedulingInfo {
    pub key: DesiredLrpKey,
    #[serde(default)]
    pub annotation: String,
    pub instances: u32,
    pub root_fs: String,
    pub resource: Resource,
    #[serde(default)]
    pub routes: HashMap<String, String>,
    #[serde(default)]
    pub placement_tags: Vec<String>,
    #[serde(default)]
    pub modification_tag: ModificationTag,
}

impl DesiredLrpSchedulingInfo {
    pub fn validate(&self) -> Result<(), ValidationError> {
        Validator::default()
            .merge(self.key.validate())
            .check(!self.root_fs.is_empty(), "root_fs is empty")
            .finish()
    }

    pub fn apply_update(&mut self, update: &DesiredLrpUpdate) {
        if let Some(instances) = update.instances {
            self.instances = instances;
        }
        if let Some(annotation) = &update.annotation {
            self.annotation = annotation.clone();
        }
        if let Some(routes) = &update.routes {
            self.routes = routes.clone();
        }
        self.modification_tag.increment();
    }
}

/// Execution half of a desired LRP.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DesiredLrpRunInfo {
    pub key: DesiredLrpKey,
    #[serde(default)]
    pub environment_variables: Vec<EnvironmentVariable>,
    pub action: RunAction,
    #[serde(default)]
    pub monitor: Option<RunAction>,
    #[serde(default)]
    pub start_timeout_ms: u64,
    #[serde(default)]
    pub ports: Vec<u32>,
    #[serde(default)]
    pub privileged: bool,
    #[serde(default)]
    pub log_source: String,
    pub created_at: u64,
}

impl DesiredLrpRunInfo {
    pub fn validate(&self) -> Result<(), ValidationError> {
        Validator::default()
            .merge(self.key.validate())
            .check(!self.action.path.is_empty(), "action path is empty")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Builder)]
#[builder(setter(into))]
pub struct DesiredLrp {
    pub process_guid: String,
    pub domain: String,
    #[builder(default)]
    pub log_guid: String,
    #[builder(default)]
    pub annotation: String,
    pub instances: u32,
    pub root_fs: String,
    #[builder(default)]
    pub resource: Resource,
    #[builder(default)]
    pub routes: HashMap<String, String>,
    #[builder(default)]
    pub placement_tags: Vec<String>,
    #[builder(default)]
    pub environment_variables: Vec<EnvironmentVariable>,
    pub action: RunAction,
    #[builder(default)]
    pub monitor: Option<RunAction>,
    #[builder(default)]
    pub start_timeout_ms: u64,
    #[builder(default)]
    pub ports: Vec<u32>,
    #[builder(default)]
    pub privileged: bool,
    #[builder(default)]
    pub log_source: String,
    #[builder(default)]
    pub created_at: u64,
    #[builder(default)]
    pub modification_tag: ModificationTag,
}

impl DesiredLrp {
    fn desired_key(&self) -> DesiredLrpKey {
        DesiredLrpKey {
            process_guid: self.process_guid.clone(),
            domain: self.domain.clone(),
            log_guid: self.log_guid.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        Validator::default()
            .merge(self.scheduling_info().validate())
            .merge(self.run_info().validate())
            .finish()
    }

    pub fn scheduling_info(&self) -> DesiredLrpSchedulingInfo {
        DesiredLrpSchedulingInfo {
            key: self.desired_key(),
            annotation: self.annotation.clone(),
            instances: self.instances,
            root_fs: self.root_fs.clone(),
            resource: self.resource,
            routes: self.routes.clone(),
            placement_tags: self.placement_tags.clone(),
            modification_tag: self.modification_tag.clone(),
        }
    }

    pub fn run_info(&self) -> DesiredLrpRunInfo {
        DesiredLrpRunInfo {
            key: self.desired_key(),
            environment_variables: self.environment_variables.clone(),
            action: self.action.clone(),
            monitor: self.monitor.clone(),
            start_timeout_ms: self.start_timeout_ms,
            ports: self.ports.clone(),
            privileged: self.privileged,
            log_source: self.log_source.clone(),
            created_at: self.created_at,
        }
    }

    pub fn from_parts(scheduling_info: DesiredLrpSchedulingInfo, run_info: DesiredLrpRunInfo) -> Self {
        Self {
            process_guid: scheduling_info.key.process_guid,
            domain: scheduling_info.key.domain,
            log_guid: scheduling_info.key.log_guid,
            annotation: scheduling_info.annotation,
            instances: scheduling_info.instances,
            root_fs: scheduling_info.root_fs,
            resource: scheduling_info.resource,
            routes: scheduling_info.routes,
            placement_tags: scheduling_info.placement_tags,
            environment_variables: run_info.environment_variables,
            action: run_info.action,
            monitor: run_info.monitor,
            start_timeout_ms: run_info.start_timeout_ms,
            ports: run_info.ports,
            privileged: run_info.privileged,
            log_source: run_info.log_source,
            created_at: run_info.created_at,
            modification_tag: scheduling_info.modification_tag,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DesiredLrpUpdate {
    pub instances: Option<u32>,
    pub annotation: Option<String>,
    pub routes: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesiredLrpFilter {
    pub domain: Option<String>,
    pub process_guids: Vec<String>,
}

impl DesiredLrpFilter {
    pub fn matches(&self, key: &DesiredLrpKey) -> bool {
        if let Some(domain) = &self.domain {
            if key.domain != *domain {
                return false;
            }
        }
        self.process_guids.is_empty() || self.process_guids.contains(&key.process_guid)
    }
}

/// Freshness marker. A domain record only exists while it is fresh; its
/// expiry is enforced by the store TTL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Domain {
    pub name: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CellCapacity {
    pub memory_mb: u32,
    pub disk_mb: u32,
    pub containers: u32,
}

/// A live worker node as reported by the presence source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CellPresence {
    pub cell_id: String,
    pub rep_address: String,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub capacity: CellCapacity,
    #[serde(default)]
    pub placement_tags: Vec<String>,
}

impl CellPresence {
    pub fn new(cell_id: impl Into<String>, rep_address: impl Into<String>) -> Self {
        Self {
            cell_id: cell_id.into(),
            rep_address: rep_address.into(),
            zone: String::new(),
            capacity: Default::default(),
            placement_tags: Vec::new(),
        }
    }
}

/// Snapshot of the alive cells, keyed by cell id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CellSet(HashMap<String, CellPresence>);

impl CellSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, cell: CellPresence) {
        self.0.insert(cell.cell_id.clone(), cell);
    }

    pub fn has_cell_id(&self, cell_id: &str) -> bool {
        self.0.contains_key(cell_id)
    }

    pub fn get(&self, cell_id: &str) -> Option<&CellPresence> {
        self.0.get(cell_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn cell_ids(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }
}

impl FromIterator<CellPresence> for CellSet {
    fn from_iter<T: IntoIterator<Item = CellPresence>>(iter: T) -> Self {
        let mut set = CellSet::new();
        for cell in iter {
            set.add(cell);
        }
        set
    }
}

/// Batch request for the scheduling service to place some indices of one
/// desired LRP.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LrpStartRequest {
    pub process_guid: String,
    pub domain: String,
    pub indices: Vec<u32>,
    pub root_fs: String,
    pub resource: Resource,
    #[serde(default)]
    pub placement_tags: Vec<String>,
}

impl LrpStartRequest {
    pub fn new(scheduling_info: &DesiredLrpSchedulingInfo, indices: Vec<u32>) -> Self {
        Self {
            process_guid: scheduling_info.key.process_guid.clone(),
            domain: scheduling_info.key.domain.clone(),
            indices,
            root_fs: scheduling_info.root_fs.clone(),
            resource: scheduling_info.resource,
            placement_tags: scheduling_info.placement_tags.clone(),
        }
    }

    pub fn add_index(&mut self, index: u32) {
        if !self.indices.contains(&index) {
            self.indices.push(index);
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    Default,
    strum::Display,
    AsRefStr,
)]
#[strum(serialize_all = "UPPERCASE")]
pub enum TaskState {
    #[default]
    Pending,
    Running,
    Completed,
    Resolving,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default, Builder)]
#[builder(setter(into), default)]
pub struct TaskDefinition {
    pub root_fs: String,
    pub action: RunAction,
    pub resource: Resource,
    pub environment_variables: Vec<EnvironmentVariable>,
    pub result_file: String,
    pub completion_callback_url: Option<String>,
    pub placement_tags: Vec<String>,
    pub privileged: bool,
    pub log_guid: String,
    pub annotation: String,
}

/// A one-shot unit of work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Builder)]
#[builder(setter(into))]
pub struct Task {
    pub task_guid: String,
    pub domain: String,
    pub definition: TaskDefinition,
    #[builder(default)]
    pub state: TaskState,
    #[builder(default)]
    #[serde(default)]
    pub cell_id: String,
    #[builder(default)]
    #[serde(default)]
    pub result: String,
    #[builder(default)]
    #[serde(default)]
    pub failed: bool,
    #[builder(default)]
    #[serde(default)]
    pub failure_reason: String,
    #[builder(default)]
    pub created_at: u64,
    #[builder(default)]
    pub updated_at: u64,
    #[builder(default)]
    #[serde(default)]
    pub first_completed_at: u64,
}

impl Task {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut v = Validator::default();
        v.key_segment(&self.task_guid, "task_guid")
            .check(!self.domain.is_empty(), "domain is empty")
            .check(!self.definition.root_fs.is_empty(), "root_fs is empty")
            .check(
                !self.definition.action.path.is_empty(),
                "action path is empty",
            );
        if self.state == TaskState::Running {
            v.check(!self.cell_id.is_empty(), "cell_id is empty when RUNNING");
        }
        v.finish()
    }

    /// Marks the task as finished, stamping the first completion time.
    pub fn complete(&mut self, failed: bool, failure_reason: &str, result: &str, now: u64) {
        self.state = TaskState::Completed;
        self.failed = failed;
        self.failure_reason = failure_reason.to_string();
        self.result = result.to_string();
        self.cell_id = String::new();
        self.updated_at = now;
        if self.first_completed_at == 0 {
            self.first_completed_at = now;
        }
    }
}

impl Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Task(guid: {}, domain: {}, state: {}, cell: {})",
            self.task_guid, self.domain, self.state, self.cell_id
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub domain: Option<String>,
    pub cell_id: Option<String>,
}

impl TaskFilter {
    pub fn matches(&self, task: &Task) -> bool {
        if let Some(domain) = &self.domain {
            if task.domain != *domain {
                return false;
            }
        }
        if let Some(cell_id) = &self.cell_id {
            if task.cell_id != *cell_id {
                return false;
            }
        }
        true
    }
}
