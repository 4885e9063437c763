//! Key layout of every record kept in the versioned store.

pub const ACTUAL_LRP_ROOT: &str = "/v1/actual";
pub const DESIRED_LRP_SCHEDULING_INFO_ROOT: &str = "/v1/desired_lrp/schedule";
pub const DESIRED_LRP_RUN_INFO_ROOT: &str = "/v1/desired_lrp/run";
pub const DOMAIN_ROOT: &str = "/v1/domain";
pub const TASK_ROOT: &str = "/v1/task";

const INSTANCE_LEAF: &str = "instance";
const EVACUATING_LEAF: &str = "evacuating";

/// Which of the two records of a slot a key points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActualLrpRecordKind {
    Instance,
    Evacuating,
}

pub fn actual_lrp_process_dir(process_guid: &str) -> String {
    format!("{ACTUAL_LRP_ROOT}/{process_guid}")
}

pub fn actual_lrp_index_dir(process_guid: &str, index: u32) -> String {
    format!("{ACTUAL_LRP_ROOT}/{process_guid}/{index}")
}

pub fn actual_lrp_instance_key(process_guid: &str, index: u32) -> String {
    format!("{}/{INSTANCE_LEAF}", actual_lrp_index_dir(process_guid, index))
}

pub fn actual_lrp_evacuating_key(process_guid: &str, index: u32) -> String {
    format!("{}/{EVACUATING_LEAF}", actual_lrp_index_dir(process_guid, index))
}

/// Splits `/v1/actual/{guid}/{index}/{leaf}` into its parts. Returns `None`
/// for anything that does not follow the layout.
pub fn parse_actual_lrp_key(key: &str) -> Option<(&str, u32, ActualLrpRecordKind)> {
    let rest = key.strip_prefix(ACTUAL_LRP_ROOT)?.strip_prefix('/')?;
    let mut parts = rest.split('/');
    let process_guid = parts.next().filter(|p| !p.is_empty())?;
    let index = parts.next()?.parse().ok()?;
    let kind = match parts.next()? {
        INSTANCE_LEAF => ActualLrpRecordKind::Instance,
        EVACUATING_LEAF => ActualLrpRecordKind::Evacuating,
        _ => return None,
    };
    if parts.next().is_some() {
        return None;
    }
    Some((process_guid, index, kind))
}

pub fn scheduling_info_key(process_guid: &str) -> String {
    format!("{DESIRED_LRP_SCHEDULING_INFO_ROOT}/{process_guid}")
}

pub fn run_info_key(process_guid: &str) -> String {
    format!("{DESIRED_LRP_RUN_INFO_ROOT}/{process_guid}")
}

pub fn domain_key(name: &str) -> String {
    format!("{DOMAIN_ROOT}/{name}")
}

pub fn task_key(task_guid: &str) -> String {
    format!("{TASK_ROOT}/{task_guid}")
}
