use std::{
    collections::{BTreeMap, HashMap, HashSet},
    time::Duration,
};

use bbs_utils::elapsed_since;
use tracing::{info, warn};

use crate::{
    cells::CellPresenceSource,
    data_model::{
        ActualLrp,
        CellSet,
        DesiredLrpKey,
        DesiredLrpRunInfo,
        DesiredLrpSchedulingInfo,
        ValidationError,
    },
    state_store::{
        keys::{self, ActualLrpRecordKind},
        Error,
        StateStore,
    },
};

/// How long a run-info may sit without its scheduling-info before it is
/// treated as left behind by a desire that never finished.
pub const ORPHANED_RUN_INFO_GRACE: Duration = Duration::from_secs(60);

/// Snapshot that one convergence pass works from. The cell and domain sets
/// are read once per pass and never refreshed mid-pass.
#[derive(Debug, Clone, Default)]
pub struct ConvergenceInput {
    /// Instance records by process guid, then index.
    pub actual_lrps: HashMap<String, BTreeMap<u32, ActualLrp>>,
    pub scheduling_infos: HashMap<String, DesiredLrpSchedulingInfo>,
    pub domains: HashSet<String>,
    pub cells: CellSet,
}

impl ConvergenceInput {
    /// Every process guid seen in either the actual or the desired set,
    /// sorted.
    pub fn process_guids(&self) -> Vec<&String> {
        let mut guids: Vec<&String> = self
            .actual_lrps
            .keys()
            .chain(self.scheduling_infos.keys())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        guids.sort();
        guids
    }
}

/// Why a decodable actual record is still unusable.
fn actual_lrp_defect(key: &str, lrp: &ActualLrp) -> Option<String> {
    let Some((process_guid, index, _)) = keys::parse_actual_lrp_key(key) else {
        return Some("key does not follow the actual lrp layout".to_string());
    };
    if lrp.key.process_guid != process_guid || lrp.key.index != index {
        return Some(format!("record describes {} instead", lrp.key));
    }
    lrp.validate().err().map(|e| e.to_string())
}

/// Why a decodable desired-LRP half is still unusable.
fn desired_lrp_defect(
    key: &str,
    expected_key: fn(&str) -> String,
    desired_key: &DesiredLrpKey,
    validation: Result<(), ValidationError>,
) -> Option<String> {
    if let Err(err) = validation {
        return Some(err.to_string());
    }
    if expected_key(&desired_key.process_guid) != key {
        return Some(format!("record describes {} instead", desired_key.process_guid));
    }
    None
}

impl StateStore {
    /// Reads everything one LRP convergence pass needs.
    ///
    /// Actual records are read before desired records. Reading them the
    /// other way round lets a desired LRP deleted mid-read leave its
    /// actuals looking like they belong to nothing. Malformed records are
    /// pruned as they are found.
    pub async fn gather_lrp_convergence_input(
        &self,
        cell_presence: &dyn CellPresenceSource,
    ) -> Result<ConvergenceInput, Error> {
        let (actual_records, mut malformed) = self.read_tree::<ActualLrp>(keys::ACTUAL_LRP_ROOT).await?;
        let mut actual_lrps: HashMap<String, BTreeMap<u32, ActualLrp>> = HashMap::new();
        let mut actual_count = 0;
        for record in actual_records {
            if let Some(defect) = actual_lrp_defect(&record.key, &record.value) {
                warn!(key = record.key, "found invalid actual lrp: {}", defect);
                malformed.push(record.into_location());
                continue;
            }
            if let Some((_, _, ActualLrpRecordKind::Instance)) = keys::parse_actual_lrp_key(&record.key) {
                actual_count += 1;
                actual_lrps
                    .entry(record.value.key.process_guid.clone())
                    .or_default()
                    .insert(record.value.key.index, record.value);
            }
        }
        let pruned_actuals = self.prune(malformed).await;

        let (scheduling_records, mut malformed) = self
            .read_tree::<DesiredLrpSchedulingInfo>(keys::DESIRED_LRP_SCHEDULING_INFO_ROOT)
            .await?;
        let mut scheduling_infos = HashMap::new();
        for record in scheduling_records {
            let defect = desired_lrp_defect(
                &record.key,
                keys::scheduling_info_key,
                &record.value.key,
                record.value.validate(),
            );
            if let Some(defect) = defect {
                warn!(key = record.key, "found invalid scheduling info: {}", defect);
                malformed.push(record.into_location());
                continue;
            }
            scheduling_infos.insert(record.value.key.process_guid.clone(), record.value);
        }

        let (run_info_records, malformed_run_infos) = self
            .read_tree::<DesiredLrpRunInfo>(keys::DESIRED_LRP_RUN_INFO_ROOT)
            .await?;
        malformed.extend(malformed_run_infos);
        let now = self.now();
        let mut run_info_guids = HashSet::new();
        for record in run_info_records {
            let defect = desired_lrp_defect(
                &record.key,
                keys::run_info_key,
                &record.value.key,
                record.value.validate(),
            );
            if let Some(defect) = defect {
                warn!(key = record.key, "found invalid run info: {}", defect);
                malformed.push(record.into_location());
                continue;
            }
            let process_guid = &record.value.key.process_guid;
            if !scheduling_infos.contains_key(process_guid) &&
                elapsed_since(now, record.value.created_at) > ORPHANED_RUN_INFO_GRACE
            {
                warn!(key = record.key, "found run info without scheduling info");
                malformed.push(record.into_location());
                continue;
            }
            run_info_guids.insert(process_guid.clone());
        }
        for process_guid in scheduling_infos.keys() {
            if !run_info_guids.contains(process_guid) {
                warn!(process_guid, "desired lrp has no run info");
            }
        }
        let pruned_desired = self.prune(malformed).await;

        let domains = self.domains().await?;
        let cells = cell_presence.cells().await?;

        info!(
            actual_lrps = actual_count,
            desired_lrps = scheduling_infos.len(),
            domains = domains.len(),
            cells = cells.len(),
            pruned_actuals,
            pruned_desired,
            "gathered convergence input"
        );
        Ok(ConvergenceInput {
            actual_lrps,
            scheduling_infos,
            domains,
            cells,
        })
    }
}
