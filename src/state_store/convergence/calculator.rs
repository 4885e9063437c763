use std::time::Duration;

use bbs_utils::elapsed_since;
use strum::AsRefStr;

use super::gatherer::ConvergenceInput;
use crate::data_model::{ActualLrp, ActualLrpState, DesiredLrpSchedulingInfo, RestartCalculator};

/// The bucket an actual record falls into. When several rules apply the
/// earliest variant wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ChangeKind {
    MissingCell,
    ExtraIndex,
    RestartableCrash,
    StaleUnclaimed,
}

/// A slot of a desired LRP with no instance record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingIndex {
    pub scheduling_info: DesiredLrpSchedulingInfo,
    pub index: u32,
}

/// An existing instance record that needs attention, with the scheduling
/// info of its desired LRP when there is one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActualLrpChange {
    pub actual_lrp: ActualLrp,
    pub scheduling_info: Option<DesiredLrpSchedulingInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConvergenceChanges {
    pub missing_indices: Vec<MissingIndex>,
    pub missing_cells: Vec<ActualLrpChange>,
    pub extra_indices: Vec<ActualLrpChange>,
    pub restartable_crashes: Vec<ActualLrpChange>,
    pub stale_unclaimed: Vec<ActualLrpChange>,
}

impl ConvergenceChanges {
    pub fn len(&self) -> usize {
        self.missing_indices.len() +
            self.missing_cells.len() +
            self.extra_indices.len() +
            self.restartable_crashes.len() +
            self.stale_unclaimed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&mut self, kind: ChangeKind, change: ActualLrpChange) {
        match kind {
            ChangeKind::MissingCell => self.missing_cells.push(change),
            ChangeKind::ExtraIndex => self.extra_indices.push(change),
            ChangeKind::RestartableCrash => self.restartable_crashes.push(change),
            ChangeKind::StaleUnclaimed => self.stale_unclaimed.push(change),
        }
    }
}

/// Places one actual record in at most one bucket.
pub fn classify(
    actual_lrp: &ActualLrp,
    scheduling_info: Option<&DesiredLrpSchedulingInfo>,
    input: &ConvergenceInput,
    now: u64,
    restart_calculator: &RestartCalculator,
    stale_unclaimed: Duration,
) -> Option<ChangeKind> {
    let domain_fresh = input.domains.contains(&actual_lrp.key.domain);
    let cell_missing = actual_lrp
        .cell_id()
        .is_some_and(|cell_id| !input.cells.has_cell_id(cell_id));

    let Some(scheduling_info) = scheduling_info else {
        if !domain_fresh {
            return None;
        }
        if cell_missing {
            return Some(ChangeKind::MissingCell);
        }
        return Some(ChangeKind::ExtraIndex);
    };

    if cell_missing {
        return Some(ChangeKind::MissingCell);
    }
    if actual_lrp.key.index >= scheduling_info.instances {
        return domain_fresh.then_some(ChangeKind::ExtraIndex);
    }

    let age = elapsed_since(now, actual_lrp.since);
    match actual_lrp.state {
        ActualLrpState::Crashed if restart_calculator.should_restart(actual_lrp.crash_count, age) => {
            Some(ChangeKind::RestartableCrash)
        }
        ActualLrpState::Unclaimed if age > stale_unclaimed => Some(ChangeKind::StaleUnclaimed),
        _ => None,
    }
}

/// Compares the gathered snapshot against policy. Pure: the same input,
/// time and policy always produce the same changes.
pub fn calculate_convergence(
    input: &ConvergenceInput,
    now: u64,
    restart_calculator: &RestartCalculator,
    stale_unclaimed: Duration,
) -> ConvergenceChanges {
    let mut changes = ConvergenceChanges::default();

    for process_guid in input.process_guids() {
        let scheduling_info = input.scheduling_infos.get(process_guid);
        let actuals = input.actual_lrps.get(process_guid);

        if let Some(scheduling_info) = scheduling_info {
            for index in 0..scheduling_info.instances {
                if !actuals.is_some_and(|a| a.contains_key(&index)) {
                    changes.missing_indices.push(MissingIndex {
                        scheduling_info: scheduling_info.clone(),
                        index,
                    });
                }
            }
        }

        for actual_lrp in actuals.into_iter().flat_map(|a| a.values()) {
            let kind = classify(
                actual_lrp,
                scheduling_info,
                input,
                now,
                restart_calculator,
                stale_unclaimed,
            );
            if let Some(kind) = kind {
                changes.push(
                    kind,
                    ActualLrpChange {
                        actual_lrp: actual_lrp.clone(),
                        scheduling_info: scheduling_info.cloned(),
                    },
                );
            }
        }
    }

    changes
}
