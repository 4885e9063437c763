use std::{sync::Arc, time::Duration};

use tracing::{error, info, info_span, warn, Instrument};

use super::{ActualLrpRetirer, ControllerContext, StartRequests};
use crate::{
    data_model::{ActualLrpInstanceKey, ActualLrpKey, DesiredLrpSchedulingInfo, Event},
    state_store::{
        convergence::{calculate_convergence, ActualLrpChange, ConvergenceChanges, MissingIndex},
        Error,
    },
};

pub const DEFAULT_STALE_UNCLAIMED: Duration = Duration::from_secs(30);

type StartSlot = (DesiredLrpSchedulingInfo, u32);

/// Runs LRP convergence passes: gather, calculate, then resolve.
///
/// The caller holds the cluster-wide lock. A pass is never cancelled
/// midway; individual failures are logged and the pass carries on.
pub struct LrpConvergenceController {
    ctx: ControllerContext,
    retirer: Arc<ActualLrpRetirer>,
    stale_unclaimed: Duration,
}

impl LrpConvergenceController {
    pub fn new(ctx: ControllerContext, retirer: Arc<ActualLrpRetirer>, stale_unclaimed: Duration) -> Self {
        Self {
            ctx,
            retirer,
            stale_unclaimed,
        }
    }

    /// Runs one pass and returns the changes it acted on.
    pub async fn converge_lrps(&self) -> Result<ConvergenceChanges, Error> {
        let span = info_span!("lrp_convergence");
        async {
            let store = &self.ctx.store;
            let input = store
                .gather_lrp_convergence_input(self.ctx.cells.as_ref())
                .await?;
            let changes = calculate_convergence(
                &input,
                store.now(),
                store.restart_calculator(),
                self.stale_unclaimed,
            );
            info!(
                missing_indices = changes.missing_indices.len(),
                missing_cells = changes.missing_cells.len(),
                extra_indices = changes.extra_indices.len(),
                restartable_crashes = changes.restartable_crashes.len(),
                stale_unclaimed = changes.stale_unclaimed.len(),
                "calculated lrp convergence"
            );
            self.resolve(&changes).await;
            Ok::<_, Error>(changes)
        }
        .instrument(span)
        .await
    }

    async fn resolve(&self, changes: &ConvergenceChanges) {
        let mut starts = StartRequests::default();

        self.retire_extra_indices(&changes.extra_indices).await;

        let mut slots = self.replace_missing_cells(&changes.missing_cells).await;
        slots.extend(self.create_missing_indices(&changes.missing_indices).await);
        slots.extend(
            self.unclaim_restartable_crashes(&changes.restartable_crashes)
                .await,
        );
        starts.extend(slots.iter().map(|(scheduling_info, index)| (scheduling_info, *index)));
        starts.extend(changes.stale_unclaimed.iter().filter_map(|change| {
            change
                .scheduling_info
                .as_ref()
                .map(|scheduling_info| (scheduling_info, change.actual_lrp.key.index))
        }));

        self.ctx.dispatch_starts(starts).await;
    }

    async fn create_unclaimed(&self, scheduling_info: &DesiredLrpSchedulingInfo, index: u32) -> Option<StartSlot> {
        let key = ActualLrpKey::new(
            scheduling_info.key.process_guid.clone(),
            index,
            scheduling_info.key.domain.clone(),
        );
        match self.ctx.store.create_unclaimed_actual_lrp(&key).await {
            Ok(actual_lrp) => {
                self.ctx.emit(Event::ActualLrpCreated {
                    actual_lrp,
                    evacuating: false,
                });
                Some((scheduling_info.clone(), index))
            }
            Err(err) => {
                warn!(
                    process_guid = key.process_guid,
                    index,
                    "failed to create unclaimed actual lrp: {}",
                    err
                );
                None
            }
        }
    }

    async fn create_missing_indices(&self, missing: &[MissingIndex]) -> Vec<StartSlot> {
        let works = missing.iter().map(|m| move || self.create_unclaimed(&m.scheduling_info, m.index));
        self.ctx
            .store
            .throttler()
            .run(works)
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    /// Drops records that point at vanished cells and recreates the slots
    /// that are still desired.
    async fn replace_missing_cells(&self, changes: &[ActualLrpChange]) -> Vec<StartSlot> {
        let works = changes.iter().map(|change| {
            move || async move {
                let key = &change.actual_lrp.key;
                let removed = self
                    .ctx
                    .store
                    .remove_actual_lrp(&key.process_guid, key.index, None)
                    .await;
                match removed {
                    Ok(actual_lrp) => self.ctx.emit(Event::ActualLrpRemoved {
                        actual_lrp,
                        evacuating: false,
                    }),
                    Err(err) => {
                        warn!(
                            process_guid = key.process_guid,
                            index = key.index,
                            "failed to remove actual lrp on missing cell: {}",
                            err
                        );
                        return None;
                    }
                }
                let scheduling_info = change.scheduling_info.as_ref()?;
                if key.index >= scheduling_info.instances {
                    return None;
                }
                self.create_unclaimed(scheduling_info, key.index).await
            }
        });
        self.ctx
            .store
            .throttler()
            .run(works)
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    async fn retire_extra_indices(&self, changes: &[ActualLrpChange]) {
        let works = changes.iter().map(|change| {
            move || async move {
                let key = &change.actual_lrp.key;
                if let Err(err) = self.retirer.retire_actual_lrp(key).await {
                    error!(
                        process_guid = key.process_guid,
                        index = key.index,
                        "failed to retire extra actual lrp: {}",
                        err
                    );
                }
            }
        });
        self.ctx.store.throttler().run(works).await;
    }

    async fn unclaim_restartable_crashes(&self, changes: &[ActualLrpChange]) -> Vec<StartSlot> {
        let works = changes.iter().map(|change| {
            move || async move {
                let key = &change.actual_lrp.key;
                let scheduling_info = change.scheduling_info.as_ref()?;
                match self
                    .ctx
                    .store
                    .unclaim_actual_lrp(key, &ActualLrpInstanceKey::default())
                    .await
                {
                    Ok((before, after)) => {
                        self.ctx.emit_actual_lrp_change(before, after, false);
                        Some((scheduling_info.clone(), key.index))
                    }
                    Err(err) => {
                        warn!(
                            process_guid = key.process_guid,
                            index = key.index,
                            "failed to unclaim crashed actual lrp: {}",
                            err
                        );
                        None
                    }
                }
            }
        });
        self.ctx
            .store
            .throttler()
            .run(works)
            .await
            .into_iter()
            .flatten()
            .collect()
    }
}
