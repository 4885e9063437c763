use std::{ops::Range, sync::Arc};

use tracing::{error, info, warn};

use super::{ActualLrpRetirer, ControllerContext, StartRequests};
use crate::{
    data_model::{
        ActualLrpFilter,
        ActualLrpKey,
        DesiredLrp,
        DesiredLrpSchedulingInfo,
        DesiredLrpUpdate,
        Event,
    },
    state_store::Error,
};

pub struct DesiredLrpController {
    ctx: ControllerContext,
    retirer: Arc<ActualLrpRetirer>,
}

impl DesiredLrpController {
    pub fn new(ctx: ControllerContext, retirer: Arc<ActualLrpRetirer>) -> Self {
        Self { ctx, retirer }
    }

    /// Creates Unclaimed slots for `indices` and asks for all of them to be
    /// placed in one request.
    async fn create_and_start(&self, scheduling_info: &DesiredLrpSchedulingInfo, indices: Range<u32>) {
        let store = &self.ctx.store;
        let works = indices.map(|index| {
            let key = ActualLrpKey::new(
                scheduling_info.key.process_guid.clone(),
                index,
                scheduling_info.key.domain.clone(),
            );
            move || async move {
                match store.create_unclaimed_actual_lrp(&key).await {
                    Ok(actual_lrp) => Some(actual_lrp),
                    Err(err) => {
                        warn!(
                            process_guid = key.process_guid,
                            index = key.index,
                            "failed to create unclaimed actual lrp: {}",
                            err
                        );
                        None
                    }
                }
            }
        });

        let mut starts = StartRequests::default();
        for actual_lrp in store.throttler().run(works).await.into_iter().flatten() {
            starts.add(scheduling_info, actual_lrp.key.index);
            self.ctx.emit(Event::ActualLrpCreated {
                actual_lrp,
                evacuating: false,
            });
        }
        self.ctx.dispatch_starts(starts).await;
    }

    /// Retires every instance record of the process whose index is at or
    /// above `from_index`. Failures are logged and the rest continue.
    async fn retire_from(&self, process_guid: &str, from_index: u32) -> Result<(), Error> {
        let groups = self
            .ctx
            .store
            .actual_lrp_groups(&ActualLrpFilter {
                process_guid: Some(process_guid.to_string()),
                ..Default::default()
            })
            .await?;
        let keys = groups
            .into_iter()
            .filter_map(|group| group.instance)
            .filter(|lrp| lrp.key.index >= from_index)
            .map(|lrp| lrp.key);

        let retirer = &self.retirer;
        let works = keys.map(|key| {
            move || async move {
                if let Err(err) = retirer.retire_actual_lrp(&key).await {
                    error!(
                        process_guid = key.process_guid,
                        index = key.index,
                        "failed to retire actual lrp: {}",
                        err
                    );
                }
            }
        });
        self.ctx.store.throttler().run(works).await;
        Ok(())
    }

    pub async fn desire_lrp(&self, desired_lrp: &DesiredLrp) -> Result<DesiredLrp, Error> {
        let desired_lrp = self.ctx.store.desire_lrp(desired_lrp).await?;
        self.ctx.emit(Event::DesiredLrpCreated {
            desired_lrp: desired_lrp.clone(),
        });
        self.create_and_start(&desired_lrp.scheduling_info(), 0..desired_lrp.instances)
            .await;
        Ok(desired_lrp)
    }

    /// Applies the update and scales the actual records to match.
    pub async fn update_desired_lrp(&self, process_guid: &str, update: &DesiredLrpUpdate) -> Result<DesiredLrp, Error> {
        let before = self.ctx.store.desired_lrp_by_process_guid(process_guid).await?;
        let (previous, scheduling_info) = self.ctx.store.update_desired_lrp(process_guid, update).await?;
        let after = DesiredLrp::from_parts(scheduling_info.clone(), before.run_info());
        self.ctx.emit(Event::DesiredLrpChanged {
            before,
            after: after.clone(),
        });

        if scheduling_info.instances > previous.instances {
            info!(
                process_guid,
                from = previous.instances,
                to = scheduling_info.instances,
                "scaling up desired lrp"
            );
            self.create_and_start(&scheduling_info, previous.instances..scheduling_info.instances)
                .await;
        } else if scheduling_info.instances < previous.instances {
            info!(
                process_guid,
                from = previous.instances,
                to = scheduling_info.instances,
                "scaling down desired lrp"
            );
            self.retire_from(process_guid, scheduling_info.instances).await?;
        }
        Ok(after)
    }

    /// Removes the desired LRP, then retires all of its instances.
    pub async fn remove_desired_lrp(&self, process_guid: &str) -> Result<DesiredLrp, Error> {
        let desired_lrp = self.ctx.store.remove_desired_lrp(process_guid).await?;
        self.ctx.emit(Event::DesiredLrpRemoved {
            desired_lrp: desired_lrp.clone(),
        });
        self.retire_from(process_guid, 0).await?;
        Ok(desired_lrp)
    }
}
