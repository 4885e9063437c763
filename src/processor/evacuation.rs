//! The drain protocol a cell follows while shutting down.
//!
//! Every operation answers whether the cell should keep the container
//! running. Only a Running instance that now has an evacuating record for
//! the calling cell is kept.

use std::time::Duration;

use tracing::info;

use super::ControllerContext;
use crate::{
    data_model::{ActualLrp, ActualLrpInstanceKey, ActualLrpKey, ActualLrpNetInfo, ActualLrpState, Event},
    state_store::Error,
};

pub struct EvacuationController {
    ctx: ControllerContext,
}

impl EvacuationController {
    pub fn new(ctx: ControllerContext) -> Self {
        Self { ctx }
    }

    async fn instance(&self, key: &ActualLrpKey) -> Result<Option<ActualLrp>, Error> {
        match self.ctx.store.actual_lrp(&key.process_guid, key.index).await {
            Ok(record) => Ok(Some(record.value)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn owned_by(lrp: &ActualLrp, instance_key: &ActualLrpInstanceKey) -> bool {
        matches!(lrp.state, ActualLrpState::Claimed | ActualLrpState::Running) &&
            lrp.instance_key == *instance_key
    }

    /// Hands the slot back and asks for it to be placed elsewhere.
    async fn unclaim_and_restart(&self, key: &ActualLrpKey, instance_key: &ActualLrpInstanceKey) -> Result<(), Error> {
        let (before, after) = self.ctx.store.unclaim_actual_lrp(key, instance_key).await?;
        self.ctx.emit_actual_lrp_change(before, after, false);
        self.ctx.request_start(key).await;
        Ok(())
    }

    async fn remove_own_evacuating(&self, key: &ActualLrpKey, instance_key: &ActualLrpInstanceKey) -> Result<(), Error> {
        if let Some(actual_lrp) = self
            .ctx
            .store
            .remove_evacuating_actual_lrp(key, instance_key)
            .await?
        {
            self.ctx.emit(Event::ActualLrpRemoved {
                actual_lrp,
                evacuating: true,
            });
        }
        Ok(())
    }

    /// A Claimed instance has nothing worth preserving: it is unclaimed
    /// and no evacuating record is written.
    pub async fn evacuate_claimed_actual_lrp(
        &self,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
    ) -> Result<bool, Error> {
        let Some(instance) = self.instance(key).await? else {
            return Ok(false);
        };
        if instance.state == ActualLrpState::Claimed && instance.instance_key == *instance_key {
            self.unclaim_and_restart(key, instance_key).await?;
            info!(
                process_guid = key.process_guid,
                index = key.index,
                cell_id = instance_key.cell_id,
                "evacuated claimed actual lrp"
            );
        }
        Ok(false)
    }

    /// Preserves the running instance as an evacuating record with `ttl`
    /// and unclaims the instance record if the caller owns it.
    pub async fn evacuate_running_actual_lrp(
        &self,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
        net_info: &ActualLrpNetInfo,
        ttl: Duration,
    ) -> Result<bool, Error> {
        let existing = self
            .ctx
            .store
            .evacuating_actual_lrp(&key.process_guid, key.index)
            .await?;
        if let Some(existing) = &existing {
            if existing.value.instance_key != *instance_key {
                info!(
                    process_guid = key.process_guid,
                    index = key.index,
                    evacuating_cell_id = existing.value.instance_key.cell_id,
                    "slot is already evacuating from another instance"
                );
                return Ok(false);
            }
        }

        let Some(instance) = self.instance(key).await? else {
            self.remove_own_evacuating(key, instance_key).await?;
            return Ok(false);
        };

        let (before, after) = self
            .ctx
            .store
            .evacuate_actual_lrp(key, instance_key, net_info, ttl)
            .await?;
        match before {
            Some(before) => self.ctx.emit_actual_lrp_change(before, after, true),
            None => self.ctx.emit(Event::ActualLrpCreated {
                actual_lrp: after,
                evacuating: true,
            }),
        }

        if Self::owned_by(&instance, instance_key) {
            self.unclaim_and_restart(key, instance_key).await?;
        }
        info!(
            process_guid = key.process_guid,
            index = key.index,
            cell_id = instance_key.cell_id,
            "evacuated running actual lrp"
        );
        Ok(true)
    }

    /// The container stopped during the drain. Instance records that carry
    /// no execution are dropped along with the evacuating record.
    pub async fn evacuate_stopped_actual_lrp(
        &self,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
    ) -> Result<bool, Error> {
        self.remove_own_evacuating(key, instance_key).await?;

        if let Some(instance) = self.instance(key).await? {
            if matches!(instance.state, ActualLrpState::Unclaimed | ActualLrpState::Crashed) {
                let actual_lrp = self
                    .ctx
                    .store
                    .remove_actual_lrp(&key.process_guid, key.index, None)
                    .await?;
                self.ctx.emit(Event::ActualLrpRemoved {
                    actual_lrp,
                    evacuating: false,
                });
            }
        }
        Ok(false)
    }

    /// The container crashed during the drain. The crash is counted
    /// against the instance record.
    pub async fn evacuate_crashed_actual_lrp(
        &self,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
        crash_reason: &str,
    ) -> Result<bool, Error> {
        self.remove_own_evacuating(key, instance_key).await?;

        let Some(instance) = self.instance(key).await? else {
            return Ok(false);
        };
        if Self::owned_by(&instance, instance_key) {
            let (before, after) = self
                .ctx
                .store
                .crash_actual_lrp(key, instance_key, crash_reason)
                .await?;
            let restart = after.state == ActualLrpState::Unclaimed;
            let crashed = Event::crashed(&after, before.instance_key.clone());
            self.ctx.emit_actual_lrp_change(before, after, false);
            self.ctx.emit(crashed);
            if restart {
                self.ctx.request_start(key).await;
            }
        } else if instance.state == ActualLrpState::Unclaimed {
            let (before, after) = self
                .ctx
                .store
                .crash_unclaimed_actual_lrp(key, crash_reason)
                .await?;
            let crashed = Event::crashed(&after, instance_key.clone());
            self.ctx.emit_actual_lrp_change(before, after, false);
            self.ctx.emit(crashed);
        }
        Ok(false)
    }

    pub async fn remove_evacuating_actual_lrp(
        &self,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
    ) -> Result<(), Error> {
        self.remove_own_evacuating(key, instance_key).await
    }
}
