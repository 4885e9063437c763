use std::collections::BTreeMap;

use bbs_utils::elapsed_since;
use tracing::{debug, info};

use super::{
    keys::{self, ActualLrpRecordKind},
    Error,
    Record,
    StateStore,
};
use crate::data_model::{
    ActualLrp,
    ActualLrpFilter,
    ActualLrpGroup,
    ActualLrpInstanceKey,
    ActualLrpKey,
    ActualLrpNetInfo,
    ActualLrpState,
};

impl StateStore {
    pub async fn actual_lrp_groups(&self, filter: &ActualLrpFilter) -> Result<Vec<ActualLrpGroup>, Error> {
        let prefix = match &filter.process_guid {
            Some(process_guid) => keys::actual_lrp_process_dir(process_guid),
            None => keys::ACTUAL_LRP_ROOT.to_string(),
        };
        let (records, _) = self.read_tree::<ActualLrp>(&prefix).await?;

        let mut groups: BTreeMap<(String, u32), ActualLrpGroup> = BTreeMap::new();
        for record in records {
            let Some((_, _, kind)) = keys::parse_actual_lrp_key(&record.key) else {
                continue;
            };
            if !filter.matches(&record.value) {
                continue;
            }
            let group = groups
                .entry((record.value.key.process_guid.clone(), record.value.key.index))
                .or_default();
            match kind {
                ActualLrpRecordKind::Instance => group.instance = Some(record.value),
                ActualLrpRecordKind::Evacuating => group.evacuating = Some(record.value),
            }
        }
        Ok(groups.into_values().collect())
    }

    pub async fn actual_lrp_group(&self, process_guid: &str, index: u32) -> Result<ActualLrpGroup, Error> {
        let instance = self
            .read_optional::<ActualLrp>(&keys::actual_lrp_instance_key(process_guid, index))
            .await?;
        let evacuating = self
            .read_optional::<ActualLrp>(&keys::actual_lrp_evacuating_key(process_guid, index))
            .await?;
        if instance.is_none() && evacuating.is_none() {
            return Err(Error::ResourceNotFound {
                key: keys::actual_lrp_index_dir(process_guid, index),
            });
        }
        Ok(ActualLrpGroup {
            instance: instance.map(|r| r.value),
            evacuating: evacuating.map(|r| r.value),
        })
    }

    pub async fn actual_lrp(&self, process_guid: &str, index: u32) -> Result<Record<ActualLrp>, Error> {
        self.read(&keys::actual_lrp_instance_key(process_guid, index))
            .await
    }

    pub async fn create_unclaimed_actual_lrp(&self, key: &ActualLrpKey) -> Result<ActualLrp, Error> {
        key.validate()?;
        let lrp = ActualLrp::new_unclaimed(key.clone(), self.now());
        self.create_record(
            &keys::actual_lrp_instance_key(&key.process_guid, key.index),
            &lrp,
            None,
        )
        .await?;
        debug!(process_guid = key.process_guid, index = key.index, "created unclaimed actual lrp");
        Ok(lrp)
    }

    pub async fn claim_actual_lrp(
        &self,
        process_guid: &str,
        index: u32,
        instance_key: &ActualLrpInstanceKey,
    ) -> Result<(ActualLrp, ActualLrp), Error> {
        instance_key.validate()?;
        let record = self.actual_lrp(process_guid, index).await?;
        let before = record.value;

        if before.state == ActualLrpState::Claimed && before.instance_key == *instance_key {
            return Ok((before.clone(), before));
        }
        if !before.allows_transition_to(&before.key, instance_key, ActualLrpState::Claimed) {
            return Err(Error::ActualLrpCannotBeClaimed {
                key: before.key.to_string(),
            });
        }

        let mut after = before.clone();
        after.state = ActualLrpState::Claimed;
        after.instance_key = instance_key.clone();
        after.net_info = ActualLrpNetInfo::default();
        after.placement_error.clear();
        after.since = self.now();
        after.modification_tag.increment();
        self.swap_record(&record.key, &after, None, record.version)
            .await?;

        info!(
            process_guid,
            index,
            instance_guid = instance_key.instance_guid,
            cell_id = instance_key.cell_id,
            "claimed actual lrp"
        );
        Ok((before, after))
    }

    /// Moves the slot to Running. Creates the record directly in Running
    /// when the cell started an instance for a slot that was never claimed.
    pub async fn start_actual_lrp(
        &self,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
        net_info: &ActualLrpNetInfo,
    ) -> Result<(Option<ActualLrp>, ActualLrp), Error> {
        key.validate()?;
        instance_key.validate()?;
        let store_key = keys::actual_lrp_instance_key(&key.process_guid, key.index);

        let Some(record) = self.read_optional::<ActualLrp>(&store_key).await? else {
            let lrp = ActualLrp::new_running(
                key.clone(),
                instance_key.clone(),
                net_info.clone(),
                self.now(),
            );
            lrp.validate()?;
            self.create_record(&store_key, &lrp, None).await?;
            info!(
                process_guid = key.process_guid,
                index = key.index,
                cell_id = instance_key.cell_id,
                "started actual lrp without a claimed slot"
            );
            return Ok((None, lrp));
        };

        let before = record.value;
        if before.state == ActualLrpState::Running &&
            before.key == *key &&
            before.instance_key == *instance_key &&
            before.net_info == *net_info
        {
            return Ok((Some(before.clone()), before));
        }
        if !before.allows_transition_to(key, instance_key, ActualLrpState::Running) {
            return Err(Error::ActualLrpCannotBeStarted {
                key: key.to_string(),
            });
        }

        let mut after = before.clone();
        after.state = ActualLrpState::Running;
        after.instance_key = instance_key.clone();
        after.net_info = net_info.clone();
        after.placement_error.clear();
        after.since = self.now();
        after.modification_tag.increment();
        after.validate()?;
        self.swap_record(&store_key, &after, None, record.version)
            .await?;

        info!(
            process_guid = key.process_guid,
            index = key.index,
            instance_guid = instance_key.instance_guid,
            cell_id = instance_key.cell_id,
            "started actual lrp"
        );
        Ok((Some(before), after))
    }

    /// Records a crash of the execution identified by `instance_key`.
    ///
    /// The record is written back as Unclaimed, never visibly Crashed, when
    /// the new crash count is still immediately restartable.
    pub async fn crash_actual_lrp(
        &self,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
        crash_reason: &str,
    ) -> Result<(ActualLrp, ActualLrp), Error> {
        let record = self.actual_lrp(&key.process_guid, key.index).await?;
        let before = record.value;
        if !before.allows_transition_to(key, instance_key, ActualLrpState::Crashed) {
            return Err(Error::ActualLrpCannotBeCrashed {
                key: key.to_string(),
            });
        }

        let now = self.now();
        let crash_count = if before.state == ActualLrpState::Running &&
            elapsed_since(now, before.since) > self.crash_reset
        {
            1
        } else {
            before.crash_count.saturating_add(1)
        };

        let mut after = before.clone();
        after.state = ActualLrpState::Crashed;
        after.instance_key = ActualLrpInstanceKey::default();
        after.net_info = ActualLrpNetInfo::default();
        after.crash_count = crash_count;
        after.crash_reason = crash_reason.to_string();
        after.since = now;
        after.modification_tag.increment();
        if self.restart_calculator.should_restart_immediately(crash_count) {
            after.state = ActualLrpState::Unclaimed;
        }
        self.swap_record(&record.key, &after, None, record.version)
            .await?;

        info!(
            process_guid = key.process_guid,
            index = key.index,
            crash_count,
            state = %after.state,
            "crashed actual lrp"
        );
        Ok((before, after))
    }

    /// Counts a crash against a slot that is already Unclaimed, following
    /// the same restart rule as a regular crash.
    pub async fn crash_unclaimed_actual_lrp(
        &self,
        key: &ActualLrpKey,
        crash_reason: &str,
    ) -> Result<(ActualLrp, ActualLrp), Error> {
        let record = self.actual_lrp(&key.process_guid, key.index).await?;
        let before = record.value;
        if before.state != ActualLrpState::Unclaimed || before.key != *key {
            return Err(Error::ActualLrpCannotBeCrashed {
                key: key.to_string(),
            });
        }

        let mut after = before.clone();
        after.crash_count = before.crash_count.saturating_add(1);
        after.crash_reason = crash_reason.to_string();
        after.since = self.now();
        after.modification_tag.increment();
        if !self
            .restart_calculator
            .should_restart_immediately(after.crash_count)
        {
            after.state = ActualLrpState::Crashed;
        }
        self.swap_record(&record.key, &after, None, record.version)
            .await?;
        Ok((before, after))
    }

    pub async fn fail_actual_lrp(
        &self,
        key: &ActualLrpKey,
        placement_error: &str,
    ) -> Result<(ActualLrp, ActualLrp), Error> {
        let record = self.actual_lrp(&key.process_guid, key.index).await?;
        let before = record.value;
        if before.state != ActualLrpState::Unclaimed || before.key != *key {
            return Err(Error::ActualLrpCannotBeFailed {
                key: key.to_string(),
            });
        }

        let mut after = before.clone();
        after.placement_error = placement_error.to_string();
        after.since = self.now();
        after.modification_tag.increment();
        self.swap_record(&record.key, &after, None, record.version)
            .await?;

        info!(
            process_guid = key.process_guid,
            index = key.index,
            placement_error,
            "failed actual lrp"
        );
        Ok((before, after))
    }

    /// Resets the slot to Unclaimed on behalf of `instance_key`. A Crashed
    /// slot is unclaimed with the empty instance key.
    pub async fn unclaim_actual_lrp(
        &self,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
    ) -> Result<(ActualLrp, ActualLrp), Error> {
        let record = self.actual_lrp(&key.process_guid, key.index).await?;
        let before = record.value;
        if before.state == ActualLrpState::Unclaimed && before.key == *key {
            return Ok((before.clone(), before));
        }
        if !before.allows_transition_to(key, instance_key, ActualLrpState::Unclaimed) {
            return Err(Error::ActualLrpCannotBeUnclaimed {
                key: key.to_string(),
            });
        }

        let mut after = before.clone();
        after.state = ActualLrpState::Unclaimed;
        after.instance_key = ActualLrpInstanceKey::default();
        after.net_info = ActualLrpNetInfo::default();
        after.since = self.now();
        after.modification_tag.increment();
        self.swap_record(&record.key, &after, None, record.version)
            .await?;

        debug!(process_guid = key.process_guid, index = key.index, "unclaimed actual lrp");
        Ok((before, after))
    }

    /// Deletes the instance record, conditioned on the version just read.
    /// When `instance_key` is given it must match the stored one.
    pub async fn remove_actual_lrp(
        &self,
        process_guid: &str,
        index: u32,
        instance_key: Option<&ActualLrpInstanceKey>,
    ) -> Result<ActualLrp, Error> {
        let record = self.actual_lrp(process_guid, index).await?;
        if let Some(instance_key) = instance_key {
            if record.value.instance_key != *instance_key {
                return Err(Error::ActualLrpCannotBeRemoved {
                    key: record.value.key.to_string(),
                });
            }
        }
        self.delete_record(&record.key, record.version).await?;
        info!(process_guid, index, "removed actual lrp");
        Ok(record.value)
    }
}
