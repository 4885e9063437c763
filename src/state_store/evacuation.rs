use std::time::Duration;

use tracing::info;

use super::{keys, Error, Record, StateStore};
use crate::data_model::{
    ActualLrp,
    ActualLrpInstanceKey,
    ActualLrpKey,
    ActualLrpNetInfo,
    ActualLrpState,
    ModificationTag,
};

impl StateStore {
    pub async fn evacuating_actual_lrp(
        &self,
        process_guid: &str,
        index: u32,
    ) -> Result<Option<Record<ActualLrp>>, Error> {
        self.read_optional(&keys::actual_lrp_evacuating_key(process_guid, index))
            .await
    }

    /// Writes the evacuating record for a running instance, creating it if
    /// absent and replacing it only when it describes a different instance
    /// or address. Returns the previous record, if any, and the current one.
    pub async fn evacuate_actual_lrp(
        &self,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
        net_info: &ActualLrpNetInfo,
        ttl: Duration,
    ) -> Result<(Option<ActualLrp>, ActualLrp), Error> {
        key.validate()?;
        instance_key.validate()?;
        let store_key = keys::actual_lrp_evacuating_key(&key.process_guid, key.index);

        let Some(record) = self.read_optional::<ActualLrp>(&store_key).await? else {
            let lrp = ActualLrp::new_running(
                key.clone(),
                instance_key.clone(),
                net_info.clone(),
                self.now(),
            );
            lrp.validate()?;
            self.create_record(&store_key, &lrp, Some(ttl)).await?;
            info!(
                process_guid = key.process_guid,
                index = key.index,
                cell_id = instance_key.cell_id,
                ttl_secs = ttl.as_secs(),
                "created evacuating actual lrp"
            );
            return Ok((None, lrp));
        };

        let before = record.value;
        if before.key == *key && before.instance_key == *instance_key && before.net_info == *net_info {
            return Ok((Some(before.clone()), before));
        }

        let mut after = before.clone();
        after.key = key.clone();
        after.instance_key = instance_key.clone();
        after.net_info = net_info.clone();
        after.state = ActualLrpState::Running;
        after.since = self.now();
        if after.modification_tag.epoch.is_empty() {
            after.modification_tag = ModificationTag::new();
        }
        after.modification_tag.increment();
        after.validate()?;
        self.swap_record(&store_key, &after, Some(ttl), record.version)
            .await?;
        info!(
            process_guid = key.process_guid,
            index = key.index,
            cell_id = instance_key.cell_id,
            "updated evacuating actual lrp"
        );
        Ok((Some(before), after))
    }

    /// Deletes the evacuating record if it belongs to `instance_key`.
    /// Returns the deleted record, or `None` when there was nothing of the
    /// caller's to delete.
    pub async fn remove_evacuating_actual_lrp(
        &self,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
    ) -> Result<Option<ActualLrp>, Error> {
        let Some(record) = self.evacuating_actual_lrp(&key.process_guid, key.index).await? else {
            return Ok(None);
        };
        if record.value.key != *key || record.value.instance_key != *instance_key {
            return Ok(None);
        }
        self.delete_record(&record.key, record.version).await?;
        info!(
            process_guid = key.process_guid,
            index = key.index,
            cell_id = instance_key.cell_id,
            "removed evacuating actual lrp"
        );
        Ok(Some(record.value))
    }
}
