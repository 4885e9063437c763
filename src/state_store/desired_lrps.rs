use std::collections::{BTreeMap, HashMap};

use tracing::{info, warn};

use super::{keys, Error, Record, StateStore};
use crate::data_model::{
    DesiredLrp,
    DesiredLrpFilter,
    DesiredLrpRunInfo,
    DesiredLrpSchedulingInfo,
    DesiredLrpUpdate,
    ModificationTag,
};

/// Assembles desired LRPs from their two halves, which are stored and read
/// independently. A desired LRP is only produced once both halves are in.
#[derive(Debug, Default)]
pub struct DesiredLrpMergeCache {
    partials: HashMap<String, (Option<DesiredLrpSchedulingInfo>, Option<DesiredLrpRunInfo>)>,
}

impl DesiredLrpMergeCache {
    pub fn add_scheduling_info(&mut self, scheduling_info: DesiredLrpSchedulingInfo) -> Option<DesiredLrp> {
        let guid = scheduling_info.key.process_guid.clone();
        let entry = self.partials.entry(guid.clone()).or_default();
        entry.0 = Some(scheduling_info);
        self.try_merge(&guid)
    }

    pub fn add_run_info(&mut self, run_info: DesiredLrpRunInfo) -> Option<DesiredLrp> {
        let guid = run_info.key.process_guid.clone();
        let entry = self.partials.entry(guid.clone()).or_default();
        entry.1 = Some(run_info);
        self.try_merge(&guid)
    }

    fn try_merge(&mut self, process_guid: &str) -> Option<DesiredLrp> {
        match self.partials.remove(process_guid) {
            Some((Some(scheduling_info), Some(run_info))) => {
                Some(DesiredLrp::from_parts(scheduling_info, run_info))
            }
            Some(partial) => {
                self.partials.insert(process_guid.to_string(), partial);
                None
            }
            None => None,
        }
    }

    /// Process guids that only ever received one half.
    pub fn incomplete(&self) -> impl Iterator<Item = &String> {
        self.partials.keys()
    }
}

impl StateStore {
    /// Persists a new desired LRP. Run-info is written first and
    /// scheduling-info second, so scheduling-info's presence means the
    /// desired LRP exists.
    pub async fn desire_lrp(&self, desired_lrp: &DesiredLrp) -> Result<DesiredLrp, Error> {
        desired_lrp.validate()?;
        let mut desired_lrp = desired_lrp.clone();
        desired_lrp.modification_tag = ModificationTag::new();
        desired_lrp.created_at = self.now();
        let process_guid = desired_lrp.process_guid.clone();

        let run_info_key = keys::run_info_key(&process_guid);
        let run_info_version = self
            .create_record(&run_info_key, &desired_lrp.run_info(), None)
            .await?;

        if let Err(err) = self
            .create_record(
                &keys::scheduling_info_key(&process_guid),
                &desired_lrp.scheduling_info(),
                None,
            )
            .await
        {
            if let Err(rollback_err) = self.delete_record(&run_info_key, run_info_version).await {
                warn!(
                    process_guid,
                    "failed to roll back run info after failed desire: {}", rollback_err
                );
            }
            return Err(err);
        }

        info!(process_guid, instances = desired_lrp.instances, "desired lrp");
        Ok(desired_lrp)
    }

    pub async fn desired_lrp_scheduling_info(
        &self,
        process_guid: &str,
    ) -> Result<Record<DesiredLrpSchedulingInfo>, Error> {
        self.read(&keys::scheduling_info_key(process_guid)).await
    }

    pub async fn desired_lrp_by_process_guid(&self, process_guid: &str) -> Result<DesiredLrp, Error> {
        let scheduling_info = self.desired_lrp_scheduling_info(process_guid).await?;
        let run_info = self
            .read::<DesiredLrpRunInfo>(&keys::run_info_key(process_guid))
            .await?;
        Ok(DesiredLrp::from_parts(scheduling_info.value, run_info.value))
    }

    pub async fn desired_lrp_scheduling_infos(
        &self,
        filter: &DesiredLrpFilter,
    ) -> Result<Vec<DesiredLrpSchedulingInfo>, Error> {
        let (records, _) = self
            .read_tree::<DesiredLrpSchedulingInfo>(keys::DESIRED_LRP_SCHEDULING_INFO_ROOT)
            .await?;
        Ok(records
            .into_iter()
            .map(|r| r.value)
            .filter(|s| filter.matches(&s.key))
            .collect())
    }

    pub async fn desired_lrps(&self, filter: &DesiredLrpFilter) -> Result<Vec<DesiredLrp>, Error> {
        let scheduling_infos = self.desired_lrp_scheduling_infos(filter).await?;
        let (run_infos, _) = self
            .read_tree::<DesiredLrpRunInfo>(keys::DESIRED_LRP_RUN_INFO_ROOT)
            .await?;

        let mut cache = DesiredLrpMergeCache::default();
        let mut merged = BTreeMap::new();
        for scheduling_info in scheduling_infos {
            if let Some(lrp) = cache.add_scheduling_info(scheduling_info) {
                merged.insert(lrp.process_guid.clone(), lrp);
            }
        }
        for run_info in run_infos.into_iter().map(|r| r.value) {
            if !filter.matches(&run_info.key) {
                continue;
            }
            if let Some(lrp) = cache.add_run_info(run_info) {
                merged.insert(lrp.process_guid.clone(), lrp);
            }
        }
        for process_guid in cache.incomplete() {
            warn!(process_guid, "desired lrp is missing one of its halves");
        }
        Ok(merged.into_values().collect())
    }

    pub async fn update_desired_lrp(
        &self,
        process_guid: &str,
        update: &DesiredLrpUpdate,
    ) -> Result<(DesiredLrpSchedulingInfo, DesiredLrpSchedulingInfo), Error> {
        let record = self.desired_lrp_scheduling_info(process_guid).await?;
        let before = record.value;
        let mut after = before.clone();
        after.apply_update(update);
        after.validate()?;
        self.swap_record(&record.key, &after, None, record.version)
            .await?;
        info!(
            process_guid,
            instances = after.instances,
            previous_instances = before.instances,
            "updated desired lrp"
        );
        Ok((before, after))
    }

    /// Deletes scheduling-info, then run-info.
    pub async fn remove_desired_lrp(&self, process_guid: &str) -> Result<DesiredLrp, Error> {
        let scheduling_info = self.desired_lrp_scheduling_info(process_guid).await?;
        let run_info = self
            .read_optional::<DesiredLrpRunInfo>(&keys::run_info_key(process_guid))
            .await?;

        self.delete_record(&scheduling_info.key, scheduling_info.version)
            .await?;
        let Some(run_info) = run_info else {
            warn!(process_guid, "removed desired lrp without run info");
            return Err(Error::ResourceNotFound {
                key: keys::run_info_key(process_guid),
            });
        };
        match self.delete_record(&run_info.key, run_info.version).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }
        info!(process_guid, "removed desired lrp");
        Ok(DesiredLrp::from_parts(scheduling_info.value, run_info.value))
    }
}
