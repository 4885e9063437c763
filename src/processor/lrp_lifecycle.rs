use std::sync::Arc;

use tracing::{info, warn};

use super::{ActualLrpRetirer, ControllerContext};
use crate::{
    data_model::{ActualLrpInstanceKey, ActualLrpKey, ActualLrpNetInfo, ActualLrpState, Event},
    state_store::Error,
};

/// Actual-LRP transitions requested by cells and by the scheduler.
pub struct LrpLifecycleController {
    ctx: ControllerContext,
    retirer: Arc<ActualLrpRetirer>,
}

impl LrpLifecycleController {
    pub fn new(ctx: ControllerContext, retirer: Arc<ActualLrpRetirer>) -> Self {
        Self { ctx, retirer }
    }

    pub async fn claim_actual_lrp(
        &self,
        process_guid: &str,
        index: u32,
        instance_key: &ActualLrpInstanceKey,
    ) -> Result<(), Error> {
        let (before, after) = self
            .ctx
            .store
            .claim_actual_lrp(process_guid, index, instance_key)
            .await?;
        self.ctx.emit_actual_lrp_change(before, after, false);
        Ok(())
    }

    /// Marks the slot Running. An evacuating record left behind by another
    /// instance of the slot is removed, which tells the draining cell that
    /// its replacement is up.
    pub async fn start_actual_lrp(
        &self,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
        net_info: &ActualLrpNetInfo,
    ) -> Result<(), Error> {
        let (before, after) = self
            .ctx
            .store
            .start_actual_lrp(key, instance_key, net_info)
            .await?;
        match before {
            Some(before) => self.ctx.emit_actual_lrp_change(before, after, false),
            None => self.ctx.emit(Event::ActualLrpCreated {
                actual_lrp: after,
                evacuating: false,
            }),
        }

        let evacuating = self
            .ctx
            .store
            .evacuating_actual_lrp(&key.process_guid, key.index)
            .await?;
        if let Some(evacuating) = evacuating {
            if evacuating.value.instance_key != *instance_key {
                let removed = self
                    .ctx
                    .store
                    .remove_evacuating_actual_lrp(key, &evacuating.value.instance_key)
                    .await;
                match removed {
                    Ok(Some(actual_lrp)) => self.ctx.emit(Event::ActualLrpRemoved {
                        actual_lrp,
                        evacuating: true,
                    }),
                    Ok(None) => {}
                    Err(err) => warn!(
                        process_guid = key.process_guid,
                        index = key.index,
                        "failed to remove replaced evacuating actual lrp: {}",
                        err
                    ),
                }
            }
        }
        Ok(())
    }

    /// Records the crash. A slot written back as Unclaimed is restarted
    /// right away.
    pub async fn crash_actual_lrp(
        &self,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
        crash_reason: &str,
    ) -> Result<(), Error> {
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
        Ok(())
    }

    pub async fn fail_actual_lrp(&self, key: &ActualLrpKey, placement_error: &str) -> Result<(), Error> {
        let (before, after) = self.ctx.store.fail_actual_lrp(key, placement_error).await?;
        self.ctx.emit_actual_lrp_change(before, after, false);
        Ok(())
    }

    /// Deletes the instance record without stopping anything.
    pub async fn remove_actual_lrp(
        &self,
        process_guid: &str,
        index: u32,
        instance_key: Option<&ActualLrpInstanceKey>,
    ) -> Result<(), Error> {
        let actual_lrp = self
            .ctx
            .store
            .remove_actual_lrp(process_guid, index, instance_key)
            .await?;
        self.ctx.emit(Event::ActualLrpRemoved {
            actual_lrp,
            evacuating: false,
        });
        Ok(())
    }

    pub async fn retire_actual_lrp(&self, key: &ActualLrpKey) -> Result<(), Error> {
        info!(process_guid = key.process_guid, index = key.index, "retiring actual lrp");
        self.retirer.retire_actual_lrp(key).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        data_model::test_objects::tests::{mock_desired_lrp, mock_instance_key, mock_net_info, TEST_DOMAIN},
        testing::TestHarness,
    };

    #[tokio::test]
    async fn test_claim_then_start_emits_changes() {
        let h = TestHarness::new();
        let key = ActualLrpKey::new("p", 0, TEST_DOMAIN);
        h.store.create_unclaimed_actual_lrp(&key).await.unwrap();
        let ik = mock_instance_key("i1", "c1");

        h.lifecycle.claim_actual_lrp("p", 0, &ik).await.unwrap();
        h.lifecycle.claim_actual_lrp("p", 0, &ik).await.unwrap();
        h.lifecycle
            .start_actual_lrp(&key, &ik, &mock_net_info())
            .await
            .unwrap();

        assert_eq!(
            h.emitter.event_types(),
            vec!["actual_lrp_changed", "actual_lrp_changed"]
        );
        let lrp = h.store.actual_lrp("p", 0).await.unwrap().value;
        assert_eq!(lrp.state, ActualLrpState::Running);
    }

    #[tokio::test]
    async fn test_start_without_slot_emits_created() {
        let h = TestHarness::new();
        let key = ActualLrpKey::new("p", 0, TEST_DOMAIN);
        h.lifecycle
            .start_actual_lrp(&key, &mock_instance_key("i1", "c1"), &mock_net_info())
            .await
            .unwrap();
        assert_eq!(h.emitter.event_types(), vec!["actual_lrp_created"]);
    }

    #[tokio::test]
    async fn test_start_removes_replaced_evacuating_record() {
        let h = TestHarness::new();
        let key = ActualLrpKey::new("p", 0, TEST_DOMAIN);
        let old = mock_instance_key("i-old", "c-draining");
        h.store
            .evacuate_actual_lrp(&key, &old, &mock_net_info(), Duration::from_secs(30))
            .await
            .unwrap();
        h.store.create_unclaimed_actual_lrp(&key).await.unwrap();

        let new = mock_instance_key("i-new", "c1");
        h.lifecycle.claim_actual_lrp("p", 0, &new).await.unwrap();
        h.lifecycle
            .start_actual_lrp(&key, &new, &mock_net_info())
            .await
            .unwrap();

        assert!(h.store.evacuating_actual_lrp("p", 0).await.unwrap().is_none());
        assert_eq!(h.emitter.event_types().last().unwrap(), "actual_lrp_removed");
    }

    #[tokio::test]
    async fn test_start_keeps_own_evacuating_record() {
        let h = TestHarness::new();
        let key = ActualLrpKey::new("p", 0, TEST_DOMAIN);
        let ik = mock_instance_key("i1", "c1");
        h.store
            .evacuate_actual_lrp(&key, &ik, &mock_net_info(), Duration::from_secs(30))
            .await
            .unwrap();
        h.lifecycle
            .start_actual_lrp(&key, &ik, &mock_net_info())
            .await
            .unwrap();
        assert!(h.store.evacuating_actual_lrp("p", 0).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_crash_restarts_immediately() {
        let h = TestHarness::new();
        h.store.desire_lrp(&mock_desired_lrp("p", 1)).await.unwrap();
        let key = h.running_actual_lrp("p", 0, "c1").await;
        let ik = h.store.actual_lrp("p", 0).await.unwrap().value.instance_key;

        h.lifecycle.crash_actual_lrp(&key, &ik, "oom").await.unwrap();

        let lrp = h.store.actual_lrp("p", 0).await.unwrap().value;
        assert_eq!(lrp.state, ActualLrpState::Unclaimed);
        assert_eq!(lrp.crash_count, 1);
        assert_eq!(
            h.emitter.event_types(),
            vec!["actual_lrp_changed", "actual_lrp_crashed"]
        );
        let starts = h.auctioneer.lrp_starts();
        assert_eq!(starts.len(), 1);
        assert_eq!(starts[0][0].process_guid, "p");
        assert_eq!(starts[0][0].indices, vec![0]);
    }

    #[tokio::test]
    async fn test_crash_past_immediate_restarts_waits() {
        let h = TestHarness::new();
        h.store.desire_lrp(&mock_desired_lrp("p", 1)).await.unwrap();
        let key = ActualLrpKey::new("p", 0, TEST_DOMAIN);
        h.store.create_unclaimed_actual_lrp(&key).await.unwrap();

        for i in 0..3 {
            let ik = mock_instance_key(&format!("i{i}"), "c1");
            h.lifecycle.claim_actual_lrp("p", 0, &ik).await.unwrap();
            h.lifecycle.crash_actual_lrp(&key, &ik, "boom").await.unwrap();
        }

        let lrp = h.store.actual_lrp("p", 0).await.unwrap().value;
        assert_eq!(lrp.state, ActualLrpState::Crashed);
        assert_eq!(lrp.crash_count, 3);
        assert_eq!(h.auctioneer.lrp_starts().len(), 2);
    }

    #[tokio::test]
    async fn test_crash_by_other_instance_is_rejected() {
        let h = TestHarness::new();
        let key = h.running_actual_lrp("p", 0, "c1").await;
        let err = h
            .lifecycle
            .crash_actual_lrp(&key, &mock_instance_key("other", "c2"), "boom")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ActualLrpCannotBeCrashed { .. }));
        assert!(h.emitter.events().is_empty());
    }

    #[tokio::test]
    async fn test_fail_and_remove() {
        let h = TestHarness::new();
        let key = ActualLrpKey::new("p", 0, TEST_DOMAIN);
        h.store.create_unclaimed_actual_lrp(&key).await.unwrap();

        h.lifecycle.fail_actual_lrp(&key, "insufficient resources").await.unwrap();
        let lrp = h.store.actual_lrp("p", 0).await.unwrap().value;
        assert_eq!(lrp.placement_error, "insufficient resources");

        h.lifecycle.remove_actual_lrp("p", 0, None).await.unwrap();
        assert_eq!(
            h.emitter.event_types(),
            vec!["actual_lrp_changed", "actual_lrp_removed"]
        );
    }

    #[tokio::test]
    async fn test_retire_delegates_to_retirer() {
        let h = TestHarness::new();
        let key = h.running_actual_lrp("p", 0, "c1").await;
        h.lifecycle.retire_actual_lrp(&key).await.unwrap();
        assert_eq!(h.cell_clients.stops().len(), 1);
    }
}
