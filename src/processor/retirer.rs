use tracing::{info, warn};

use super::ControllerContext;
use crate::{
    data_model::{ActualLrp, ActualLrpKey, ActualLrpState, Event},
    state_store::Error,
};

pub const DEFAULT_RETIRE_MAX_ATTEMPTS: u32 = 5;

enum RetireOutcome {
    Removed(ActualLrp),
    AlreadyGone,
}

/// Supervised removal of instance records.
///
/// Records without a live execution are deleted directly. A Claimed or
/// Running record whose cell is alive is stopped on that cell first.
pub struct ActualLrpRetirer {
    ctx: ControllerContext,
    max_attempts: u32,
}

impl ActualLrpRetirer {
    pub fn new(ctx: ControllerContext, max_attempts: u32) -> Self {
        Self {
            ctx,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Retires the slot, retrying the whole sequence on failure. The last
    /// error is returned once every attempt has failed.
    pub async fn retire_actual_lrp(&self, key: &ActualLrpKey) -> Result<(), Error> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_retire(key).await {
                Ok(RetireOutcome::Removed(lrp)) => {
                    self.ctx.emit(Event::ActualLrpRemoved {
                        actual_lrp: lrp,
                        evacuating: false,
                    });
                    return Ok(());
                }
                Ok(RetireOutcome::AlreadyGone) => return Ok(()),
                Err(err) if attempt >= self.max_attempts => {
                    warn!(
                        process_guid = key.process_guid,
                        index = key.index,
                        attempt,
                        "giving up retiring actual lrp: {}",
                        err
                    );
                    return Err(err);
                }
                Err(err) => {
                    warn!(
                        process_guid = key.process_guid,
                        index = key.index,
                        attempt,
                        "failed to retire actual lrp, retrying: {}",
                        err
                    );
                }
            }
        }
    }

    async fn try_retire(&self, key: &ActualLrpKey) -> Result<RetireOutcome, Error> {
        let store = &self.ctx.store;
        let lrp = match store.actual_lrp(&key.process_guid, key.index).await {
            Ok(record) => record.value,
            Err(err) if err.is_not_found() => return Ok(RetireOutcome::AlreadyGone),
            Err(err) => return Err(err),
        };

        match lrp.state {
            ActualLrpState::Unclaimed | ActualLrpState::Crashed => {
                let removed = store
                    .remove_actual_lrp(&key.process_guid, key.index, None)
                    .await?;
                Ok(RetireOutcome::Removed(removed))
            }
            ActualLrpState::Claimed | ActualLrpState::Running => {
                let cell_id = &lrp.instance_key.cell_id;
                match self.ctx.cells.cell_by_id(cell_id).await {
                    Ok(cell) => {
                        let client = self
                            .ctx
                            .cell_clients
                            .create_client(&cell.rep_address)
                            .map_err(Error::unknown)?;
                        client
                            .stop_lrp_instance(&lrp.key, &lrp.instance_key)
                            .await
                            .map_err(Error::unknown)?;
                        info!(
                            process_guid = key.process_guid,
                            index = key.index,
                            cell_id,
                            "stopped actual lrp on cell"
                        );
                    }
                    Err(err) if err.is_not_found() => {
                        info!(
                            process_guid = key.process_guid,
                            index = key.index,
                            cell_id,
                            "cell is gone, removing actual lrp directly"
                        );
                    }
                    Err(err) => return Err(err),
                }
                let removed = store
                    .remove_actual_lrp(&key.process_guid, key.index, Some(&lrp.instance_key))
                    .await?;
                Ok(RetireOutcome::Removed(removed))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{data_model::test_objects::tests::TEST_DOMAIN, testing::TestHarness};

    #[tokio::test]
    async fn test_retire_unclaimed_deletes_directly() {
        let h = TestHarness::new();
        let key = ActualLrpKey::new("p", 0, TEST_DOMAIN);
        h.store.create_unclaimed_actual_lrp(&key).await.unwrap();

        h.retirer.retire_actual_lrp(&key).await.unwrap();
        assert!(h.store.actual_lrp("p", 0).await.unwrap_err().is_not_found());
        assert!(h.cell_clients.stops().is_empty());
        assert_eq!(h.emitter.event_types(), vec!["actual_lrp_removed"]);
    }

    #[tokio::test]
    async fn test_retire_running_stops_then_deletes() {
        let h = TestHarness::new();
        let key = h.running_actual_lrp("p", 0, "c1").await;

        h.retirer.retire_actual_lrp(&key).await.unwrap();
        let stops = h.cell_clients.stops();
        assert_eq!(stops.len(), 1);
        assert_eq!(stops[0].0, key);
        assert_eq!(stops[0].1.cell_id, "c1");
        assert!(h.store.actual_lrp("p", 0).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_retire_on_missing_cell_skips_stop() {
        let h = TestHarness::new();
        let key = h.running_actual_lrp("p", 0, "c-dead").await;

        h.retirer.retire_actual_lrp(&key).await.unwrap();
        assert!(h.cell_clients.stops().is_empty());
        assert!(h.store.actual_lrp("p", 0).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_retire_retries_stop_failures() {
        let h = TestHarness::new();
        let key = h.running_actual_lrp("p", 0, "c1").await;
        h.cell_clients.fail_next(2);

        h.retirer.retire_actual_lrp(&key).await.unwrap();
        assert_eq!(h.cell_clients.stop_attempts(), 3);
        assert!(h.store.actual_lrp("p", 0).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_retire_surfaces_last_error() {
        let h = TestHarness::new();
        let key = h.running_actual_lrp("p", 0, "c1").await;
        h.cell_clients.fail_next(DEFAULT_RETIRE_MAX_ATTEMPTS);

        let err = h.retirer.retire_actual_lrp(&key).await.unwrap_err();
        assert!(matches!(err, Error::Unknown { .. }));
        assert_eq!(h.cell_clients.stop_attempts(), DEFAULT_RETIRE_MAX_ATTEMPTS);
        let lrp = h.store.actual_lrp("p", 0).await.unwrap().value;
        assert_eq!(lrp.state, ActualLrpState::Running);
    }

    #[tokio::test]
    async fn test_retire_absent_slot_is_ok() {
        let h = TestHarness::new();
        h.retirer
            .retire_actual_lrp(&ActualLrpKey::new("none", 0, TEST_DOMAIN))
            .await
            .unwrap();
        assert!(h.emitter.events().is_empty());
    }
}
