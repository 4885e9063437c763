//! Outbound collaborators: the scheduling service and the cells.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::data_model::{ActualLrpInstanceKey, ActualLrpKey, LrpStartRequest, Task};

pub mod http;

/// Batch submission to the scheduling service. Callers log failures and
/// rely on the next convergence pass instead of retrying.
#[async_trait]
pub trait AuctioneerClient: Send + Sync {
    async fn request_lrp_starts(&self, starts: Vec<LrpStartRequest>) -> Result<()>;

    async fn request_task_auctions(&self, tasks: Vec<Task>) -> Result<()>;
}

#[async_trait]
pub trait CellClient: Send + Sync {
    async fn stop_lrp_instance(&self, key: &ActualLrpKey, instance_key: &ActualLrpInstanceKey) -> Result<()>;

    async fn cancel_task(&self, task_guid: &str) -> Result<()>;
}

/// Builds a client for the cell listening at `rep_address`.
pub trait CellClientFactory: Send + Sync {
    fn create_client(&self, rep_address: &str) -> Result<Arc<dyn CellClient>>;
}
