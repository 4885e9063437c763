use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tracing::debug;
use url::Url;

use super::{AuctioneerClient, CellClient, CellClientFactory};
use crate::data_model::{ActualLrpInstanceKey, ActualLrpKey, LrpStartRequest, Task};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

fn build_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .context("failed to build http client")
}

async fn check_status(response: reqwest::Response) -> Result<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(anyhow!("request failed with status {}: {}", status, body))
}

pub struct HttpAuctioneerClient {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpAuctioneerClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url).with_context(|| format!("invalid auctioneer url {base_url}"))?;
        Ok(Self {
            client: build_client()?,
            base_url,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("invalid auctioneer path {path}"))
    }
}

#[async_trait]
impl AuctioneerClient for HttpAuctioneerClient {
    async fn request_lrp_starts(&self, starts: Vec<LrpStartRequest>) -> Result<()> {
        if starts.is_empty() {
            return Ok(());
        }
        debug!(batches = starts.len(), "requesting lrp starts");
        let response = self
            .client
            .post(self.endpoint("/v1/lrps")?)
            .json(&starts)
            .send()
            .await
            .context("failed to send lrp start requests")?;
        check_status(response).await
    }

    async fn request_task_auctions(&self, tasks: Vec<Task>) -> Result<()> {
        if tasks.is_empty() {
            return Ok(());
        }
        debug!(tasks = tasks.len(), "requesting task auctions");
        let response = self
            .client
            .post(self.endpoint("/v1/tasks")?)
            .json(&tasks)
            .send()
            .await
            .context("failed to send task auctions")?;
        check_status(response).await
    }
}

pub struct HttpCellClient {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpCellClient {
    /// Builds a URL whose path is exactly `segments`, each one
    /// percent-encoded on its own.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("cell address {} cannot take a path", self.base_url))?
            .clear()
            .extend(segments);
        Ok(url)
    }
}

#[async_trait]
impl CellClient for HttpCellClient {
    async fn stop_lrp_instance(&self, key: &ActualLrpKey, instance_key: &ActualLrpInstanceKey) -> Result<()> {
        let mut url = self.endpoint(&[
            "v1",
            "lrps",
            &key.process_guid,
            "instances",
            &instance_key.instance_guid,
            "stop",
        ])?;
        url.query_pairs_mut()
            .append_pair("index", &key.index.to_string());
        let response = self
            .client
            .post(url)
            .send()
            .await
            .with_context(|| format!("failed to stop {} on {}", key, instance_key.cell_id))?;
        check_status(response).await
    }

    async fn cancel_task(&self, task_guid: &str) -> Result<()> {
        let url = self.endpoint(&["v1", "tasks", task_guid, "cancel"])?;
        let response = self
            .client
            .post(url)
            .send()
            .await
            .with_context(|| format!("failed to cancel task {task_guid}"))?;
        check_status(response).await
    }
}

/// Creates cell clients that share one connection pool.
pub struct HttpCellClientFactory {
    client: reqwest::Client,
}

impl HttpCellClientFactory {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: build_client()?,
        })
    }
}

impl CellClientFactory for HttpCellClientFactory {
    fn create_client(&self, rep_address: &str) -> Result<Arc<dyn CellClient>> {
        let base_url = Url::parse(rep_address).with_context(|| format!("invalid cell address {rep_address}"))?;
        Ok(Arc::new(HttpCellClient {
            client: self.client.clone(),
            base_url,
        }))
    }
}
