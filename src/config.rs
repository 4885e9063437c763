use std::{path::PathBuf, time::Duration};

use anyhow::{anyhow, Result};
use figment::{
    providers::{Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::{
    cells::DEFAULT_CELL_PRESENCE_TTL,
    data_model::RestartPolicy,
    events::{DEFAULT_MAX_SUBSCRIBERS, DEFAULT_QUEUE_SIZE},
    processor::{lrp_convergence::DEFAULT_STALE_UNCLAIMED, retirer::DEFAULT_RETIRE_MAX_ATTEMPTS},
    state_store::{convergence::TaskConvergencePolicy, StateStoreOptions},
};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "driver", rename_all = "snake_case")]
pub enum StateStoreConfig {
    #[default]
    InMemory,
    Rocksdb { path: PathBuf },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConvergenceConfig {
    pub interval_secs: u64,
    pub workers: usize,
    pub stale_unclaimed_secs: u64,
    pub kick_task_secs: u64,
    pub expire_pending_task_secs: u64,
    pub expire_completed_task_secs: u64,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        let tasks = TaskConvergencePolicy::default();
        Self {
            interval_secs: 30,
            workers: bbs_utils::throttler::DEFAULT_MAX_WORKERS,
            stale_unclaimed_secs: DEFAULT_STALE_UNCLAIMED.as_secs(),
            kick_task_secs: tasks.kick.as_secs(),
            expire_pending_task_secs: tasks.expire_pending.as_secs(),
            expire_completed_task_secs: tasks.expire_completed.as_secs(),
        }
    }
}

impl ConvergenceConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn stale_unclaimed(&self) -> Duration {
        Duration::from_secs(self.stale_unclaimed_secs)
    }

    pub fn task_policy(&self) -> TaskConvergencePolicy {
        TaskConvergencePolicy {
            kick: Duration::from_secs(self.kick_task_secs),
            expire_pending: Duration::from_secs(self.expire_pending_task_secs),
            expire_completed: Duration::from_secs(self.expire_completed_task_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RestartPolicyConfig {
    pub immediate_restarts: u32,
    pub max_restart_attempts: u32,
    pub min_backoff_secs: u64,
    pub max_backoff_secs: u64,
    pub crash_reset_secs: u64,
}

impl Default for RestartPolicyConfig {
    fn default() -> Self {
        let policy = RestartPolicy::default();
        Self {
            immediate_restarts: policy.immediate_restarts,
            max_restart_attempts: policy.max_restart_attempts,
            min_backoff_secs: policy.min_backoff_secs,
            max_backoff_secs: policy.max_backoff_secs,
            crash_reset_secs: 5 * 60,
        }
    }
}

impl RestartPolicyConfig {
    pub fn policy(&self) -> RestartPolicy {
        RestartPolicy {
            immediate_restarts: self.immediate_restarts,
            max_restart_attempts: self.max_restart_attempts,
            min_backoff_secs: self.min_backoff_secs,
            max_backoff_secs: self.max_backoff_secs,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EventHubConfig {
    pub max_subscribers: usize,
    pub queue_size: usize,
}

impl Default for EventHubConfig {
    fn default() -> Self {
        Self {
            max_subscribers: DEFAULT_MAX_SUBSCRIBERS,
            queue_size: DEFAULT_QUEUE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub state_store: StateStoreConfig,
    pub convergence: ConvergenceConfig,
    pub restart_policy: RestartPolicyConfig,
    pub retire_max_attempts: u32,
    pub cell_presence_ttl_secs: u64,
    pub auctioneer_url: String,
    pub event_hub: EventHubConfig,
    pub structured_logging: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            state_store: StateStoreConfig::default(),
            convergence: ConvergenceConfig::default(),
            restart_policy: RestartPolicyConfig::default(),
            retire_max_attempts: DEFAULT_RETIRE_MAX_ATTEMPTS,
            cell_presence_ttl_secs: DEFAULT_CELL_PRESENCE_TTL.as_secs(),
            auctioneer_url: "http://127.0.0.1:9016".to_string(),
            event_hub: EventHubConfig::default(),
            structured_logging: false,
        }
    }
}

impl ServerConfig {
    pub fn from_path(path: &str) -> Result<ServerConfig> {
        let config_str = std::fs::read_to_string(path)?;
        Self::from_yaml(&config_str)
    }

    pub fn from_yaml(config_str: &str) -> Result<ServerConfig> {
        let config: ServerConfig = Figment::new().merge(Yaml::string(config_str)).extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.convergence.workers == 0 {
            return Err(anyhow!("convergence workers must be greater than zero"));
        }
        if self.convergence.interval_secs == 0 {
            return Err(anyhow!("convergence interval must be greater than zero"));
        }
        if self.restart_policy.min_backoff_secs > self.restart_policy.max_backoff_secs {
            return Err(anyhow!(
                "min backoff {}s is greater than max backoff {}s",
                self.restart_policy.min_backoff_secs,
                self.restart_policy.max_backoff_secs
            ));
        }
        if url::Url::parse(&self.auctioneer_url).is_err() {
            return Err(anyhow!("invalid auctioneer url: {}", self.auctioneer_url));
        }
        Ok(())
    }

    pub fn state_store_options(&self) -> StateStoreOptions {
        StateStoreOptions {
            restart_policy: self.restart_policy.policy(),
            crash_reset: Duration::from_secs(self.restart_policy.crash_reset_secs),
            workers: self.convergence.workers,
        }
    }

    pub fn cell_presence_ttl(&self) -> Duration {
        Duration::from_secs(self.cell_presence_ttl_secs)
    }
}
