//! Database operations over the versioned store.
//!
//! Every mutation is a read-modify-CAS cycle: the record is read together
//! with its version, the next record is computed, and the write is
//! conditioned on the version read. A losing concurrent writer observes
//! `Error::ResourceConflict` and the operation fails without retrying.

use std::{fmt::Debug, path::PathBuf, sync::Arc, time::Duration};

use bbs_utils::{clock::Clock, throttler::Throttler};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{info, warn};

use crate::{
    data_model::{RestartCalculator, RestartPolicy, TaskState, ValidationError},
    state_store::{
        driver::{memory::InMemoryDriver, rocksdb::RocksDBDriver, Entry, Version, VersionedStore},
        serializer::{JsonEncode, JsonEncoder},
    },
};

pub mod actual_lrps;
pub mod convergence;
pub mod desired_lrps;
pub mod domains;
pub mod driver;
pub mod evacuation;
pub mod keys;
pub mod serializer;
pub mod tasks;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("the requested resource could not be found. key: {}", key)]
    ResourceNotFound { key: String },

    #[error("the resource already exists. key: {}", key)]
    ResourceExists { key: String },

    #[error("the request conflicted with a concurrent write. key: {}", key)]
    ResourceConflict { key: String },

    #[error("invalid record: {}", source)]
    InvalidRecord {
        #[from]
        source: ValidationError,
    },

    #[error("invalid request: {}", reason)]
    InvalidRequest { reason: String },

    #[error("actual lrp {} cannot be claimed", key)]
    ActualLrpCannotBeClaimed { key: String },

    #[error("actual lrp {} cannot be started", key)]
    ActualLrpCannotBeStarted { key: String },

    #[error("actual lrp {} cannot be crashed", key)]
    ActualLrpCannotBeCrashed { key: String },

    #[error("actual lrp {} cannot be failed", key)]
    ActualLrpCannotBeFailed { key: String },

    #[error("actual lrp {} cannot be unclaimed", key)]
    ActualLrpCannotBeUnclaimed { key: String },

    #[error("actual lrp {} cannot be removed", key)]
    ActualLrpCannotBeRemoved { key: String },

    #[error("actual lrp {} cannot be stopped", key)]
    ActualLrpCannotBeStopped { key: String },

    #[error("invalid task state transition from {} to {}", from, to)]
    InvalidStateTransition { from: TaskState, to: TaskState },

    #[error("failed to decode record. key: {}, error: {}", key, source)]
    Deserialization { key: String, source: anyhow::Error },

    #[error("unknown error: {}", source)]
    Unknown { source: anyhow::Error },
}

impl Error {
    /// Only a lost CAS race is worth retrying; every other error describes
    /// a state that a retry would observe again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ResourceConflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ResourceNotFound { .. })
    }

    pub fn unknown(source: impl Into<anyhow::Error>) -> Self {
        Self::Unknown {
            source: source.into(),
        }
    }
}

impl From<driver::Error> for Error {
    fn from(err: driver::Error) -> Self {
        match err {
            driver::Error::KeyNotFound { key } => Error::ResourceNotFound { key },
            driver::Error::KeyExists { key } => Error::ResourceExists { key },
            driver::Error::VersionMismatch { key, .. } => Error::ResourceConflict { key },
            driver::Error::RocksDBFailure { source } => Error::unknown(source),
            driver::Error::Internal { source } => Error::Unknown { source },
        }
    }
}

/// A decoded record with the version it was read at.
#[derive(Debug, Clone)]
pub struct Record<T> {
    pub key: String,
    pub value: T,
    pub version: Version,
}

impl<T> Record<T> {
    pub fn into_location(self) -> (String, Version) {
        (self.key, self.version)
    }
}

#[derive(Debug, Clone)]
pub struct StateStoreOptions {
    pub restart_policy: RestartPolicy,
    /// A crash after an instance ran for longer than this resets its crash
    /// count to one.
    pub crash_reset: Duration,
    /// Size of the bounded throttle used for bulk store operations.
    pub workers: usize,
}

impl Default for StateStoreOptions {
    fn default() -> Self {
        Self {
            restart_policy: RestartPolicy::default(),
            crash_reset: Duration::from_secs(5 * 60),
            workers: bbs_utils::throttler::DEFAULT_MAX_WORKERS,
        }
    }
}

pub struct StateStore {
    driver: Arc<dyn VersionedStore>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) throttler: Throttler,
    pub(crate) restart_calculator: RestartCalculator,
    crash_reset: Duration,
}

impl StateStore {
    pub fn new(
        driver: Arc<dyn VersionedStore>,
        clock: Arc<dyn Clock>,
        options: StateStoreOptions,
    ) -> Self {
        Self {
            driver,
            clock,
            throttler: Throttler::new(options.workers),
            restart_calculator: RestartCalculator::from_policy(&options.restart_policy),
            crash_reset: options.crash_reset,
        }
    }

    pub fn in_memory(clock: Arc<dyn Clock>, options: StateStoreOptions) -> Self {
        let driver = Arc::new(InMemoryDriver::new(clock.clone()));
        Self::new(driver, clock, options)
    }

    pub fn open_rocksdb(
        path: PathBuf,
        clock: Arc<dyn Clock>,
        options: StateStoreOptions,
    ) -> Result<Self, Error> {
        std::fs::create_dir_all(&path)
            .map_err(|e| Error::unknown(anyhow::anyhow!("failed to create state store dir: {e}")))?;
        info!("opening state store database at {}", path.display());
        let driver = RocksDBDriver::open(driver::rocksdb::Options { path }, clock.clone())?;
        Ok(Self::new(Arc::new(driver), clock, options))
    }

    /// Current time in nanoseconds since the Unix Epoch.
    pub fn now(&self) -> u64 {
        self.clock.now_ns()
    }

    pub fn restart_calculator(&self) -> &RestartCalculator {
        &self.restart_calculator
    }

    pub fn throttler(&self) -> &Throttler {
        &self.throttler
    }

    fn decode<T: DeserializeOwned>(entry: &Entry) -> Result<T, Error> {
        JsonEncoder::decode(&entry.value).map_err(|source| Error::Deserialization {
            key: entry.key.clone(),
            source,
        })
    }

    pub(crate) async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Record<T>, Error> {
        let entry = self.driver.get(key).await?;
        let value = Self::decode(&entry)?;
        Ok(Record {
            key: entry.key,
            value,
            version: entry.version,
        })
    }

    /// Reads `key`, mapping an absent record to `None`.
    pub(crate) async fn read_optional<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<Record<T>>, Error> {
        match self.read(key).await {
            Ok(record) => Ok(Some(record)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Reads every record below `prefix`. Entries that fail to decode are
    /// returned separately so callers can decide whether to prune them.
    pub(crate) async fn read_tree<T: DeserializeOwned>(
        &self,
        prefix: &str,
    ) -> Result<(Vec<Record<T>>, Vec<(String, Version)>), Error> {
        let mut records = Vec::new();
        let mut malformed = Vec::new();
        for entry in self.driver.get_tree(prefix).await? {
            match Self::decode(&entry) {
                Ok(value) => records.push(Record {
                    key: entry.key,
                    value,
                    version: entry.version,
                }),
                Err(err) => {
                    warn!(key = entry.key, "found malformed record: {}", err);
                    malformed.push((entry.key, entry.version));
                }
            }
        }
        Ok((records, malformed))
    }

    pub(crate) async fn create_record<T: Serialize + Debug>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<Version, Error> {
        let bytes = JsonEncoder::encode(value).map_err(Error::unknown)?;
        Ok(self.driver.create(key, bytes, ttl).await?)
    }

    pub(crate) async fn swap_record<T: Serialize + Debug>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
        expected: Version,
    ) -> Result<Version, Error> {
        let bytes = JsonEncoder::encode(value).map_err(Error::unknown)?;
        Ok(self
            .driver
            .compare_and_swap(key, bytes, ttl, expected)
            .await?)
    }

    pub(crate) async fn delete_record(&self, key: &str, expected: Version) -> Result<(), Error> {
        Ok(self.driver.compare_and_delete(key, expected).await?)
    }

    pub(crate) async fn delete_tree(&self, key: &str) -> Result<(), Error> {
        Ok(self.driver.delete(key, true).await?)
    }

    /// Deletes malformed entries through the throttle, returning how many
    /// were removed. Entries rewritten in the meantime are left alone.
    pub(crate) async fn prune(&self, doomed: Vec<(String, Version)>) -> usize {
        let works = doomed.into_iter().map(|(key, version)| {
            move || async move {
                match self.delete_record(&key, version).await {
                    Ok(()) => true,
                    Err(err) => {
                        warn!(key, "failed to prune malformed record: {}", err);
                        false
                    }
                }
            }
        });
        self.throttler
            .run(works)
            .await
            .into_iter()
            .filter(|pruned| *pruned)
            .count()
    }
}


#[cfg(test)]
mod tests {
    use super::{test_state_store::*, *};

    #[tokio::test]
    async fn test_read_tree_separates_malformed() {
        let (store, _) = new_store();
        store
            .create_record("/v1/domain/a", &crate::data_model::Domain { name: "a".into() }, None)
            .await
            .unwrap();
        put_raw(&store, "/v1/domain/b", b"garbage").await;

        let (records, malformed) = store
            .read_tree::<crate::data_model::Domain>(keys::DOMAIN_ROOT)
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(malformed.len(), 1);
        assert_eq!(store.prune(malformed).await, 1);
        assert!(raw(&store, "/v1/domain/b").await.is_none());
    }

    #[tokio::test]
    async fn test_driver_errors_map_to_taxonomy() {
        let (store, _) = new_store();
        let err = store.read::<crate::data_model::Domain>("/v1/domain/none").await.unwrap_err();
        assert!(err.is_not_found());

        let version = store
            .create_record("/v1/domain/a", &crate::data_model::Domain { name: "a".into() }, None)
            .await
            .unwrap();
        let err = store
            .create_record("/v1/domain/a", &crate::data_model::Domain { name: "a".into() }, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ResourceExists { .. }));

        store
            .swap_record("/v1/domain/a", &crate::data_model::Domain { name: "b".into() }, None, version)
            .await
            .unwrap();
        let err = store.delete_record("/v1/domain/a", version).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
