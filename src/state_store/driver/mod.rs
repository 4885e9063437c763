//! The driver module centralizes the logic for
//! reading and writing data in the state store.
//!
//! It defines the versioned key/value contract that every backend must
//! implement to be a compliant state store. All of the state machine and
//! convergence logic is written against `VersionedStore` only, so tree
//! walks versus range scans stay hidden behind `get` and `get_tree`.
//!
//! It also runs the same behavioural tests across drivers to ensure that
//! behaviors across drivers stay consistent.

use std::{fmt, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;

pub mod memory;
pub mod rocksdb;

/// Per-key token that increases on every write. Compare-and-swap and
/// compare-and-delete are conditioned on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Version(pub u64);

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A value read from the store, together with the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: String,
    pub value: Bytes,
    pub version: Version,
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("Key not found. key: {}", key)]
    KeyNotFound { key: String },

    #[error("Key already exists. key: {}", key)]
    KeyExists { key: String },

    #[error(
        "Failed to store record, the version didn't match. key: {}, expected: {}, actual: {}",
        key,
        expected,
        actual
    )]
    VersionMismatch {
        key: String,
        expected: Version,
        actual: Version,
    },

    #[error(transparent)]
    RocksDBFailure {
        #[from]
        source: ::rocksdb::Error,
    },

    #[error("Store failure: {}", source)]
    Internal { source: anyhow::Error },
}

impl Error {
    /// Identifies failed operations that can be
    /// retried.
    ///
    /// At the moment, only `Self::VersionMismatch` errors
    /// can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(&self, Self::VersionMismatch { .. })
    }

    /// Identifies failed operations that MUST not
    /// be retried.
    pub fn is_permanent(&self) -> bool {
        !self.is_retryable()
    }
}

/// The versioned key/value contract.
///
/// Keys are `/`-separated paths. `get_tree` returns every entry at or below
/// a prefix. A TTL of `None` (or zero) means the entry never expires;
/// expired entries behave exactly like absent ones.
#[async_trait]
pub trait VersionedStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Entry, Error>;

    async fn get_tree(&self, prefix: &str) -> Result<Vec<Entry>, Error>;

    /// Creates the key, failing with `KeyExists` if it is present.
    async fn create(&self, key: &str, value: Bytes, ttl: Option<Duration>)
        -> Result<Version, Error>;

    /// Replaces the value iff the stored version equals `expected`.
    async fn compare_and_swap(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
        expected: Version,
    ) -> Result<Version, Error>;

    /// Deletes the key iff the stored version equals `expected`.
    async fn compare_and_delete(&self, key: &str, expected: Version) -> Result<(), Error>;

    /// Deletes the key, or every key in the subtree when `recursive`.
    async fn delete(&self, key: &str, recursive: bool) -> Result<(), Error>;
}

pub(crate) fn ttl_deadline_ms(now_ms: u64, ttl: Option<Duration>) -> u64 {
    match ttl {
        Some(ttl) if !ttl.is_zero() => now_ms + ttl.as_millis() as u64,
        _ => 0,
    }
}

/// True when `key` equals `prefix` or lives below it in the tree.
pub(crate) fn in_subtree(key: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    key == prefix || (key.starts_with(prefix) && key[prefix.len()..].starts_with('/'))
}

/// Behaviour every driver has to share. Each driver's test module calls
/// these against its own instance.
#[cfg(test)]
pub(crate) mod conformance {
    use super::*;

    pub async fn create_and_get(store: &dyn VersionedStore) {
        let version = store
            .create("/v1/a/b", Bytes::from_static(b"one"), None)
            .await
            .unwrap();
        let entry = store.get("/v1/a/b").await.unwrap();
        assert_eq!(entry.value, Bytes::from_static(b"one"));
        assert_eq!(entry.version, version);

        let err = store
            .create("/v1/a/b", Bytes::from_static(b"two"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::KeyExists { .. }));

        let err = store.get("/v1/a/missing").await.unwrap_err();
        assert!(matches!(err, Error::KeyNotFound { .. }));
    }

    pub async fn compare_and_swap(store: &dyn VersionedStore) {
        let v1 = store
            .create("/v1/cas", Bytes::from_static(b"one"), None)
            .await
            .unwrap();
        let v2 = store
            .compare_and_swap("/v1/cas", Bytes::from_static(b"two"), None, v1)
            .await
            .unwrap();
        assert!(v2 > v1);

        // a second writer that read v1 loses
        let err = store
            .compare_and_swap("/v1/cas", Bytes::from_static(b"three"), None, v1)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(
            store.get("/v1/cas").await.unwrap().value,
            Bytes::from_static(b"two")
        );

        let err = store
            .compare_and_swap("/v1/missing", Bytes::from_static(b"x"), None, v1)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::KeyNotFound { .. }));
    }

    pub async fn compare_and_delete(store: &dyn VersionedStore) {
        let v1 = store
            .create("/v1/cad", Bytes::from_static(b"one"), None)
            .await
            .unwrap();
        let v2 = store
            .compare_and_swap("/v1/cad", Bytes::from_static(b"two"), None, v1)
            .await
            .unwrap();

        let err = store.compare_and_delete("/v1/cad", v1).await.unwrap_err();
        assert!(matches!(err, Error::VersionMismatch { .. }));

        store.compare_and_delete("/v1/cad", v2).await.unwrap();
        assert!(matches!(
            store.get("/v1/cad").await.unwrap_err(),
            Error::KeyNotFound { .. }
        ));
    }

    pub async fn tree_operations(store: &dyn VersionedStore) {
        for key in ["/v1/actual/p1/0/instance", "/v1/actual/p1/1/instance", "/v1/actual/p2/0/instance"] {
            store.create(key, Bytes::from_static(b"x"), None).await.unwrap();
        }
        store
            .create("/v1/actualish", Bytes::from_static(b"y"), None)
            .await
            .unwrap();

        let mut keys: Vec<String> = store
            .get_tree("/v1/actual")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.key)
            .collect();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "/v1/actual/p1/0/instance",
                "/v1/actual/p1/1/instance",
                "/v1/actual/p2/0/instance",
            ]
        );
        assert!(store.get_tree("/v1/nothing").await.unwrap().is_empty());

        store.delete("/v1/actual/p1", true).await.unwrap();
        let remaining = store.get_tree("/v1/actual").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].key, "/v1/actual/p2/0/instance");

        store.delete("/v1/actualish", false).await.unwrap();
        assert!(matches!(
            store.delete("/v1/actualish", false).await.unwrap_err(),
            Error::KeyNotFound { .. }
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_subtree() {
        assert!(in_subtree("/v1/actual/p/0", "/v1/actual"));
        assert!(in_subtree("/v1/actual/p/0", "/v1/actual/"));
        assert!(in_subtree("/v1/actual", "/v1/actual"));
        assert!(!in_subtree("/v1/actualish", "/v1/actual"));
        assert!(!in_subtree("/v1/desired", "/v1/actual"));
    }

    #[test]
    fn test_ttl_deadline() {
        assert_eq!(ttl_deadline_ms(1_000, None), 0);
        assert_eq!(ttl_deadline_ms(1_000, Some(Duration::ZERO)), 0);
        assert_eq!(ttl_deadline_ms(1_000, Some(Duration::from_secs(2))), 3_000);
    }
}
