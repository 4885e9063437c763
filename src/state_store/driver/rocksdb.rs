use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::anyhow;
use async_trait::async_trait;
use bbs_utils::clock::Clock;
use bytes::Bytes;
use rocksdb::{Direction, IteratorMode, Options as RocksDBOptions, TransactionDB, TransactionDBOptions};
use tracing::{info, warn};

use super::{in_subtree, ttl_deadline_ms, Entry, Error, Version, VersionedStore};

const ENVELOPE_HEADER_LEN: usize = 16;

/// Options to start a connection with RocksDB.
#[derive(Debug, Clone)]
pub struct Options {
    pub path: PathBuf,
}

/// Stored layout of every value: version (u64 BE), expiry in ms since the
/// Unix Epoch (u64 BE, 0 for none), then the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Envelope {
    version: Version,
    expires_at_ms: u64,
    payload: Bytes,
}

impl Envelope {
    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(ENVELOPE_HEADER_LEN + self.payload.len());
        buf.extend_from_slice(&self.version.0.to_be_bytes());
        buf.extend_from_slice(&self.expires_at_ms.to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    fn decode(key: &[u8], raw: &[u8]) -> Result<Self, Error> {
        if raw.len() < ENVELOPE_HEADER_LEN {
            return Err(Error::Internal {
                source: anyhow!(
                    "corrupt envelope for key {}: {} bytes",
                    String::from_utf8_lossy(key),
                    raw.len()
                ),
            });
        }
        let (version, rest) = raw.split_at(8);
        let (expires_at_ms, payload) = rest.split_at(8);
        Ok(Self {
            version: Version(u64::from_be_bytes(version.try_into().map_err(|_| {
                Error::Internal {
                    source: anyhow!("corrupt envelope version"),
                }
            })?)),
            expires_at_ms: u64::from_be_bytes(expires_at_ms.try_into().map_err(|_| {
                Error::Internal {
                    source: anyhow!("corrupt envelope expiry"),
                }
            })?),
            payload: Bytes::copy_from_slice(payload),
        })
    }

    fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms != 0 && now_ms >= self.expires_at_ms
    }
}

/// Driver to connect with a RocksDB database.
///
/// Conditional writes run inside pessimistic transactions: the current
/// value is read with `get_for_update`, which locks the key until commit,
/// so the version check and the write are atomic.
pub struct RocksDBDriver {
    db: TransactionDB,
    version_seq: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl RocksDBDriver {
    /// Open a new connection with a RocksDB database.
    pub fn open(driver_options: Options, clock: Arc<dyn Clock>) -> Result<RocksDBDriver, Error> {
        let mut db_opts = RocksDBOptions::default();
        db_opts.create_if_missing(true);

        let db = TransactionDB::open(
            &db_opts,
            &TransactionDBOptions::default(),
            &driver_options.path,
        )?;

        let mut last_version = 0;
        for item in db.iterator(IteratorMode::Start) {
            let (key, value) = item?;
            let envelope = Envelope::decode(&key, &value)?;
            last_version = last_version.max(envelope.version.0);
        }
        info!(
            path = %driver_options.path.display(),
            last_version,
            "opened rocksdb state store"
        );

        Ok(RocksDBDriver {
            db,
            version_seq: AtomicU64::new(last_version),
            clock,
        })
    }

    fn next_version(&self) -> Version {
        Version(self.version_seq.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn live_envelope(
        &self,
        key: &str,
        raw: Option<Vec<u8>>,
        now_ms: u64,
    ) -> Result<Option<Envelope>, Error> {
        match raw {
            Some(raw) => {
                let envelope = Envelope::decode(key.as_bytes(), &raw)?;
                if envelope.is_expired(now_ms) {
                    Ok(None)
                } else {
                    Ok(Some(envelope))
                }
            }
            None => Ok(None),
        }
    }

    fn write(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
        expected: Option<Version>,
    ) -> Result<Version, Error> {
        let now_ms = self.clock.now_ms();
        let tx = self.db.transaction();
        let current = self.live_envelope(key, tx.get_for_update(key, true)?, now_ms)?;

        match (expected, current) {
            (None, Some(_)) => {
                return Err(Error::KeyExists {
                    key: key.to_string(),
                })
            }
            (Some(_), None) => {
                return Err(Error::KeyNotFound {
                    key: key.to_string(),
                })
            }
            (Some(expected), Some(current)) if current.version != expected => {
                return Err(Error::VersionMismatch {
                    key: key.to_string(),
                    expected,
                    actual: current.version,
                })
            }
            _ => {}
        }

        let version = self.next_version();
        let envelope = Envelope {
            version,
            expires_at_ms: ttl_deadline_ms(now_ms, ttl),
            payload: value,
        };
        tx.put(key, envelope.encode())?;
        tx.commit()?;
        Ok(version)
    }
}

#[async_trait]
impl VersionedStore for RocksDBDriver {
    async fn get(&self, key: &str) -> Result<Entry, Error> {
        let now_ms = self.clock.now_ms();
        let envelope = self
            .live_envelope(key, self.db.get(key)?, now_ms)?
            .ok_or_else(|| Error::KeyNotFound {
                key: key.to_string(),
            })?;
        Ok(Entry {
            key: key.to_string(),
            value: envelope.payload,
            version: envelope.version,
        })
    }

    async fn get_tree(&self, prefix: &str) -> Result<Vec<Entry>, Error> {
        let now_ms = self.clock.now_ms();
        let start = prefix.trim_end_matches('/');
        let mut entries = Vec::new();

        for item in self
            .db
            .iterator(IteratorMode::From(start.as_bytes(), Direction::Forward))
        {
            let (key, value) = item?;
            if !key.starts_with(start.as_bytes()) {
                break;
            }
            let key = String::from_utf8_lossy(&key).into_owned();
            if !in_subtree(&key, prefix) {
                continue;
            }
            let envelope = match Envelope::decode(key.as_bytes(), &value) {
                Ok(envelope) => envelope,
                Err(err) => {
                    warn!(key, "skipping unreadable entry: {}", err);
                    continue;
                }
            };
            if envelope.is_expired(now_ms) {
                continue;
            }
            entries.push(Entry {
                key,
                value: envelope.payload,
                version: envelope.version,
            });
        }
        Ok(entries)
    }

    async fn create(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> Result<Version, Error> {
        self.write(key, value, ttl, None)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
        expected: Version,
    ) -> Result<Version, Error> {
        self.write(key, value, ttl, Some(expected))
    }

    async fn compare_and_delete(&self, key: &str, expected: Version) -> Result<(), Error> {
        let now_ms = self.clock.now_ms();
        let tx = self.db.transaction();
        let current = self
            .live_envelope(key, tx.get_for_update(key, true)?, now_ms)?
            .ok_or_else(|| Error::KeyNotFound {
                key: key.to_string(),
            })?;
        if current.version != expected {
            return Err(Error::VersionMismatch {
                key: key.to_string(),
                expected,
                actual: current.version,
            });
        }
        tx.delete(key)?;
        tx.commit()?;
        Ok(())
    }

    async fn delete(&self, key: &str, recursive: bool) -> Result<(), Error> {
        let now_ms = self.clock.now_ms();
        let tx = self.db.transaction();

        let mut doomed = Vec::new();
        if recursive {
            let start = key.trim_end_matches('/');
            for item in tx.iterator(IteratorMode::From(start.as_bytes(), Direction::Forward)) {
                let (k, v) = item?;
                if !k.starts_with(start.as_bytes()) {
                    break;
                }
                let k = String::from_utf8_lossy(&k).into_owned();
                if in_subtree(&k, key) && !Envelope::decode(k.as_bytes(), &v)?.is_expired(now_ms) {
                    doomed.push(k);
                }
            }
        } else if self
            .live_envelope(key, tx.get_for_update(key, true)?, now_ms)?
            .is_some()
        {
            doomed.push(key.to_string());
        }

        if doomed.is_empty() {
            return Err(Error::KeyNotFound {
                key: key.to_string(),
            });
        }
        for k in &doomed {
            tx.delete(k)?;
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bbs_utils::clock::FakeClock;

    use super::*;
    use crate::state_store::driver::conformance;

    fn open(dir: &tempfile::TempDir, clock: FakeClock) -> RocksDBDriver {
        RocksDBDriver::open(
            Options {
                path: dir.path().join("state"),
            },
            Arc::new(clock),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_conformance() {
        for check in 0..4 {
            let dir = tempfile::tempdir().unwrap();
            let store = open(&dir, FakeClock::default());
            match check {
                0 => conformance::create_and_get(&store).await,
                1 => conformance::compare_and_swap(&store).await,
                2 => conformance::compare_and_delete(&store).await,
                _ => conformance::tree_operations(&store).await,
            }
        }
    }

    #[tokio::test]
    async fn test_get_tree_skips_corrupt_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir, FakeClock::default());
        store.create("/v1/a/1", Bytes::from_static(b"one"), None).await.unwrap();
        store.db.put(b"/v1/a/2", b"short").unwrap();
        store.create("/v1/a/3", Bytes::from_static(b"three"), None).await.unwrap();

        let entries = store.get_tree("/v1/a").await.unwrap();
        let keys: Vec<_> = entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["/v1/a/1", "/v1/a/3"]);
        assert!(store.get("/v1/a/2").await.is_err());
    }

    #[tokio::test]
    async fn test_version_sequence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let last = {
            let store = open(&dir, FakeClock::default());
            let v1 = store.create("/v1/a", Bytes::from_static(b"a"), None).await.unwrap();
            store
                .compare_and_swap("/v1/a", Bytes::from_static(b"b"), None, v1)
                .await
                .unwrap()
        };

        let store = open(&dir, FakeClock::default());
        let entry = store.get("/v1/a").await.unwrap();
        assert_eq!(entry.version, last);
        let next = store.create("/v1/b", Bytes::new(), None).await.unwrap();
        assert!(next > last);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let clock = FakeClock::default();
        let store = open(&dir, clock.clone());
        store
            .create("/v1/domain/d", Bytes::from_static(b"d"), Some(Duration::from_secs(10)))
            .await
            .unwrap();
        assert_eq!(store.get_tree("/v1/domain").await.unwrap().len(), 1);

        clock.advance(Duration::from_secs(10));
        assert!(store.get_tree("/v1/domain").await.unwrap().is_empty());
        assert!(matches!(
            store.get("/v1/domain/d").await.unwrap_err(),
            Error::KeyNotFound { .. }
        ));
        store
            .create("/v1/domain/d", Bytes::from_static(b"d"), None)
            .await
            .unwrap();
    }

    #[test]
    fn test_envelope_rejects_short_values() {
        assert!(Envelope::decode(b"k", b"short").is_err());
        let envelope = Envelope {
            version: Version(7),
            expires_at_ms: 9,
            payload: Bytes::from_static(b"payload"),
        };
        assert_eq!(Envelope::decode(b"k", &envelope.encode()).unwrap(), envelope);
    }
}
