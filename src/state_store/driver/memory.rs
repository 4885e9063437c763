use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use anyhow::anyhow;
use async_trait::async_trait;
use bbs_utils::clock::Clock;
use bytes::Bytes;
use tracing::trace;

use super::{in_subtree, ttl_deadline_ms, Entry, Error, Version, VersionedStore};

#[derive(Debug, Clone)]
struct Node {
    value: Bytes,
    version: Version,
    /// Milliseconds since the Unix Epoch, 0 when the node never expires.
    expires_at_ms: u64,
}

impl Node {
    fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms != 0 && now_ms >= self.expires_at_ms
    }
}

#[derive(Debug, Default)]
struct Tree {
    nodes: BTreeMap<String, Node>,
    /// Global modification index, the source of every version.
    index: u64,
}

impl Tree {
    fn next_version(&mut self) -> Version {
        self.index += 1;
        Version(self.index)
    }

    /// Looks up a live node, dropping it if its TTL has run out.
    fn live(&mut self, key: &str, now_ms: u64) -> Option<&Node> {
        if self.nodes.get(key).is_some_and(|node| node.is_expired(now_ms)) {
            trace!(key, "expiring node");
            self.nodes.remove(key);
        }
        self.nodes.get(key)
    }

    fn purge_expired(&mut self, now_ms: u64) {
        self.nodes.retain(|_, node| !node.is_expired(now_ms));
    }
}

/// An etcd-style tree store held in memory.
///
/// Every write takes the next value of a single modification index, which
/// makes versions unique across keys and monotonic per key, including
/// across delete and recreate.
#[derive(Debug, Clone)]
pub struct InMemoryDriver {
    tree: Arc<Mutex<Tree>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryDriver {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            tree: Arc::new(Mutex::new(Tree::default())),
            clock,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tree>, Error> {
        self.tree.lock().map_err(|_| Error::Internal {
            source: anyhow!("in-memory store lock poisoned"),
        })
    }
}

#[async_trait]
impl VersionedStore for InMemoryDriver {
    async fn get(&self, key: &str) -> Result<Entry, Error> {
        let now_ms = self.clock.now_ms();
        let mut tree = self.lock()?;
        let node = tree.live(key, now_ms).ok_or_else(|| Error::KeyNotFound {
            key: key.to_string(),
        })?;
        Ok(Entry {
            key: key.to_string(),
            value: node.value.clone(),
            version: node.version,
        })
    }

    async fn get_tree(&self, prefix: &str) -> Result<Vec<Entry>, Error> {
        let now_ms = self.clock.now_ms();
        let mut tree = self.lock()?;
        tree.purge_expired(now_ms);

        let start = prefix.trim_end_matches('/').to_string();
        Ok(tree
            .nodes
            .range(start..)
            .take_while(|(key, _)| key.starts_with(prefix.trim_end_matches('/')))
            .filter(|(key, _)| in_subtree(key, prefix))
            .map(|(key, node)| Entry {
                key: key.clone(),
                value: node.value.clone(),
                version: node.version,
            })
            .collect())
    }

    async fn create(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> Result<Version, Error> {
        let now_ms = self.clock.now_ms();
        let mut tree = self.lock()?;
        if tree.live(key, now_ms).is_some() {
            return Err(Error::KeyExists {
                key: key.to_string(),
            });
        }
        let version = tree.next_version();
        tree.nodes.insert(
            key.to_string(),
            Node {
                value,
                version,
                expires_at_ms: ttl_deadline_ms(now_ms, ttl),
            },
        );
        Ok(version)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
        expected: Version,
    ) -> Result<Version, Error> {
        let now_ms = self.clock.now_ms();
        let mut tree = self.lock()?;
        let actual = tree
            .live(key, now_ms)
            .map(|node| node.version)
            .ok_or_else(|| Error::KeyNotFound {
                key: key.to_string(),
            })?;
        if actual != expected {
            return Err(Error::VersionMismatch {
                key: key.to_string(),
                expected,
                actual,
            });
        }
        let version = tree.next_version();
        tree.nodes.insert(
            key.to_string(),
            Node {
                value,
                version,
                expires_at_ms: ttl_deadline_ms(now_ms, ttl),
            },
        );
        Ok(version)
    }

    async fn compare_and_delete(&self, key: &str, expected: Version) -> Result<(), Error> {
        let now_ms = self.clock.now_ms();
        let mut tree = self.lock()?;
        let actual = tree
            .live(key, now_ms)
            .map(|node| node.version)
            .ok_or_else(|| Error::KeyNotFound {
                key: key.to_string(),
            })?;
        if actual != expected {
            return Err(Error::VersionMismatch {
                key: key.to_string(),
                expected,
                actual,
            });
        }
        tree.nodes.remove(key);
        tree.next_version();
        Ok(())
    }

    async fn delete(&self, key: &str, recursive: bool) -> Result<(), Error> {
        let now_ms = self.clock.now_ms();
        let mut tree = self.lock()?;
        tree.purge_expired(now_ms);

        let doomed: Vec<String> = if recursive {
            tree.nodes
                .keys()
                .filter(|k| in_subtree(k, key))
                .cloned()
                .collect()
        } else if tree.nodes.contains_key(key) {
            vec![key.to_string()]
        } else {
            vec![]
        };

        if doomed.is_empty() {
            return Err(Error::KeyNotFound {
                key: key.to_string(),
            });
        }
        for k in doomed {
            tree.nodes.remove(&k);
        }
        tree.next_version();
        Ok(())
    }
}
