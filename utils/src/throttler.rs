use std::future::Future;

use futures::{stream, StreamExt};
use tracing::trace;

/// Default number of units of work allowed in flight at once.
pub const DEFAULT_MAX_WORKERS: usize = 20;

/// Runs independent units of work with a fixed upper bound on concurrency.
///
/// Work is handed over as closures and only turned into a future when a
/// worker slot frees up, so a queue of tens of thousands of store
/// operations never has more than `max_workers` of them touching the store
/// at the same time. Results are returned in completion order.
#[derive(Debug, Clone, Copy)]
pub struct Throttler {
    max_workers: usize,
}

impl Throttler {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub async fn run<I, F, Fut, T>(&self, works: I) -> Vec<T>
    where
        I: IntoIterator<Item = F>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let works = works.into_iter();
        trace!(
            max_workers = self.max_workers,
            queued = works.size_hint().0,
            "running throttled work"
        );
        stream::iter(works)
            .map(|work| work())
            .buffer_unordered(self.max_workers)
            .collect()
            .await
    }
}

impl Default for Throttler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_WORKERS)
    }
}
