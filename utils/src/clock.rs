use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering::Relaxed},
        Arc,
    },
    time::Duration,
};

use crate::get_epoch_time_in_ns;

/// Source of wall-clock time, in nanoseconds since the Unix Epoch.
///
/// Everything that stamps records (`since`, `created_at`) or compares ages
/// against a policy window reads time through this trait so tests can move
/// time forward deterministically.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now_ns(&self) -> u64;

    fn now_ms(&self) -> u64 {
        self.now_ns() / 1_000_000
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ns(&self) -> u64 {
        get_epoch_time_in_ns()
    }
}

/// A manually driven clock. Clones share the same time.
#[derive(Debug, Clone)]
pub struct FakeClock {
    now: Arc<AtomicU64>,
}

impl FakeClock {
    pub fn new(start_ns: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_ns)),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_nanos() as u64, Relaxed);
    }

    pub fn set(&self, ns: u64) {
        self.now.store(ns, Relaxed);
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        // 2020-01-01T00:00:00Z, far enough from zero that subtractions of
        // policy windows never underflow in tests.
        Self::new(1_577_836_800_000_000_000)
    }
}

impl Clock for FakeClock {
    fn now_ns(&self) -> u64 {
        self.now.load(Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fake_clock_is_shared_between_clones() {
        let clock = FakeClock::new(0);
        let other = clock.clone();
        clock.advance(Duration::from_secs(2));
        assert_eq!(other.now_ns(), 2_000_000_000);
        assert_eq!(other.now_ms(), 2_000);

        other.set(5);
        assert_eq!(clock.now_ns(), 5);
    }

    #[test]
    fn test_system_clock_moves_forward() {
        let clock = SystemClock;
        let a = clock.now_ns();
        let b = clock.now_ns();
        assert!(b >= a);
        assert!(a > 0);
    }
}
