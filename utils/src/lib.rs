use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub mod clock;
pub mod throttler;

/// Get the elapsed system time since the Unix Epoch in Nanoseconds
pub fn get_epoch_time_in_ns() -> u64 {
    get_epoch_time().as_nanos() as u64
}

fn get_epoch_time() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("SystemTime before UNIX EPOCH")
}

/// Elapsed time between two nanosecond timestamps, saturating at zero when
/// `earlier` is actually in the future.
pub fn elapsed_since(now_ns: u64, earlier_ns: u64) -> Duration {
    Duration::from_nanos(now_ns.saturating_sub(earlier_ns))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_since_saturates() {
        assert_eq!(elapsed_since(10, 20), Duration::ZERO);
        assert_eq!(elapsed_since(1_500_000_000, 500_000_000), Duration::from_secs(1));
    }
}
