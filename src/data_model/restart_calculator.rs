use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_IMMEDIATE_RESTARTS: u32 = 3;
pub const DEFAULT_MAX_RESTART_ATTEMPTS: u32 = 200;
pub const DEFAULT_MIN_BACKOFF: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(16 * 60);

/// Crash restart policy, as read from configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Crash counts below this restart without any delay.
    pub immediate_restarts: u32,
    /// Crash counts at or above this never restart again.
    pub max_restart_attempts: u32,
    pub min_backoff_secs: u64,
    pub max_backoff_secs: u64,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            immediate_restarts: DEFAULT_IMMEDIATE_RESTARTS,
            max_restart_attempts: DEFAULT_MAX_RESTART_ATTEMPTS,
            min_backoff_secs: DEFAULT_MIN_BACKOFF.as_secs(),
            max_backoff_secs: DEFAULT_MAX_BACKOFF.as_secs(),
        }
    }
}

/// Decides whether and when a crashed instance may be restarted.
///
/// Below `immediate_restarts` crashes an instance is always restartable. At
/// or above `max_restart_attempts` it is never restartable again. In
/// between, it becomes restartable once the time since the last crash
/// reaches `min_backoff * 2^(crash_count - immediate_restarts)`, with the
/// exponent capped so the window never exceeds `max_backoff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartCalculator {
    immediate_restarts: u32,
    max_restart_attempts: u32,
    min_backoff: Duration,
    max_backoff_exponent: u32,
}

impl RestartCalculator {
    pub fn new(
        immediate_restarts: u32,
        max_restart_attempts: u32,
        min_backoff: Duration,
        max_backoff: Duration,
    ) -> Self {
        Self {
            immediate_restarts,
            max_restart_attempts,
            min_backoff,
            max_backoff_exponent: max_backoff_exponent(min_backoff, max_backoff),
        }
    }

    pub fn from_policy(policy: &RestartPolicy) -> Self {
        Self::new(
            policy.immediate_restarts,
            policy.max_restart_attempts,
            Duration::from_secs(policy.min_backoff_secs),
            Duration::from_secs(policy.max_backoff_secs),
        )
    }

    /// How long an instance with `crash_count` crashes has to wait before
    /// it may be restarted. Non-decreasing in `crash_count`.
    pub fn backoff_window(&self, crash_count: u32) -> Duration {
        if crash_count < self.immediate_restarts {
            return Duration::ZERO;
        }
        let exponent = (crash_count - self.immediate_restarts).min(self.max_backoff_exponent);
        self.min_backoff.saturating_mul(1u32 << exponent)
    }

    pub fn should_restart(&self, crash_count: u32, since_last_crash: Duration) -> bool {
        if crash_count >= self.max_restart_attempts {
            return false;
        }
        if crash_count < self.immediate_restarts {
            return true;
        }
        since_last_crash >= self.backoff_window(crash_count)
    }

    pub fn should_restart_immediately(&self, crash_count: u32) -> bool {
        self.should_restart(crash_count, Duration::ZERO)
    }
}

impl Default for RestartCalculator {
    fn default() -> Self {
        Self::from_policy(&RestartPolicy::default())
    }
}

/// floor(log2(max / min)), capped to keep `1 << exponent` inside a u32.
fn max_backoff_exponent(min_backoff: Duration, max_backoff: Duration) -> u32 {
    let min = min_backoff.as_nanos();
    if min == 0 {
        return 0;
    }
    let ratio = max_backoff.as_nanos() / min;
    if ratio == 0 {
        return 0;
    }
    (u128::BITS - 1 - ratio.leading_zeros()).min(31)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calculator() -> RestartCalculator {
        RestartCalculator::default()
    }

    #[test]
    fn test_immediate_restarts() {
        let calc = calculator();
        for crash_count in 0..DEFAULT_IMMEDIATE_RESTARTS {
            assert!(calc.should_restart_immediately(crash_count));
            assert_eq!(calc.backoff_window(crash_count), Duration::ZERO);
        }
        assert!(!calc.should_restart_immediately(DEFAULT_IMMEDIATE_RESTARTS));
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let calc = calculator();
        assert_eq!(calc.backoff_window(3), Duration::from_secs(30));
        assert_eq!(calc.backoff_window(4), Duration::from_secs(60));
        assert_eq!(calc.backoff_window(5), Duration::from_secs(120));
        assert_eq!(calc.backoff_window(7), Duration::from_secs(480));
        // 16 minutes / 30 seconds = 32, so the exponent caps at 5
        assert_eq!(calc.backoff_window(8), Duration::from_secs(960));
        assert_eq!(calc.backoff_window(50), Duration::from_secs(960));
    }

    #[test]
    fn test_backoff_window_is_monotonic() {
        let calc = calculator();
        let mut previous = Duration::ZERO;
        for crash_count in 0..=DEFAULT_MAX_RESTART_ATTEMPTS + 10 {
            let window = calc.backoff_window(crash_count);
            assert!(window >= previous, "window shrank at crash count {crash_count}");
            assert!(window <= DEFAULT_MAX_BACKOFF);
            previous = window;
        }
    }

    #[test]
    fn test_restart_after_backoff_elapses() {
        let calc = calculator();
        assert!(!calc.should_restart(4, Duration::from_secs(59)));
        assert!(calc.should_restart(4, Duration::from_secs(60)));
    }

    #[test]
    fn test_never_restarts_past_max_attempts() {
        let calc = calculator();
        for crash_count in [DEFAULT_MAX_RESTART_ATTEMPTS, DEFAULT_MAX_RESTART_ATTEMPTS + 1, u32::MAX]
        {
            assert!(!calc.should_restart(crash_count, Duration::from_secs(u32::MAX as u64)));
        }
        assert!(calc.should_restart(
            DEFAULT_MAX_RESTART_ATTEMPTS - 1,
            Duration::from_secs(u32::MAX as u64)
        ));
    }

    #[test]
    fn test_max_attempts_below_immediate_threshold() {
        let calc = RestartCalculator::new(3, 1, Duration::from_secs(1), Duration::from_secs(4));
        assert!(calc.should_restart(0, Duration::ZERO));
        assert!(!calc.should_restart(1, Duration::ZERO));
        assert!(!calc.should_restart(2, Duration::from_secs(100)));
    }
}
