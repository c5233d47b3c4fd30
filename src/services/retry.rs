//! Retry budget and backoff for optimistic commits.

use std::time::Duration;

use rand::Rng;

/// Bounds for the transfer engine's optimistic retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Commit attempts before a transfer gives up with `Contention`.
    pub max_attempts: u32,

    /// Backoff ceiling after the first failed attempt.
    pub base_delay: Duration,

    /// Backoff ceiling never exceeds this.
    pub max_delay: Duration,

    /// Attempts to revert the first update of a half-applied transfer.
    pub compensation_attempts: u32,

    /// How long a request owns a pending transfer.
    pub lease: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(250),
            compensation_attempts: 20,
            lease: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff with full jitter.
    ///
    /// The ceiling doubles with each failed attempt (`attempt` starts at 1)
    /// up to `max_delay`; the actual delay is drawn uniformly from
    /// `[0, ceiling]` so that colliding transfers spread out.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt).as_micros() as u64;
        if ceiling == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(rand::rng().random_range(0..=ceiling))
    }

    fn ceiling(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::first(1, 10)]
    #[case::second(2, 20)]
    #[case::fifth(5, 160)]
    #[case::capped(6, 250)]
    #[case::huge(200, 250)]
    fn test_ceiling_doubles_until_cap(#[case] attempt: u32, #[case] expected_ms: u64) {
        let policy = RetryPolicy::default();
        assert_eq!(policy.ceiling(attempt), Duration::from_millis(expected_ms));
    }

    #[test]
    fn test_backoff_stays_within_ceiling() {
        let policy = RetryPolicy::default();
        for attempt in 1..=8 {
            for _ in 0..50 {
                assert!(policy.backoff(attempt) <= policy.ceiling(attempt));
            }
        }
    }

    #[test]
    fn test_zero_base_means_no_wait() {
        let policy = RetryPolicy {
            base_delay: Duration::ZERO,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff(3), Duration::ZERO);
    }
}
