//! Failure backoff policy.
//!
//! `delay(n) = min(base * 2^(n-1), max)` for the n-th consecutive failure.
//! Successful polls use the fixed sync interval instead.

use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before retrying after `failures` consecutive failures.
    /// `failures == 0` yields zero.
    pub fn delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let shift = (failures - 1).min(31);
        self.base
            .checked_mul(1u32 << shift)
            .map(|d| d.min(self.max))
            .unwrap_or(self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_capped() {
        let p = BackoffPolicy::new(Duration::from_millis(500), Duration::from_secs(5));
        assert_eq!(p.delay(0), Duration::ZERO);
        assert_eq!(p.delay(1), Duration::from_millis(500));
        assert_eq!(p.delay(2), Duration::from_secs(1));
        assert_eq!(p.delay(4), Duration::from_secs(4));
        assert_eq!(p.delay(5), Duration::from_secs(5));
        assert_eq!(p.delay(200), Duration::from_secs(5));
    }

    #[test]
    fn overflow_saturates_at_max() {
        let p = BackoffPolicy::new(Duration::from_secs(u64::MAX / 2), Duration::from_secs(300));
        assert_eq!(p.delay(3), Duration::from_secs(300));
    }
}
