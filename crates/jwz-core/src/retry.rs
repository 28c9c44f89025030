//! Busy-retry policy for transaction boundary statements.
//!
//! `BEGIN IMMEDIATE` and `COMMIT` are the only statements the store retries
//! on SQLITE_BUSY; everything else inside a transaction surfaces contention
//! immediately so the whole transaction can be rolled back. The policy is a
//! plain value so tests can swap in a deterministic, sleepless variant.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Retry budget and back-off bounds for boundary statements.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts before giving up with `DatabaseBusy`.
    pub max_attempts: u32,

    /// Lower bound of the uniform random back-off, in milliseconds.
    pub backoff_min_ms: u64,

    /// Upper bound of the uniform random back-off, in milliseconds.
    pub backoff_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 50,
            backoff_min_ms: 50,
            backoff_max_ms: 500,
        }
    }
}

impl RetryPolicy {
    /// A policy that retries `max_attempts` times with no sleep at all.
    /// For tests that provoke contention deliberately.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff_min_ms: 0,
            backoff_max_ms: 0,
        }
    }

    /// Draw one back-off duration, uniform in `[backoff_min_ms, backoff_max_ms]`.
    pub fn backoff(&self) -> Duration {
        if self.backoff_max_ms <= self.backoff_min_ms {
            return Duration::from_millis(self.backoff_min_ms);
        }
        let ms = rand::thread_rng().gen_range(self.backoff_min_ms..=self.backoff_max_ms);
        Duration::from_millis(ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_contract() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 50);
        assert_eq!(policy.backoff_min_ms, 50);
        assert_eq!(policy.backoff_max_ms, 500);
    }

    #[test]
    fn backoff_stays_in_bounds() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            let d = policy.backoff();
            assert!(d >= Duration::from_millis(50));
            assert!(d <= Duration::from_millis(500));
        }
    }

    #[test]
    fn immediate_policy_never_sleeps() {
        let policy = RetryPolicy::immediate(3);
        assert_eq!(policy.backoff(), Duration::ZERO);
        assert_eq!(policy.max_attempts, 3);
    }
}
