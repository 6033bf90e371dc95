//! Retry policy for failed change events.
//!
//! Exponential backoff with ±25% jitter, capped by a maximum delay and a
//! maximum attempt count. Not-found and permission errors never retry.

use std::time::Duration;

use rand::Rng;

use crate::error::IndexErr;

/// Jitter band applied to each computed delay.
const JITTER_FRACTION: f64 = 0.25;

/// Backoff schedule.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// Whether a failed event may be retried again.
    ///
    /// Exhausted budgets and permanent filesystem errors stop retrying.
    pub fn should_retry(&self, error: &IndexErr, attempts_so_far: u32) -> bool {
        if attempts_so_far >= self.max_attempts {
            return false;
        }
        !matches!(
            error,
            IndexErr::FileNotFound { .. } | IndexErr::PermissionDenied { .. }
        )
    }

    /// Delay before retry number `attempt` (0-based), with jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_millis() as f64 * self.backoff_factor.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_millis() as f64);
        let jitter = rand::rng().random_range(1.0 - JITTER_FRACTION..=1.0 + JITTER_FRACTION);
        Duration::from_millis((capped * jitter) as u64)
    }

    /// Deterministic delay without jitter (for tests and reporting).
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_millis() as f64 * self.backoff_factor.powi(attempt as i32);
        Duration::from_millis(base.min(self.max_delay.as_millis() as f64) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_backoff_doubles_until_cap() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
            max_delay: Duration::from_millis(500),
            max_attempts: 5,
        };
        assert_eq!(policy.base_delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.base_delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.base_delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.base_delay_for(3), Duration::from_millis(500), "capped");
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let policy = RetryPolicy::default();
        for attempt in 0..4 {
            let base = policy.base_delay_for(attempt).as_millis() as f64;
            for _ in 0..20 {
                let jittered = policy.delay_for(attempt).as_millis() as f64;
                assert!(jittered >= base * 0.74, "{jittered} below band at {base}");
                assert!(jittered <= base * 1.26, "{jittered} above band at {base}");
            }
        }
    }

    #[test]
    fn test_attempt_budget() {
        let policy = RetryPolicy::default();
        let transient = IndexErr::Watcher {
            cause: "busy".to_string(),
        };
        assert!(policy.should_retry(&transient, 0));
        assert!(policy.should_retry(&transient, 2));
        assert!(!policy.should_retry(&transient, 3));
    }

    #[test]
    fn test_permanent_errors_never_retry() {
        let policy = RetryPolicy::default();
        let not_found = IndexErr::FileNotFound {
            path: PathBuf::from("gone.ts"),
        };
        let denied = IndexErr::PermissionDenied {
            path: PathBuf::from("secret.ts"),
        };
        assert!(!policy.should_retry(&not_found, 0));
        assert!(!policy.should_retry(&denied, 0));
    }
}
