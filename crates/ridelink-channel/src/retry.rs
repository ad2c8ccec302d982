//! Reconnect backoff policy.
//!
//! Exponential backoff with jitter, shared by every reconnect loop in the
//! channel layer.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Reconnect attempts allowed after the initial connect.
    pub max_retries: u32,
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Ceiling for the backoff curve.
    pub max_delay: Duration,
    /// Growth factor between consecutive attempts.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 8,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Policy that never reconnects.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Delay before the given attempt, 0-indexed. Attempt 0 is the initial
    /// connect and waits nothing; later attempts back off exponentially with
    /// ±10% jitter, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);

        let jitter = 1.0 + (rand_jitter() * 0.2 - 0.1);
        let delay_secs = (base_delay * jitter).min(self.max_delay.as_secs_f64());

        Duration::from_secs_f64(delay_secs)
    }

    /// Whether another attempt fits in the budget after `attempt` failures.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

/// Pseudo-random jitter in 0.0..=1.0, good enough to spread reconnect storms.
fn rand_jitter() -> f64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    use std::time::SystemTime;

    let mut hasher = DefaultHasher::new();
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
        .hash(&mut hasher);

    let hash = hasher.finish();
    (hash as f64) / (u64::MAX as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_allows_a_bounded_burst() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 8);
        assert_eq!(policy.initial_delay, Duration::from_millis(500));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
        assert_eq!(policy.multiplier, 2.0);
    }

    #[test]
    fn no_retry_policy_refuses_the_first_reconnect() {
        let policy = RetryPolicy::no_retry();
        assert!(!policy.should_retry(0));
    }

    #[test]
    fn delays_grow_until_the_cap() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);

        let first = policy.delay_for_attempt(1);
        let second = policy.delay_for_attempt(2);
        let third = policy.delay_for_attempt(3);

        assert!(first.as_millis() >= 400 && first.as_millis() <= 600);
        assert!(second > first / 2);
        assert!(third > second / 2);
    }

    #[test]
    fn backoff_is_capped_at_max_delay() {
        let policy = RetryPolicy::default()
            .with_initial_delay(Duration::from_secs(10))
            .with_max_delay(Duration::from_secs(15));

        assert!(policy.delay_for_attempt(10) <= Duration::from_secs(17));
    }

    #[test]
    fn budget_is_exclusive_of_max_retries() {
        let policy = RetryPolicy::default().with_max_retries(3);

        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!policy.should_retry(4));
    }
}
