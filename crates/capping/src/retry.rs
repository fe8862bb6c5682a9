//! Backoff for conditional-write retries.

use rand::Rng;
use std::time::Duration;

/// How many times a conflicting conditional write is retried, and how long
/// to wait between attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry (default: 5ms).
    pub initial_delay: Duration,
    /// Maximum delay between retries (default: 250ms).
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each retry (default: 2.0).
    pub backoff_factor: f64,
    /// Random jitter range as a fraction of the delay (default: 0.25 = ±25%).
    pub jitter_percent: f64,
    /// Total attempts, including the first one (default: 16).
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(250),
            backoff_factor: 2.0,
            jitter_percent: 0.25,
            max_attempts: 16,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(
        initial_delay: Duration,
        max_delay: Duration,
        backoff_factor: f64,
        jitter_percent: f64,
        max_attempts: u32,
    ) -> Self {
        Self {
            initial_delay,
            max_delay,
            backoff_factor: backoff_factor.max(1.0),
            jitter_percent: jitter_percent.clamp(0.0, 1.0),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Delay to wait after the given failed attempt (0-indexed).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let initial_ms = u64::try_from(self.initial_delay.as_millis()).unwrap_or(u64::MAX) as f64;
        let max_ms = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX) as f64;

        // 2^31 of anything is already past any sane max_delay
        let exp = attempt.min(31) as i32;
        let base_ms = (initial_ms * self.backoff_factor.powi(exp)).min(max_ms);

        let jitter = if self.jitter_percent > 0.0 && base_ms > 0.0 {
            let range = base_ms * self.jitter_percent;
            rand::rng().random_range(-range..=range)
        } else {
            0.0
        };

        Duration::from_millis((base_ms + jitter).max(0.0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_and_cap() {
        let policy = RetryPolicy::new(
            Duration::from_millis(10),
            Duration::from_millis(50),
            2.0,
            0.0,
            5,
        );
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(10));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(20));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(40));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(50));
        assert_eq!(policy.delay_for_attempt(400), Duration::from_millis(50));
    }

    #[test]
    fn jitter_stays_in_range() {
        let policy = RetryPolicy::new(
            Duration::from_millis(100),
            Duration::from_secs(1),
            2.0,
            0.25,
            3,
        );
        for _ in 0..100 {
            let delay = policy.delay_for_attempt(0);
            assert!(delay >= Duration::from_millis(75), "{delay:?}");
            assert!(delay <= Duration::from_millis(125), "{delay:?}");
        }
    }

    #[test]
    fn new_clamps_inputs() {
        let policy = RetryPolicy::new(Duration::ZERO, Duration::ZERO, 0.5, 7.0, 0);
        assert_eq!(policy.backoff_factor, 1.0);
        assert_eq!(policy.jitter_percent, 1.0);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.delay_for_attempt(3), Duration::ZERO);
    }
}
