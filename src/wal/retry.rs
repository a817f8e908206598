//! Delay policies between apply retries.

use crate::config::{BackoffConfig, WalSubscriptionConfig};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

/// Decides how long to wait before retrying a failed apply.
pub trait RetryPolicy: Send + Sync + Debug {
    /// Delay before the next attempt after `failures` consecutive failures (>= 1).
    fn delay(&self, failures: u32) -> Duration;
}

/// Retry at once, forever.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateRetry;

impl RetryPolicy for ImmediateRetry {
    fn delay(&self, _failures: u32) -> Duration {
        Duration::ZERO
    }
}

/// Exponentially growing delay, capped at `max`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            initial,
            max,
            multiplier,
        }
    }
}

impl From<&BackoffConfig> for ExponentialBackoff {
    fn from(config: &BackoffConfig) -> Self {
        Self::new(config.initial, config.max, config.multiplier)
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(64) as i32;
        let nanos = self.initial.as_nanos() as f64 * self.multiplier.powi(exponent);
        if !nanos.is_finite() || nanos >= self.max.as_nanos() as f64 {
            return self.max;
        }
        Duration::from_nanos(nanos as u64)
    }
}

/// The retry policy described by a subscription config.
pub fn policy_for(config: &WalSubscriptionConfig) -> Arc<dyn RetryPolicy> {
    match &config.apply_backoff {
        Some(backoff) => Arc::new(ExponentialBackoff::from(backoff)),
        None => Arc::new(ImmediateRetry),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_immediate_retry() {
        assert_eq!(ImmediateRetry.delay(1), Duration::ZERO);
        assert_eq!(ImmediateRetry.delay(1_000), Duration::ZERO);
    }

    #[test]
    fn test_exponential_backoff_grows_and_caps() {
        let policy = ExponentialBackoff::new(
            Duration::from_millis(10),
            Duration::from_millis(100),
            2.0,
        );
        assert_eq!(policy.delay(1), Duration::from_millis(10));
        assert_eq!(policy.delay(2), Duration::from_millis(20));
        assert_eq!(policy.delay(3), Duration::from_millis(40));
        assert_eq!(policy.delay(5), Duration::from_millis(100));
        assert_eq!(policy.delay(u32::MAX), Duration::from_millis(100));
    }

    #[test]
    fn test_policy_for_config() {
        let immediate = policy_for(&WalSubscriptionConfig::default());
        assert_eq!(immediate.delay(3), Duration::ZERO);

        let backoff = policy_for(
            &WalSubscriptionConfig::default().with_apply_backoff(BackoffConfig::default()),
        );
        assert_eq!(backoff.delay(1), Duration::from_millis(10));
    }
}
