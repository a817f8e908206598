//! Configuration types for WAL subscriptions and balancing.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default fetch budget per WAL read.
pub const DEFAULT_MAX_FETCH_BYTES: u64 = 10 * 1024 * 1024;

/// Hint type produced by the I/O load tracker.
pub const DEFAULT_SPLIT_HINT_TYPE: &str = "kv_io_mutation";

/// Configuration of a WAL subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalSubscriptionConfig {
    /// Upper bound on the bytes returned by one committed-log read.
    pub max_fetch_bytes: u64,

    /// Pause before re-running a fetch that failed with a transient error.
    /// Zero retries immediately.
    pub fetch_retry_delay: Duration,

    /// Backoff between apply retries; `None` retries immediately.
    pub apply_backoff: Option<BackoffConfig>,

    /// Consecutive apply failures after which the range is reported stalled.
    /// Zero disables the warning.
    pub apply_stall_warn_threshold: u64,
}

impl Default for WalSubscriptionConfig {
    fn default() -> Self {
        Self {
            max_fetch_bytes: DEFAULT_MAX_FETCH_BYTES,
            fetch_retry_delay: Duration::ZERO,
            apply_backoff: None,
            apply_stall_warn_threshold: 100,
        }
    }
}

impl WalSubscriptionConfig {
    /// Set the fetch byte budget.
    pub fn with_max_fetch_bytes(mut self, bytes: u64) -> Self {
        self.max_fetch_bytes = bytes;
        self
    }

    /// Set the delay before retrying a transient fetch failure.
    pub fn with_fetch_retry_delay(mut self, delay: Duration) -> Self {
        self.fetch_retry_delay = delay;
        self
    }

    /// Back off exponentially between apply retries.
    pub fn with_apply_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.apply_backoff = Some(backoff);
        self
    }

    /// Set the stalled-range warning threshold.
    pub fn with_apply_stall_warn_threshold(mut self, failures: u64) -> Self {
        self.apply_stall_warn_threshold = failures;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_fetch_bytes == 0 {
            return Err(Error::Config("max_fetch_bytes must be positive".into()));
        }
        if let Some(backoff) = &self.apply_backoff {
            backoff.validate()?;
        }
        Ok(())
    }
}

/// Exponential backoff parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub initial: Duration,
    /// Upper bound on any single delay.
    pub max: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(10),
            max: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl BackoffConfig {
    pub fn validate(&self) -> Result<()> {
        if self.multiplier < 1.0 || !self.multiplier.is_finite() {
            return Err(Error::Config(format!(
                "backoff multiplier must be >= 1.0, got {}",
                self.multiplier
            )));
        }
        if self.initial > self.max {
            return Err(Error::Config(
                "backoff initial delay exceeds max delay".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration of the load-based split balancer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitBalancerConfig {
    /// Load hint type that carries split suggestions.
    pub hint_type: String,

    /// No new split once this many local ranges are waiting on one.
    pub max_awaiting_splits: usize,

    /// No split while the local store's CPU usage is at or above this ratio.
    pub cpu_usage_limit: f64,

    /// Minimum `ioDensity` for a range to be split.
    pub io_density_threshold: f64,

    /// `ioLatencyNanos` must stay below this for a split to help.
    pub io_latency_threshold_nanos: f64,
}

impl Default for SplitBalancerConfig {
    fn default() -> Self {
        Self {
            hint_type: DEFAULT_SPLIT_HINT_TYPE.to_string(),
            max_awaiting_splits: 30,
            cpu_usage_limit: 0.8,
            io_density_threshold: 30.0,
            io_latency_threshold_nanos: 30_000.0,
        }
    }
}

impl SplitBalancerConfig {
    /// Set the hint type.
    pub fn with_hint_type(mut self, hint_type: impl Into<String>) -> Self {
        self.hint_type = hint_type.into();
        self
    }

    /// Set the awaiting-split cap.
    pub fn with_max_awaiting_splits(mut self, max: usize) -> Self {
        self.max_awaiting_splits = max;
        self
    }

    /// Set the CPU usage limit.
    pub fn with_cpu_usage_limit(mut self, limit: f64) -> Self {
        self.cpu_usage_limit = limit;
        self
    }

    /// Set the I/O density threshold.
    pub fn with_io_density_threshold(mut self, threshold: f64) -> Self {
        self.io_density_threshold = threshold;
        self
    }

    /// Set the I/O latency threshold in nanoseconds.
    pub fn with_io_latency_threshold_nanos(mut self, threshold: f64) -> Self {
        self.io_latency_threshold_nanos = threshold;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.hint_type.is_empty() {
            return Err(Error::Config("hint_type must not be empty".into()));
        }
        if !(0.0..=1.0).contains(&self.cpu_usage_limit) {
            return Err(Error::Config(format!(
                "cpu_usage_limit must be within [0, 1], got {}",
                self.cpu_usage_limit
            )));
        }
        if self.io_density_threshold < 0.0 || self.io_latency_threshold_nanos <= 0.0 {
            return Err(Error::Config("load thresholds must be positive".into()));
        }
        Ok(())
    }
}

/// Configuration of the balance control loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceControllerConfig {
    /// Pause between evaluation rounds.
    pub interval: Duration,

    /// Pause after the sink rejected a command.
    pub retry_delay: Duration,
}

impl Default for BalanceControllerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl BalanceControllerConfig {
    /// Set the evaluation interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the back-off after a rejected command.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(Error::Config("interval must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wal_config_defaults() {
        let config = WalSubscriptionConfig::default();
        assert_eq!(config.max_fetch_bytes, 10 * 1024 * 1024);
        assert_eq!(config.fetch_retry_delay, Duration::ZERO);
        assert!(config.apply_backoff.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_wal_config_validation() {
        assert!(WalSubscriptionConfig::default()
            .with_max_fetch_bytes(0)
            .validate()
            .is_err());

        let bad_backoff = BackoffConfig {
            multiplier: 0.5,
            ..Default::default()
        };
        assert!(WalSubscriptionConfig::default()
            .with_apply_backoff(bad_backoff)
            .validate()
            .is_err());
    }

    #[test]
    fn test_split_config_builder() {
        let config = SplitBalancerConfig::default()
            .with_max_awaiting_splits(10)
            .with_cpu_usage_limit(0.8)
            .with_io_density_threshold(5.0)
            .with_io_latency_threshold_nanos(20.0);

        assert_eq!(config.hint_type, "kv_io_mutation");
        assert_eq!(config.max_awaiting_splits, 10);
        assert!(config.validate().is_ok());
        assert!(config.with_cpu_usage_limit(1.5).validate().is_err());
    }

    #[test]
    fn test_controller_config_round_trips_through_bincode() {
        let config = BalanceControllerConfig::default().with_interval(Duration::from_millis(250));
        let bytes = bincode::serialize(&config).unwrap();
        let decoded: BalanceControllerConfig = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, config);
        assert!(BalanceControllerConfig::default()
            .with_interval(Duration::ZERO)
            .validate()
            .is_err());
    }
}
