//! Metrics for WAL subscriptions and the balance controller.
//!
//! Metrics are plain atomics owned by the component they describe; nothing is
//! pushed anywhere. Callers that want to expose them scrape
//! [`WalMetrics::to_prometheus`] or [`BalanceMetrics::to_prometheus`].
//!
//! ```text
//! ┌──────────────────────────────┐   ┌──────────────────────────────┐
//! │ WalMetrics (one per range)   │   │ BalanceMetrics               │
//! │  fetches / fetch failures    │   │  evaluations                 │
//! │  applied / apply failures    │   │  commands{balancer,kind}     │
//! │  consecutive apply failures  │   │  sink rejections             │
//! │  installs / install failures │   └──────────────────────────────┘
//! │  last fetched / applied      │
//! └──────────────────────────────┘
//! ```

mod counters;
mod gauges;

pub use counters::{Counter, LabeledCounter};
pub use gauges::Gauge;

use crate::types::RangeId;
use std::fmt::{Display, Write};

pub(crate) fn write_header(out: &mut String, name: &str, help: &str, kind: &str) {
    let _ = write!(out, "# HELP {name} {help}\n# TYPE {name} {kind}\n");
}

pub(crate) fn write_sample(out: &mut String, name: &str, labels: &str, value: impl Display) {
    if labels.is_empty() {
        let _ = writeln!(out, "{name} {value}");
    } else {
        let _ = writeln!(out, "{name}{{{labels}}} {value}");
    }
}

/// Telemetry of one WAL subscription.
///
/// `consecutive_apply_failures` is the stuck-range signal: it grows while the
/// subscriber keeps rejecting the same entry and drops to zero on the next
/// successful apply or snapshot install.
#[derive(Debug)]
pub struct WalMetrics {
    range_label: String,

    /// Fetch attempts.
    pub fetches: Counter,
    /// Fetch attempts that failed for any reason.
    pub fetch_failures: Counter,
    /// Fetch attempts that hit a compacted index.
    pub compacted_reads: Counter,
    /// Entries handed to the apply queue.
    pub entries_fetched: Counter,
    /// Entries applied successfully.
    pub entries_applied: Counter,
    /// Failed apply attempts.
    pub apply_failures: Counter,
    /// Pending applies dropped by a snapshot or stop.
    pub applies_cancelled: Counter,
    /// Failed apply attempts since the last success.
    pub consecutive_apply_failures: Gauge,
    /// Snapshots installed successfully.
    pub snapshots_installed: Counter,
    /// Snapshot installs that failed or were cancelled.
    pub install_failures: Counter,
    /// Highest index fetched.
    pub last_fetched_index: Gauge,
    /// Highest index applied.
    pub last_applied_index: Gauge,
}

impl WalMetrics {
    /// Create metrics for one range.
    pub fn new(range_id: RangeId) -> Self {
        Self {
            range_label: format!("range_id=\"{range_id}\""),
            fetches: Counter::new("wal_fetches_total", "WAL fetch attempts"),
            fetch_failures: Counter::new("wal_fetch_failures_total", "Failed WAL fetches"),
            compacted_reads: Counter::new(
                "wal_compacted_reads_total",
                "WAL fetches that hit a compacted index",
            ),
            entries_fetched: Counter::new("wal_entries_fetched_total", "Entries queued for apply"),
            entries_applied: Counter::new("wal_entries_applied_total", "Entries applied"),
            apply_failures: Counter::new("wal_apply_failures_total", "Failed apply attempts"),
            applies_cancelled: Counter::new(
                "wal_applies_cancelled_total",
                "Pending applies dropped before running",
            ),
            consecutive_apply_failures: Gauge::new(
                "wal_consecutive_apply_failures",
                "Failed apply attempts since the last success",
            ),
            snapshots_installed: Counter::new(
                "wal_snapshots_installed_total",
                "Snapshots installed",
            ),
            install_failures: Counter::new(
                "wal_install_failures_total",
                "Snapshot installs that failed or were cancelled",
            ),
            last_fetched_index: Gauge::new("wal_last_fetched_index", "Highest fetched index"),
            last_applied_index: Gauge::new("wal_last_applied_index", "Highest applied index"),
        }
    }

    pub(crate) fn record_fetch(&self, entries: usize, last_fetched: u64) {
        self.fetches.inc();
        self.entries_fetched.inc_by(entries as u64);
        self.last_fetched_index.set(last_fetched as i64);
    }

    pub(crate) fn record_fetch_failure(&self, compacted: bool) {
        self.fetches.inc();
        self.fetch_failures.inc();
        if compacted {
            self.compacted_reads.inc();
        }
    }

    pub(crate) fn record_applied(&self, index: u64) {
        self.entries_applied.inc();
        self.consecutive_apply_failures.set(0);
        self.last_applied_index.set(index as i64);
    }

    /// Returns the number of consecutive failures including this one.
    pub(crate) fn record_apply_failure(&self) -> u64 {
        self.apply_failures.inc();
        self.consecutive_apply_failures.inc() as u64
    }

    pub(crate) fn record_install(&self, installed_index: Option<u64>) {
        match installed_index {
            Some(index) => {
                self.snapshots_installed.inc();
                self.consecutive_apply_failures.set(0);
                self.last_fetched_index.set(index as i64);
                self.last_applied_index.set(index as i64);
            }
            None => self.install_failures.inc(),
        }
    }

    /// Whether the range is currently stuck retrying the same entry.
    pub fn is_stalled(&self, threshold: u64) -> bool {
        threshold > 0 && self.consecutive_apply_failures.get() as u64 >= threshold
    }

    /// Render in Prometheus text format, labelled with the range id.
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();
        let labels = self.range_label.as_str();
        for counter in [
            &self.fetches,
            &self.fetch_failures,
            &self.compacted_reads,
            &self.entries_fetched,
            &self.entries_applied,
            &self.apply_failures,
            &self.applies_cancelled,
            &self.snapshots_installed,
            &self.install_failures,
        ] {
            counter.render(&mut out, labels);
        }
        for gauge in [
            &self.consecutive_apply_failures,
            &self.last_fetched_index,
            &self.last_applied_index,
        ] {
            gauge.render(&mut out, labels);
        }
        out
    }
}

/// Telemetry of the balance controller.
#[derive(Debug)]
pub struct BalanceMetrics {
    /// Evaluation rounds.
    pub evaluations: Counter,
    /// Commands produced, by balancer and command kind.
    pub commands: LabeledCounter<2>,
    /// Commands the sink refused.
    pub sink_rejections: Counter,
}

impl BalanceMetrics {
    pub fn new() -> Self {
        Self {
            evaluations: Counter::new("balance_evaluations_total", "Balance evaluation rounds"),
            commands: LabeledCounter::new(
                "balance_commands_total",
                "Balance commands produced",
                ["balancer", "kind"],
            ),
            sink_rejections: Counter::new(
                "balance_sink_rejections_total",
                "Balance commands refused by the sink",
            ),
        }
    }

    /// Render in Prometheus text format.
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();
        self.evaluations.render(&mut out, "");
        self.commands.render(&mut out);
        self.sink_rejections.render(&mut out, "");
        out
    }
}

impl Default for BalanceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wal_metrics_stall_tracking() {
        let metrics = WalMetrics::new(RangeId::new(7, 1));

        assert_eq!(metrics.record_apply_failure(), 1);
        assert_eq!(metrics.record_apply_failure(), 2);
        assert!(metrics.is_stalled(2));
        assert!(!metrics.is_stalled(0));

        metrics.record_applied(12);
        assert_eq!(metrics.consecutive_apply_failures.get(), 0);
        assert_eq!(metrics.last_applied_index.get(), 12);
        assert_eq!(metrics.apply_failures.get(), 2);
    }

    #[test]
    fn test_wal_metrics_install_resets_indexes() {
        let metrics = WalMetrics::new(RangeId::new(1, 0));
        metrics.record_fetch(3, 3);
        metrics.record_apply_failure();

        metrics.record_install(Some(40));
        assert_eq!(metrics.last_fetched_index.get(), 40);
        assert_eq!(metrics.consecutive_apply_failures.get(), 0);

        metrics.record_install(None);
        assert_eq!(metrics.install_failures.get(), 1);
        assert_eq!(metrics.snapshots_installed.get(), 1);
    }

    #[test]
    fn test_wal_prometheus_output() {
        let metrics = WalMetrics::new(RangeId::new(3, 2));
        metrics.record_fetch_failure(true);

        let output = metrics.to_prometheus();
        assert!(output.contains("# TYPE wal_fetches_total counter"));
        assert!(output.contains("wal_compacted_reads_total{range_id=\"2_3\"} 1"));
        assert!(output.contains("# TYPE wal_last_applied_index gauge"));
    }

    #[test]
    fn test_balance_prometheus_output() {
        let metrics = BalanceMetrics::new();
        metrics.evaluations.inc();
        metrics.commands.inc(["range_split", "split"]);

        let output = metrics.to_prometheus();
        assert!(output.contains("balance_evaluations_total 1"));
        assert!(output.contains("balance_commands_total{balancer=\"range_split\",kind=\"split\"} 1"));
    }
}
