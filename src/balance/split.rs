//! Load-driven range splitting.
//!
//! Each leader range reports an I/O load hint with a suggested split key. A
//! range qualifies for a split when it is busy (`ioDensity` above the
//! threshold) while its I/O path is still responsive (`ioLatencyNanos` below
//! the threshold): spreading such a range over two leaders adds throughput,
//! whereas a range with saturated I/O would not benefit.

use super::{local_store, BalanceCommand, DescriptorSnapshot, SplitCommand, StoreBalancer};
use crate::config::SplitBalancerConfig;
use crate::error::Result;
use crate::types::{LoadHint, RangeDescriptor, RangeState, StoreDescriptor, StoreId};
use bytes::Bytes;
use std::cmp::Ordering;
use tracing::{debug, info};

/// Write operations per second hitting the range.
pub const LOAD_TYPE_IO_DENSITY: &str = "ioDensity";
/// Latency of the range's storage I/O.
pub const LOAD_TYPE_IO_LATENCY_NANOS: &str = "ioLatencyNanos";
/// End-to-end request latency.
pub const LOAD_TYPE_AVG_LATENCY_NANOS: &str = "avgLatencyNanos";

/// Proposes splitting the hottest local leader range at its suggested key.
#[derive(Debug)]
pub struct RangeSplitBalancer {
    local_store_id: StoreId,
    config: SplitBalancerConfig,
    snapshot: DescriptorSnapshot,
}

struct Candidate<'a> {
    range: &'a RangeDescriptor,
    density: f64,
    split_key: &'a Bytes,
}

impl RangeSplitBalancer {
    /// Create a balancer for `local_store_id`.
    pub fn new(local_store_id: impl Into<StoreId>, config: SplitBalancerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            local_store_id: local_store_id.into(),
            config,
            snapshot: DescriptorSnapshot::default(),
        })
    }

    pub fn config(&self) -> &SplitBalancerConfig {
        &self.config
    }

    fn qualifies<'a>(&self, range: &'a RangeDescriptor, hint: &'a LoadHint) -> Option<Candidate<'a>> {
        let density = hint.load_or_zero(LOAD_TYPE_IO_DENSITY);
        let latency = hint.load_or_zero(LOAD_TYPE_IO_LATENCY_NANOS);

        if density <= self.config.io_density_threshold
            || latency >= self.config.io_latency_threshold_nanos
        {
            return None;
        }

        let Some(split_key) = hint.usable_split_key() else {
            debug!(range_id = %range.id, "Hot range has no split key");
            return None;
        };
        if !range.boundary.is_splittable(split_key) {
            debug!(
                range_id = %range.id,
                boundary = %range.boundary,
                "Suggested split key lies outside the range"
            );
            return None;
        }

        Some(Candidate {
            range,
            density,
            split_key,
        })
    }

    fn pick(&self, local: &StoreDescriptor) -> Option<BalanceCommand> {
        let cpu = local.cpu_usage();
        if cpu >= self.config.cpu_usage_limit {
            debug!(
                store_id = %self.local_store_id,
                cpu_usage = cpu,
                limit = self.config.cpu_usage_limit,
                "CPU usage too high, not splitting"
            );
            return None;
        }

        let hinted: Vec<(&RangeDescriptor, &LoadHint)> = local
            .leader_ranges()
            .filter(|r| r.state == RangeState::Normal)
            .filter_map(|r| r.hint(&self.config.hint_type).map(|h| (r, h)))
            .collect();

        if hinted.is_empty() {
            return None;
        }
        if hinted.len() >= self.config.max_awaiting_splits {
            debug!(
                store_id = %self.local_store_id,
                awaiting = hinted.len(),
                max = self.config.max_awaiting_splits,
                "No room for another split"
            );
            return None;
        }

        let mut candidates: Vec<Candidate<'_>> = hinted
            .into_iter()
            .filter_map(|(range, hint)| self.qualifies(range, hint))
            .collect();
        candidates.sort_by(|a, b| {
            b.density
                .partial_cmp(&a.density)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.range.id.cmp(&b.range.id))
        });

        let best = candidates.into_iter().next()?;
        info!(
            store_id = %self.local_store_id,
            range_id = %best.range.id,
            io_density = best.density,
            split_key = ?best.split_key,
            "Proposing range split"
        );
        Some(BalanceCommand::Split(SplitCommand {
            range_id: best.range.id,
            to_store: self.local_store_id.clone(),
            expected_version: best.range.version,
            split_key: best.split_key.clone(),
        }))
    }
}

impl StoreBalancer for RangeSplitBalancer {
    fn name(&self) -> &'static str {
        "range_split"
    }

    fn local_store_id(&self) -> &str {
        &self.local_store_id
    }

    fn update(&self, stores: &[StoreDescriptor]) {
        self.snapshot.replace(stores);
    }

    fn balance(&self) -> Option<BalanceCommand> {
        let stores = self.snapshot.load();
        let Some(local) = local_store(&stores, &self.local_store_id) else {
            debug!(store_id = %self.local_store_id, "No descriptor for local store");
            return None;
        };
        self.pick(local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyspace::Boundary;
    use crate::types::{RaftRole, RangeId, STAT_CPU_USAGE};

    const HINT: &str = "kv_io_mutation";

    fn balancer(max_ranges: usize, cpu_limit: f64, density: f64, latency: f64) -> RangeSplitBalancer {
        RangeSplitBalancer::new(
            "local",
            SplitBalancerConfig::default()
                .with_hint_type(HINT)
                .with_max_awaiting_splits(max_ranges)
                .with_cpu_usage_limit(cpu_limit)
                .with_io_density_threshold(density)
                .with_io_latency_threshold_nanos(latency),
        )
        .unwrap()
    }

    fn hot_range(id: u64, density: f64, latency: f64, split_key: Option<&'static str>) -> RangeDescriptor {
        let mut hint = LoadHint::new(HINT)
            .with_load(LOAD_TYPE_IO_DENSITY, density)
            .with_load(LOAD_TYPE_IO_LATENCY_NANOS, latency)
            .with_load(LOAD_TYPE_AVG_LATENCY_NANOS, 100.0);
        if let Some(key) = split_key {
            hint = hint.with_split_key(key);
        }
        RangeDescriptor::new(RangeId::new(id, 0), Boundary::FULL, RaftRole::Leader).with_hint(hint)
    }

    fn store(cpu: f64, ranges: Vec<RangeDescriptor>) -> StoreDescriptor {
        ranges
            .into_iter()
            .fold(StoreDescriptor::new("local").with_stat(STAT_CPU_USAGE, cpu), |s, r| {
                s.with_range(r)
            })
    }

    #[test]
    fn test_split_hint_preference() {
        let b = balancer(10, 0.8, 5.0, 20.0);
        b.update(&[store(0.1, vec![hot_range(1, 10.0, 15.0, Some("a"))])]);

        let Some(BalanceCommand::Split(cmd)) = b.balance() else {
            panic!("expected split");
        };
        assert_eq!(cmd.to_store, "local");
        assert_eq!(cmd.expected_version, 0);
        assert_eq!(cmd.split_key, Bytes::from_static(b"a"));
    }

    #[test]
    fn test_no_room_pauses_split() {
        let b = balancer(1, 0.8, 5.0, 20.0);
        b.update(&[store(0.1, vec![hot_range(1, 10.0, 15.0, Some("a"))])]);
        assert!(b.balance().is_none());
    }

    #[test]
    fn test_hint_without_split_key() {
        let b = balancer(10, 0.8, 5.0, 20.0);
        b.update(&[store(0.1, vec![hot_range(1, 10.0, 15.0, None)])]);
        assert!(b.balance().is_none());
    }

    #[test]
    fn test_cpu_usage_at_limit() {
        let b = balancer(10, 0.75, 5.0, 20.0);
        b.update(&[store(0.75, vec![hot_range(1, 10.0, 15.0, Some("a"))])]);
        assert!(b.balance().is_none());

        b.update(&[store(0.75, vec![])]);
        assert!(b.balance().is_none());
    }

    #[test]
    fn test_no_local_store() {
        let b = balancer(10, 0.8, 5.0, 20.0);
        assert!(b.balance().is_none());

        b.update(&[StoreDescriptor::new("other")
            .with_range(hot_range(1, 10.0, 15.0, Some("a")))]);
        assert!(b.balance().is_none());
    }

    #[test]
    fn test_thresholds() {
        let b = balancer(10, 0.8, 5.0, 20.0);

        b.update(&[store(0.1, vec![hot_range(1, 5.0, 15.0, Some("a"))])]);
        assert!(b.balance().is_none(), "density must exceed the threshold");

        b.update(&[store(0.1, vec![hot_range(1, 10.0, 20.0, Some("a"))])]);
        assert!(b.balance().is_none(), "latency must stay below the threshold");
    }

    #[test]
    fn test_hottest_range_wins() {
        let b = balancer(10, 0.8, 5.0, 20.0);
        b.update(&[store(
            0.1,
            vec![
                hot_range(1, 8.0, 10.0, Some("a")),
                hot_range(2, 30.0, 10.0, Some("b")),
                hot_range(3, 12.0, 10.0, Some("c")),
            ],
        )]);

        assert_eq!(b.balance().map(|c| c.range_id()), Some(RangeId::new(2, 0)));
    }

    #[test]
    fn test_skips_ranges_not_in_normal_state() {
        let b = balancer(10, 0.8, 5.0, 20.0);
        let busy = hot_range(1, 10.0, 15.0, Some("a")).with_state(RangeState::ConfigChanging);
        b.update(&[store(0.1, vec![busy])]);
        assert!(b.balance().is_none());
    }

    #[test]
    fn test_split_key_must_be_inside_boundary() {
        let b = balancer(10, 0.8, 5.0, 20.0);
        let mut range = hot_range(1, 10.0, 15.0, Some("a"));
        range.boundary = Boundary::range("a", "m");
        b.update(&[store(0.1, vec![range.clone()])]);
        assert!(b.balance().is_none(), "split key on the start edge");

        range.boundary = Boundary::from_start("b");
        b.update(&[store(0.1, vec![range])]);
        assert!(b.balance().is_none(), "split key before the range");
    }

    #[test]
    fn test_followers_are_not_split() {
        let b = balancer(10, 0.8, 5.0, 20.0);
        let mut range = hot_range(1, 10.0, 15.0, Some("a"));
        range.role = RaftRole::Follower;
        b.update(&[store(0.1, vec![range])]);
        assert!(b.balance().is_none());
    }
}
