//! Core types shared by the WAL pipeline, the key-space resolver and the balancers.

use crate::keyspace::Boundary;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Identifier of a store (one process hosting many range replicas).
pub type StoreId = String;

/// Store statistic carrying the CPU usage ratio in `[0.0, 1.0]`.
pub const STAT_CPU_USAGE: &str = "cpu.usage";

/// Identity of a range.
///
/// `id` is the monotonically assigned shard number; `epoch` increments when a
/// range with the same id is created again (e.g. by a bootstrap race).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RangeId {
    pub id: u64,
    pub epoch: u64,
}

impl RangeId {
    /// Create a new range id.
    pub const fn new(id: u64, epoch: u64) -> Self {
        Self { id, epoch }
    }
}

impl fmt::Display for RangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.epoch, self.id)
    }
}

/// Raft role of the replica that reported a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RaftRole {
    Leader,
    Follower,
    Candidate,
    Learner,
}

impl fmt::Display for RaftRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RaftRole::Leader => write!(f, "leader"),
            RaftRole::Follower => write!(f, "follower"),
            RaftRole::Candidate => write!(f, "candidate"),
            RaftRole::Learner => write!(f, "learner"),
        }
    }
}

/// Lifecycle state of a range replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RangeState {
    /// Serving normally.
    #[default]
    Normal,
    /// A membership change is in progress.
    ConfigChanging,
    /// Prepared to be merged into a neighbour.
    PreparedMerging,
    /// Waiting for a neighbour to complete a merge.
    WaitingForMerge,
    /// Merged into a neighbour, no longer serving.
    Merged,
    /// Removed from the cluster.
    Removed,
    /// Data has been purged.
    Purged,
}

impl fmt::Display for RangeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RangeState::Normal => "normal",
            RangeState::ConfigChanging => "config_changing",
            RangeState::PreparedMerging => "prepared_merging",
            RangeState::WaitingForMerge => "waiting_for_merge",
            RangeState::Merged => "merged",
            RangeState::Removed => "removed",
            RangeState::Purged => "purged",
        };
        f.write_str(name)
    }
}

/// Load metrics reported by a leader replica, optionally with a suggested split point.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LoadHint {
    /// Hint type, e.g. `"kv_io_mutation"`.
    pub hint_type: String,
    /// Metric name to value.
    pub load: HashMap<String, f64>,
    /// Key at which the reporter suggests splitting.
    pub split_key: Option<Bytes>,
}

impl LoadHint {
    /// Create an empty hint of the given type.
    pub fn new(hint_type: impl Into<String>) -> Self {
        Self {
            hint_type: hint_type.into(),
            ..Default::default()
        }
    }

    /// Add a load metric.
    pub fn with_load(mut self, metric: impl Into<String>, value: f64) -> Self {
        self.load.insert(metric.into(), value);
        self
    }

    /// Set the suggested split key.
    pub fn with_split_key(mut self, key: impl Into<Bytes>) -> Self {
        self.split_key = Some(key.into());
        self
    }

    /// Get a load metric, defaulting to zero.
    pub fn load_or_zero(&self, metric: &str) -> f64 {
        self.load.get(metric).copied().unwrap_or(0.0)
    }

    /// The split key, if present and non-empty.
    pub fn usable_split_key(&self) -> Option<&Bytes> {
        self.split_key.as_ref().filter(|k| !k.is_empty())
    }
}

/// Snapshot of one range replica as reported by the store hosting it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeDescriptor {
    pub id: RangeId,
    pub boundary: Boundary,
    pub role: RaftRole,
    pub version: u64,
    pub state: RangeState,
    pub hints: Vec<LoadHint>,
}

impl RangeDescriptor {
    /// Create a descriptor for a normal-state replica with no hints.
    pub fn new(id: RangeId, boundary: Boundary, role: RaftRole) -> Self {
        Self {
            id,
            boundary,
            role,
            version: 0,
            state: RangeState::Normal,
            hints: Vec::new(),
        }
    }

    /// Set the descriptor version.
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Set the range state.
    pub fn with_state(mut self, state: RangeState) -> Self {
        self.state = state;
        self
    }

    /// Attach a load hint.
    pub fn with_hint(mut self, hint: LoadHint) -> Self {
        self.hints.push(hint);
        self
    }

    /// Whether the reporting replica is the leader.
    pub fn is_leader(&self) -> bool {
        self.role == RaftRole::Leader
    }

    /// First hint with the given type.
    pub fn hint(&self, hint_type: &str) -> Option<&LoadHint> {
        self.hints.iter().find(|h| h.hint_type == hint_type)
    }
}

/// Everything a store reports about itself in one heartbeat.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StoreDescriptor {
    pub store_id: StoreId,
    pub ranges: Vec<RangeDescriptor>,
    pub stats: HashMap<String, f64>,
}

impl StoreDescriptor {
    /// Create an empty descriptor for a store.
    pub fn new(store_id: impl Into<StoreId>) -> Self {
        Self {
            store_id: store_id.into(),
            ..Default::default()
        }
    }

    /// Add a range descriptor.
    pub fn with_range(mut self, range: RangeDescriptor) -> Self {
        self.ranges.push(range);
        self
    }

    /// Set a store statistic.
    pub fn with_stat(mut self, name: impl Into<String>, value: f64) -> Self {
        self.stats.insert(name.into(), value);
        self
    }

    /// CPU usage ratio; zero when not reported.
    pub fn cpu_usage(&self) -> f64 {
        self.stats.get(STAT_CPU_USAGE).copied().unwrap_or(0.0)
    }

    /// Ranges on this store whose replica is the leader.
    pub fn leader_ranges(&self) -> impl Iterator<Item = &RangeDescriptor> {
        self.ranges.iter().filter(|r| r.is_leader())
    }
}

/// A committed log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub index: u64,
    pub term: u64,
    pub data: Bytes,
}

impl LogEntry {
    /// Create an entry.
    pub fn new(index: u64, term: u64, data: impl Into<Bytes>) -> Self {
        Self {
            index,
            term,
            data: data.into(),
        }
    }

    /// Approximate encoded size, used against the fetch byte budget.
    pub fn size(&self) -> u64 {
        // index + term + payload
        16 + self.data.len() as u64
    }
}

/// Descriptor of a range state-machine checkpoint transferred between replicas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub range_id: RangeId,
    pub version: u64,
    pub checkpoint_id: String,
    pub last_applied_index: u64,
    pub state: RangeState,
}

impl Snapshot {
    /// Create a snapshot descriptor in normal state.
    pub fn new(
        range_id: RangeId,
        version: u64,
        checkpoint_id: impl Into<String>,
        last_applied_index: u64,
    ) -> Self {
        Self {
            range_id,
            version,
            checkpoint_id: checkpoint_id.into(),
            last_applied_index,
            state: RangeState::Normal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_id_display_and_order() {
        let a = RangeId::new(1, 2);
        let b = RangeId::new(2, 1);
        assert_eq!(a.to_string(), "2_1");
        assert!(a < b);
    }

    #[test]
    fn test_load_hint_split_key() {
        let hint = LoadHint::new("kv_io_mutation").with_split_key(Bytes::new());
        assert!(hint.usable_split_key().is_none());

        let hint = hint.with_split_key("k").with_load("ioDensity", 3.0);
        assert_eq!(hint.usable_split_key().map(|k| k.as_ref()), Some(&b"k"[..]));
        assert_eq!(hint.load_or_zero("ioDensity"), 3.0);
        assert_eq!(hint.load_or_zero("missing"), 0.0);
    }

    #[test]
    fn test_store_descriptor_helpers() {
        let store = StoreDescriptor::new("s1")
            .with_stat(STAT_CPU_USAGE, 0.4)
            .with_range(RangeDescriptor::new(
                RangeId::new(1, 0),
                Boundary::FULL,
                RaftRole::Leader,
            ))
            .with_range(RangeDescriptor::new(
                RangeId::new(2, 0),
                Boundary::FULL,
                RaftRole::Follower,
            ));

        assert_eq!(store.cpu_usage(), 0.4);
        assert_eq!(store.leader_ranges().count(), 1);
        assert_eq!(StoreDescriptor::new("s2").cpu_usage(), 0.0);
    }
}
