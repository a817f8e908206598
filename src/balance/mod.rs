//! Store balancers and the commands they emit.
//!
//! A balancer observes the latest cluster-wide set of store descriptors and,
//! when asked, proposes at most one corrective command for the local store.
//! Balancers never execute anything themselves; the [`BalanceController`]
//! hands their proposals to a [`CommandSink`].
//!
//! ```text
//!   store descriptors ──update──► [ balancer 1, balancer 2, ... ]
//!                                        │ first Some(command)
//!                                        ▼
//!                              BalanceController ──► CommandSink
//! ```

pub mod controller;
pub mod epoch;
pub mod split;

pub use controller::{BalanceController, CommandSink};
pub use epoch::RedundantEpochRemovalBalancer;
pub use split::{
    RangeSplitBalancer, LOAD_TYPE_AVG_LATENCY_NANOS, LOAD_TYPE_IO_DENSITY,
    LOAD_TYPE_IO_LATENCY_NANOS,
};

use crate::error::{Error, Result};
use crate::types::{RangeDescriptor, RangeId, StoreDescriptor, StoreId};
use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// A decision function over the cluster descriptor snapshot.
///
/// `update` and `balance` may be called concurrently from different tasks.
pub trait StoreBalancer: Send + Sync {
    /// Short name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Store this balancer acts for.
    fn local_store_id(&self) -> &str;

    /// Replace the observed descriptor snapshot.
    fn update(&self, stores: &[StoreDescriptor]);

    /// Propose a command for the current snapshot, if one is warranted.
    fn balance(&self) -> Option<BalanceCommand>;
}

/// Split a range at a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitCommand {
    pub range_id: RangeId,
    /// Store hosting the leader that should perform the split.
    pub to_store: StoreId,
    /// Range version the split was computed against.
    pub expected_version: u64,
    pub split_key: Bytes,
}

/// Change the replica set of a range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeConfigCommand {
    pub range_id: RangeId,
    /// Store hosting the leader that should perform the change.
    pub to_store: StoreId,
    /// Range version the change was computed against.
    pub expected_version: u64,
    pub voters: BTreeSet<StoreId>,
    pub learners: BTreeSet<StoreId>,
}

impl ChangeConfigCommand {
    /// Remove every replica of `range`, driven by its leader on `store_id`.
    pub fn quit(store_id: impl Into<StoreId>, range: &RangeDescriptor) -> Self {
        Self {
            range_id: range.id,
            to_store: store_id.into(),
            expected_version: range.version,
            voters: BTreeSet::new(),
            learners: BTreeSet::new(),
        }
    }

    /// Whether the target configuration is empty.
    pub fn is_quit(&self) -> bool {
        self.voters.is_empty() && self.learners.is_empty()
    }

    /// The store giving up the range, for a quit command.
    pub fn quitting_store(&self) -> Option<&str> {
        self.is_quit().then_some(self.to_store.as_str())
    }
}

/// A command proposed by a balancer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BalanceCommand {
    Split(SplitCommand),
    ChangeConfig(ChangeConfigCommand),
}

impl BalanceCommand {
    /// Kind label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Split(_) => "split",
            Self::ChangeConfig(_) => "change_config",
        }
    }

    pub fn range_id(&self) -> RangeId {
        match self {
            Self::Split(cmd) => cmd.range_id,
            Self::ChangeConfig(cmd) => cmd.range_id,
        }
    }

    pub fn to_store(&self) -> &str {
        match self {
            Self::Split(cmd) => &cmd.to_store,
            Self::ChangeConfig(cmd) => &cmd.to_store,
        }
    }

    pub fn expected_version(&self) -> u64 {
        match self {
            Self::Split(cmd) => cmd.expected_version,
            Self::ChangeConfig(cmd) => cmd.expected_version,
        }
    }

    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(data)?)
    }
}

/// Group store descriptors by range epoch.
///
/// Each group holds, per store, only the ranges of that epoch. Stores without
/// ranges appear in no group.
pub fn organize_by_epoch(stores: &[StoreDescriptor]) -> BTreeMap<u64, Vec<StoreDescriptor>> {
    let mut by_epoch: BTreeMap<u64, BTreeMap<&str, StoreDescriptor>> = BTreeMap::new();
    for store in stores {
        for range in &store.ranges {
            by_epoch
                .entry(range.id.epoch)
                .or_default()
                .entry(store.store_id.as_str())
                .or_insert_with(|| StoreDescriptor {
                    store_id: store.store_id.clone(),
                    ranges: Vec::new(),
                    stats: store.stats.clone(),
                })
                .ranges
                .push(range.clone());
        }
    }
    by_epoch
        .into_iter()
        .map(|(epoch, stores)| (epoch, stores.into_values().collect()))
        .collect()
}

/// The descriptor reported by `store_id`, if any.
pub fn local_store<'a>(stores: &'a [StoreDescriptor], store_id: &str) -> Option<&'a StoreDescriptor> {
    stores.iter().find(|s| s.store_id == store_id)
}

/// The latest descriptor set a balancer works on, swapped wholesale on update.
#[derive(Debug, Default)]
pub(crate) struct DescriptorSnapshot {
    stores: RwLock<Arc<Vec<StoreDescriptor>>>,
}

impl DescriptorSnapshot {
    pub(crate) fn replace(&self, stores: &[StoreDescriptor]) {
        let next = Arc::new(stores.to_vec());
        *self.stores.write() = next;
    }

    pub(crate) fn load(&self) -> Arc<Vec<StoreDescriptor>> {
        Arc::clone(&self.stores.read())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyspace::Boundary;
    use crate::types::RaftRole;

    fn range(id: u64, epoch: u64) -> RangeDescriptor {
        RangeDescriptor::new(RangeId::new(id, epoch), Boundary::FULL, RaftRole::Leader)
    }

    #[test]
    fn test_organize_by_epoch() {
        let stores = vec![
            StoreDescriptor::new("s1")
                .with_range(range(1, 0))
                .with_range(range(2, 1)),
            StoreDescriptor::new("s2").with_range(range(1, 0)),
            StoreDescriptor::new("s3"),
        ];

        let grouped = organize_by_epoch(&stores);
        assert_eq!(grouped.keys().copied().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(grouped[&0].len(), 2);
        assert_eq!(grouped[&1].len(), 1);
        assert_eq!(grouped[&1][0].store_id, "s1");
        assert_eq!(grouped[&1][0].ranges.len(), 1);
    }

    #[test]
    fn test_quit_command() {
        let cmd = ChangeConfigCommand::quit("s1", &range(4, 2).with_version(7));
        assert!(cmd.is_quit());
        assert_eq!(cmd.quitting_store(), Some("s1"));
        assert_eq!(cmd.expected_version, 7);
    }

    #[test]
    fn test_command_encoding() {
        let cmd = BalanceCommand::Split(SplitCommand {
            range_id: RangeId::new(3, 1),
            to_store: "s1".into(),
            expected_version: 2,
            split_key: Bytes::from_static(b"m"),
        });

        let bytes = cmd.to_bytes().unwrap();
        assert_eq!(BalanceCommand::from_bytes(&bytes).unwrap(), cmd);
        assert_eq!(cmd.kind(), "split");
        assert!(BalanceCommand::from_bytes(&[0xff, 0xff]).is_err());
    }

    #[test]
    fn test_descriptor_snapshot_swap() {
        let snapshot = DescriptorSnapshot::default();
        let before = snapshot.load();
        snapshot.replace(&[StoreDescriptor::new("s1")]);

        assert!(before.is_empty());
        assert_eq!(snapshot.load().len(), 1);
        assert!(local_store(&snapshot.load(), "s1").is_some());
    }
}
