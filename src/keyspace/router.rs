//! Key and boundary lookup over a resolved routing table.
//!
//! The free functions work on any [`RoutingTable`]. [`RouteCache`] keeps the
//! latest resolved [`KeySpaceView`] behind a lock-protected `Arc` so readers
//! never wait on a resolution in progress.

use super::boundary::{compare_ends, Boundary};
use super::resolver::{DescriptorsByStore, KeySpaceView, LeaderRange, RoutingTable};
use crate::types::{RangeId, StoreDescriptor};
use bytes::Bytes;
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;
use tracing::debug;

/// The leader range whose boundary contains `key`.
pub fn find_by_key<'a>(key: &[u8], table: &'a RoutingTable) -> Option<&'a LeaderRange> {
    let probe = Boundary::new(Some(Bytes::copy_from_slice(key)), None);
    table
        .range(..=probe)
        .next_back()
        .filter(|(boundary, _)| boundary.contains_key(key))
        .map(|(_, range)| range)
}

/// Every leader range whose boundary overlaps `boundary`, left to right.
///
/// Lookup follows the table's sort order:
///
/// - no start and no end: the whole table
/// - no start: every entry sorting before `[end, end)`
/// - a start: from the floor entry of `[start, start)`, kept only when it
///   reaches past `start`, up to `[end, end)` exclusive (or the table end)
pub fn find_by_boundary<'a>(boundary: &Boundary, table: &'a RoutingTable) -> Vec<&'a LeaderRange> {
    if table.is_empty() || boundary.is_empty() {
        return Vec::new();
    }

    let upper_probe = boundary
        .end_key()
        .map(|end| Boundary::range(end.clone(), end.clone()));
    let upper = match &upper_probe {
        Some(probe) => Bound::Excluded(probe),
        None => Bound::Unbounded,
    };

    let Some(start) = boundary.start_key() else {
        return table
            .range::<Boundary, _>((Bound::Unbounded, upper))
            .map(|(_, range)| range)
            .collect();
    };

    let start_probe = Boundary::range(start.clone(), start.clone());
    let floor = table.range::<Boundary, _>(..=&start_probe).next_back().map(|(k, _)| k);
    let lower = match floor {
        Some(k) if compare_ends(k.end_key(), Some(start)) == Ordering::Greater => {
            Bound::Included(k)
        }
        Some(k) => Bound::Excluded(k),
        None => Bound::Unbounded,
    };

    table
        .range::<Boundary, _>((lower, upper))
        .map(|(_, range)| range)
        .collect()
}

/// Where a single key should be sent.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingDecision {
    /// Owning range.
    pub range_id: RangeId,
    /// Store hosting the owning leader.
    pub owner_store_id: String,
    /// Whether the owner is the asking store.
    pub is_local: bool,
}

/// Keys of a batch grouped by owning range.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchRoute {
    /// Positions of the keys owned by each range.
    pub by_range: BTreeMap<RangeId, Vec<usize>>,
    /// Positions of keys falling into a gap.
    pub unrouted: Vec<usize>,
}

/// Holds the current key-space view and answers lookups against it.
#[derive(Debug, Default)]
pub struct RouteCache {
    view: RwLock<Arc<KeySpaceView>>,
}

impl RouteCache {
    /// Create an empty cache. Every key is unrouted until the first update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-resolve from store heartbeats and publish the result.
    pub fn update(&self, stores: &[StoreDescriptor]) -> Arc<KeySpaceView> {
        self.publish(KeySpaceView::from_stores(stores))
    }

    /// Re-resolve from a per-store descriptor map and publish the result.
    pub fn update_descriptors(&self, descriptors: &DescriptorsByStore) -> Arc<KeySpaceView> {
        self.publish(KeySpaceView::new(descriptors))
    }

    fn publish(&self, view: KeySpaceView) -> Arc<KeySpaceView> {
        let view = Arc::new(view);
        debug!(
            entries = view.route().len(),
            covered = view.is_fully_covered(),
            "Publishing key-space view"
        );
        *self.view.write() = Arc::clone(&view);
        view
    }

    /// The currently published view.
    pub fn current(&self) -> Arc<KeySpaceView> {
        Arc::clone(&self.view.read())
    }

    /// Owner of `key`, if covered.
    pub fn find_by_key(&self, key: &[u8]) -> Option<LeaderRange> {
        find_by_key(key, self.current().route()).cloned()
    }

    /// Owners of every part of `boundary`.
    pub fn find_by_boundary(&self, boundary: &Boundary) -> Vec<LeaderRange> {
        find_by_boundary(boundary, self.current().route())
            .into_iter()
            .cloned()
            .collect()
    }

    /// Uncovered intervals of the current view.
    pub fn gaps(&self) -> Vec<Boundary> {
        self.current().gaps().to_vec()
    }

    /// Whether the current view covers every key.
    pub fn is_fully_covered(&self) -> bool {
        self.current().is_fully_covered()
    }

    /// Routing decision for one key.
    pub fn decide(&self, key: &[u8], local_store_id: &str) -> Option<RoutingDecision> {
        let view = self.current();
        find_by_key(key, view.route()).map(|owner| RoutingDecision {
            range_id: owner.descriptor.id,
            owner_store_id: owner.owner_store_id.clone(),
            is_local: owner.owner_store_id == local_store_id,
        })
    }

    /// Group a batch of keys by owning range against one consistent view.
    pub fn route_batch(&self, keys: &[&[u8]]) -> BatchRoute {
        let view = self.current();
        let mut batch = BatchRoute::default();
        for (idx, key) in keys.iter().enumerate() {
            match find_by_key(key, view.route()) {
                Some(owner) => batch
                    .by_range
                    .entry(owner.descriptor.id)
                    .or_default()
                    .push(idx),
                None => batch.unrouted.push(idx),
            }
        }
        batch
    }
}
