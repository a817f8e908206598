//! Resolution of reported range descriptors into a routing table.
//!
//! Every store reports the ranges it hosts. Reports from different stores
//! may disagree: two replicas may both believe they lead, a split may have
//! been observed by one store and not yet by another, or a bootstrap race
//! may leave a second generation of the same range around. The resolver
//! turns that set into one ordered, non-overlapping map from boundary to the
//! leader replica that owns it.
//!
//! # Resolution rule
//!
//! Only leader replicas are candidates. The resolver sweeps the candidates
//! left to right by start key and accepts a candidate only when it does not
//! overlap the boundary accepted before it. Among candidates starting at the
//! same key the lowest range id goes first, so it wins that start; equal ids
//! are ranked by epoch, then by the highest version, then by end key and
//! store id, which makes the result independent of the order the reports
//! arrived in. A rejected candidate is dropped whole, never trimmed, so the
//! keys only it covered show up as a gap.
//!
//! ```text
//!   id=1  (-inf ─────── b)
//!   id=2          [a ──────── c)      overlaps id=1, dropped
//!   id=3                      [c ──────── +inf)
//!
//!   route (-inf, b) -> 1   [c, +inf) -> 3   gaps [b, c)
//! ```

use super::boundary::{compare_starts, Boundary};
use crate::types::{RangeDescriptor, StoreDescriptor, StoreId};
use bytes::Bytes;
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// Range descriptors reported by each store.
pub type DescriptorsByStore = HashMap<StoreId, Vec<RangeDescriptor>>;

/// Ordered, non-overlapping map from boundary to the owning leader range.
pub type RoutingTable = BTreeMap<Boundary, LeaderRange>;

/// The leader replica resolved as owner of a key interval.
#[derive(Debug, Clone, PartialEq)]
pub struct LeaderRange {
    /// Descriptor as reported by the owner.
    pub descriptor: RangeDescriptor,
    /// Store hosting the leader replica.
    pub owner_store_id: StoreId,
}

impl LeaderRange {
    /// Create a leader range.
    pub fn new(descriptor: RangeDescriptor, owner_store_id: impl Into<StoreId>) -> Self {
        Self {
            descriptor,
            owner_store_id: owner_store_id.into(),
        }
    }
}

/// Group store heartbeats into the per-store descriptor map the resolver consumes.
pub fn group_by_store(stores: &[StoreDescriptor]) -> DescriptorsByStore {
    let mut grouped: DescriptorsByStore = HashMap::with_capacity(stores.len());
    for store in stores {
        grouped
            .entry(store.store_id.clone())
            .or_default()
            .extend(store.ranges.iter().cloned());
    }
    grouped
}

/// A resolved view of the key space: the routing table and its gaps.
#[derive(Debug, Clone)]
pub struct KeySpaceView {
    route: RoutingTable,
    gaps: Vec<Boundary>,
}

impl Default for KeySpaceView {
    fn default() -> Self {
        Self {
            route: RoutingTable::new(),
            gaps: vec![Boundary::FULL],
        }
    }
}

impl KeySpaceView {
    /// Resolve the given descriptors.
    pub fn new(descriptors: &DescriptorsByStore) -> Self {
        let route = resolve_route(descriptors);
        let gaps = gaps_of(&route);
        debug!(
            entries = route.len(),
            gaps = gaps.len(),
            "Resolved key space"
        );
        Self { route, gaps }
    }

    /// Resolve straight from store heartbeats.
    pub fn from_stores(stores: &[StoreDescriptor]) -> Self {
        Self::new(&group_by_store(stores))
    }

    /// The routing table, possibly with gaps.
    pub fn route(&self) -> &RoutingTable {
        &self.route
    }

    /// Consume the view, returning the routing table.
    pub fn into_route(self) -> RoutingTable {
        self.route
    }

    /// Uncovered intervals, left to right.
    pub fn gaps(&self) -> &[Boundary] {
        &self.gaps
    }

    /// Whether every key is owned by some leader range.
    pub fn is_fully_covered(&self) -> bool {
        self.gaps.is_empty()
    }

    /// The routing table, only when it covers the entire key space.
    pub fn full_covered_route(&self) -> Option<&RoutingTable> {
        self.is_fully_covered().then_some(&self.route)
    }
}

/// Resolve descriptors into a routing table.
pub fn resolve(descriptors: &DescriptorsByStore) -> RoutingTable {
    resolve_route(descriptors)
}

/// Maximal intervals not covered by any accepted leader range.
pub fn find_gaps(descriptors: &DescriptorsByStore) -> Vec<Boundary> {
    gaps_of(&resolve_route(descriptors))
}

/// The routing table if and only if it has no gaps.
pub fn full_covered_route(descriptors: &DescriptorsByStore) -> Option<RoutingTable> {
    let route = resolve_route(descriptors);
    gaps_of(&route).is_empty().then_some(route)
}

fn resolve_route(descriptors: &DescriptorsByStore) -> RoutingTable {
    let mut candidates: Vec<(&StoreId, &RangeDescriptor)> = descriptors
        .iter()
        .flat_map(|(store, ranges)| ranges.iter().map(move |r| (store, r)))
        .filter(|(_, r)| r.is_leader())
        .filter(|(store, r)| {
            if r.boundary.is_empty() {
                warn!(
                    store_id = %store,
                    range_id = %r.id,
                    boundary = %r.boundary,
                    "Ignoring leader range with empty boundary"
                );
                return false;
            }
            true
        })
        .collect();

    candidates.sort_by(|(sa, a), (sb, b)| rank(a, sa, b, sb));

    let mut route = RoutingTable::new();
    // Accepted boundaries are disjoint and sorted, so only the last one can
    // overlap a later candidate.
    let mut last: Option<&Boundary> = None;
    for (store, descriptor) in candidates {
        if let Some(accepted) = last.filter(|b| b.overlaps(&descriptor.boundary)) {
            debug!(
                store_id = %store,
                range_id = %descriptor.id,
                boundary = %descriptor.boundary,
                accepted = %accepted,
                "Dropping leader range overlapping an accepted one"
            );
            continue;
        }
        route.insert(
            descriptor.boundary.clone(),
            LeaderRange::new(descriptor.clone(), store.clone()),
        );
        last = Some(&descriptor.boundary);
    }
    route
}

fn rank(a: &RangeDescriptor, store_a: &str, b: &RangeDescriptor, store_b: &str) -> Ordering {
    compare_starts(a.boundary.start_key(), b.boundary.start_key())
        .then(a.id.id.cmp(&b.id.id))
        .then(a.id.epoch.cmp(&b.id.epoch))
        .then(Reverse(a.version).cmp(&Reverse(b.version)))
        .then_with(|| a.boundary.cmp(&b.boundary))
        .then_with(|| store_a.cmp(store_b))
}

/// Uncovered intervals of a non-overlapping routing table.
fn gaps_of(route: &RoutingTable) -> Vec<Boundary> {
    let mut gaps = Vec::new();
    let mut cursor: Option<Bytes> = None;

    for boundary in route.keys() {
        if compare_starts(cursor.as_ref(), boundary.start_key()) == Ordering::Less {
            gaps.push(Boundary::new(cursor.clone(), boundary.start_key().cloned()));
        }
        match boundary.end_key() {
            Some(end) => cursor = Some(end.clone()),
            None => return gaps,
        }
    }

    gaps.push(Boundary::new(cursor, None));
    gaps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RaftRole, RangeId};

    fn leader(id: u64, boundary: Boundary) -> RangeDescriptor {
        RangeDescriptor::new(RangeId::new(id, 1), boundary, RaftRole::Leader)
    }

    fn single_store(ranges: Vec<RangeDescriptor>) -> DescriptorsByStore {
        HashMap::from([("store1".to_string(), ranges)])
    }

    fn owner_ids(route: &RoutingTable) -> Vec<(Boundary, u64)> {
        route
            .iter()
            .map(|(b, r)| (b.clone(), r.descriptor.id.id))
            .collect()
    }

    #[test]
    fn test_full_coverage_maps_each_boundary_to_its_descriptor() {
        let descriptors = single_store(vec![
            leader(1, Boundary::until("a")),
            leader(2, Boundary::range("a", "b")),
            leader(3, Boundary::range("b", "c")),
            leader(4, Boundary::range("c", "d")),
            leader(5, Boundary::from_start("d")),
        ]);

        let route = full_covered_route(&descriptors).expect("full coverage");
        assert_eq!(
            owner_ids(&route),
            vec![
                (Boundary::until("a"), 1),
                (Boundary::range("a", "b"), 2),
                (Boundary::range("b", "c"), 3),
                (Boundary::range("c", "d"), 4),
                (Boundary::from_start("d"), 5),
            ]
        );
        assert!(find_gaps(&descriptors).is_empty());
    }

    #[test]
    fn test_identical_boundaries_pick_lowest_id() {
        let descriptors = single_store(vec![
            leader(1, Boundary::until("a")),
            leader(3, Boundary::range("a", "b")),
            leader(2, Boundary::range("a", "b")),
            leader(4, Boundary::range("b", "c")),
            leader(5, Boundary::from_start("c")),
        ]);

        let route = resolve(&descriptors);
        assert_eq!(route.len(), 4);
        assert_eq!(route[&Boundary::range("a", "b")].descriptor.id.id, 2);
    }

    #[test]
    fn test_lowest_id_wins_across_stores() {
        let mut descriptors = single_store(vec![
            leader(1, Boundary::until("a")),
            leader(2, Boundary::range("a", "b")),
            leader(3, Boundary::range("b", "c")),
            leader(5, Boundary::from_start("c")),
        ]);
        descriptors.insert("store2".into(), vec![leader(4, Boundary::from_start("c"))]);

        let route = resolve(&descriptors);
        let tail = &route[&Boundary::from_start("c")];
        assert_eq!(tail.descriptor.id.id, 4);
        assert_eq!(tail.owner_store_id, "store2");
    }

    #[test]
    fn test_result_is_independent_of_store_naming() {
        let a = leader(7, Boundary::range("a", "m"));
        let b = leader(3, Boundary::range("c", "z"));

        let forward: DescriptorsByStore = HashMap::from([
            ("s1".to_string(), vec![a.clone()]),
            ("s2".to_string(), vec![b.clone()]),
        ]);
        let backward: DescriptorsByStore =
            HashMap::from([("s1".to_string(), vec![b]), ("s2".to_string(), vec![a])]);

        let ids = |route: RoutingTable| owner_ids(&route);
        assert_eq!(ids(resolve(&forward)), ids(resolve(&backward)));
        assert_eq!(ids(resolve(&forward)), vec![(Boundary::range("a", "m"), 7)]);
    }

    #[test]
    fn test_range_inside_an_accepted_one_is_dropped() {
        let descriptors = single_store(vec![
            leader(9, Boundary::FULL),
            leader(1, Boundary::range("b", "c")),
        ]);

        let route = resolve(&descriptors);
        assert_eq!(owner_ids(&route), vec![(Boundary::FULL, 9)]);
        assert!(find_gaps(&descriptors).is_empty());
    }

    #[test]
    fn test_partial_overlap_drops_the_later_range() {
        let descriptors = single_store(vec![
            leader(1, Boundary::until("b")),
            leader(2, Boundary::range("a", "c")),
            leader(3, Boundary::from_start("c")),
        ]);

        let view = KeySpaceView::new(&descriptors);
        assert_eq!(view.gaps(), &[Boundary::range("b", "c")]);
        assert!(view.full_covered_route().is_none());
        assert_eq!(
            owner_ids(view.route()),
            vec![(Boundary::until("b"), 1), (Boundary::from_start("c"), 3)]
        );
        assert_eq!(find_gaps(&descriptors), vec![Boundary::range("b", "c")]);
    }

    #[test]
    fn test_same_start_prefers_lowest_id_over_wider_range() {
        let descriptors = single_store(vec![
            leader(4, Boundary::range("a", "z")),
            leader(2, Boundary::range("a", "c")),
            leader(3, Boundary::from_start("c")),
        ]);

        let route = resolve(&descriptors);
        assert_eq!(
            owner_ids(&route),
            vec![(Boundary::range("a", "c"), 2), (Boundary::from_start("c"), 3)]
        );
        assert_eq!(find_gaps(&descriptors), vec![Boundary::until("a")]);
    }

    #[test]
    fn test_gaps_reported_left_to_right() {
        let descriptors = single_store(vec![
            leader(1, Boundary::until("a")),
            leader(2, Boundary::range("c", "d")),
            leader(3, Boundary::from_start("e")),
        ]);

        assert_eq!(
            find_gaps(&descriptors),
            vec![Boundary::range("a", "c"), Boundary::range("d", "e")]
        );
        assert!(full_covered_route(&descriptors).is_none());
    }

    #[test]
    fn test_non_leaders_are_ignored() {
        let descriptors = single_store(vec![
            leader(1, Boundary::until("m")),
            RangeDescriptor::new(RangeId::new(2, 1), Boundary::from_start("m"), RaftRole::Follower),
        ]);

        assert_eq!(find_gaps(&descriptors), vec![Boundary::from_start("m")]);
    }

    #[test]
    fn test_empty_input_is_one_full_gap() {
        let view = KeySpaceView::new(&DescriptorsByStore::new());
        assert!(view.route().is_empty());
        assert_eq!(view.gaps(), &[Boundary::FULL]);
        assert!(view.full_covered_route().is_none());
    }

    #[test]
    fn test_same_id_prefers_higher_version() {
        let old = leader(1, Boundary::FULL).with_version(1);
        let new = leader(1, Boundary::FULL).with_version(4);
        let descriptors: DescriptorsByStore = HashMap::from([
            ("a".to_string(), vec![old]),
            ("b".to_string(), vec![new]),
        ]);

        let route = resolve(&descriptors);
        let owner = &route[&Boundary::FULL];
        assert_eq!(owner.owner_store_id, "b");
        assert_eq!(owner.descriptor.version, 4);
    }

    #[test]
    fn test_group_by_store_merges_duplicate_reports() {
        let stores = vec![
            StoreDescriptor::new("s1").with_range(leader(1, Boundary::until("m"))),
            StoreDescriptor::new("s1").with_range(leader(2, Boundary::from_start("m"))),
        ];
        let grouped = group_by_store(&stores);
        assert_eq!(grouped["s1"].len(), 2);
        assert!(KeySpaceView::from_stores(&stores).is_fully_covered());
    }
}
