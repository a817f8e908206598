//! Key-space routing scenarios driven by successive store heartbeats.

#[cfg(test)]
mod tests {
    use crate::keyspace::{Boundary, RouteCache};
    use crate::types::{RaftRole, RangeDescriptor, RangeId, StoreDescriptor};
    use test_log::test;

    fn leader(id: u64, boundary: Boundary) -> RangeDescriptor {
        RangeDescriptor::new(RangeId::new(id, 0), boundary, RaftRole::Leader)
    }

    fn follower(id: u64, boundary: Boundary) -> RangeDescriptor {
        RangeDescriptor::new(RangeId::new(id, 0), boundary, RaftRole::Follower)
    }

    /// Three stores, each leading one third of the key space and following
    /// the other two.
    fn three_store_cluster() -> Vec<StoreDescriptor> {
        let low = Boundary::until("g");
        let mid = Boundary::range("g", "p");
        let high = Boundary::from_start("p");
        vec![
            StoreDescriptor::new("s1")
                .with_range(leader(1, low.clone()))
                .with_range(follower(2, mid.clone()))
                .with_range(follower(3, high.clone())),
            StoreDescriptor::new("s2")
                .with_range(follower(1, low.clone()))
                .with_range(leader(2, mid.clone()))
                .with_range(follower(3, high.clone())),
            StoreDescriptor::new("s3")
                .with_range(follower(1, low))
                .with_range(follower(2, mid))
                .with_range(leader(3, high)),
        ]
    }

    #[test]
    fn test_routes_follow_leaders() {
        let cache = RouteCache::new();
        assert!(!cache.is_fully_covered());
        assert!(cache.find_by_key(b"a").is_none());

        let view = cache.update(&three_store_cluster());
        assert!(view.is_fully_covered());
        assert_eq!(view.route().len(), 3);

        let decision = cache.decide(b"a", "s1").unwrap();
        assert_eq!(decision.range_id, RangeId::new(1, 0));
        assert!(decision.is_local);

        let decision = cache.decide(b"h", "s1").unwrap();
        assert_eq!(decision.owner_store_id, "s2");
        assert!(!decision.is_local);

        let owner = cache.find_by_key(b"p").unwrap();
        assert_eq!(owner.owner_store_id, "s3");
    }

    #[test]
    fn test_batch_is_grouped_by_range() {
        let cache = RouteCache::new();
        cache.update(&three_store_cluster());

        let keys: Vec<&[u8]> = vec![b"a", b"h", b"z", b"b", b"o"];
        let batch = cache.route_batch(&keys);

        assert!(batch.unrouted.is_empty());
        assert_eq!(batch.by_range[&RangeId::new(1, 0)], vec![0, 3]);
        assert_eq!(batch.by_range[&RangeId::new(2, 0)], vec![1, 4]);
        assert_eq!(batch.by_range[&RangeId::new(3, 0)], vec![2]);
    }

    #[test]
    fn test_split_reported_by_leader_is_picked_up() {
        let cache = RouteCache::new();
        let mut stores = three_store_cluster();
        cache.update(&stores);

        // s2 split range 2 at "k"; the followers have not caught up yet.
        stores[1].ranges[1] = leader(2, Boundary::range("g", "k")).with_version(1);
        stores[1].ranges.push(leader(4, Boundary::range("k", "p")));
        cache.update(&stores);

        assert!(cache.is_fully_covered());
        let owners = cache.find_by_boundary(&Boundary::range("h", "m"));
        let ids: Vec<u64> = owners.iter().map(|o| o.descriptor.id.id).collect();
        assert_eq!(ids, vec![2, 4]);
        assert_eq!(cache.find_by_key(b"k").unwrap().descriptor.id.id, 4);
        assert_eq!(cache.find_by_key(b"j").unwrap().descriptor.version, 1);
    }

    #[test]
    fn test_silent_store_leaves_a_gap() {
        let cache = RouteCache::new();
        let stores = three_store_cluster();
        cache.update(&stores);

        let old_view = cache.current();
        cache.update(&stores[..2]);

        assert!(!cache.is_fully_covered());
        assert_eq!(cache.gaps(), vec![Boundary::from_start("p")]);
        assert!(cache.decide(b"z", "s1").is_none());

        let keys: Vec<&[u8]> = vec![b"a", b"z"];
        let batch = cache.route_batch(&keys);
        assert_eq!(batch.unrouted, vec![1]);

        // Readers holding the previous view keep a consistent picture.
        assert!(old_view.is_fully_covered());
    }

    #[test]
    fn test_older_epoch_wins_overlap() {
        let cache = RouteCache::new();
        cache.update(&[
            StoreDescriptor::new("s1").with_range(RangeDescriptor::new(
                RangeId::new(1, 0),
                Boundary::FULL,
                RaftRole::Leader,
            )),
            StoreDescriptor::new("s2").with_range(RangeDescriptor::new(
                RangeId::new(1, 1),
                Boundary::FULL,
                RaftRole::Leader,
            )),
        ]);

        let view = cache.current();
        assert_eq!(view.route().len(), 1);
        let owner = cache.find_by_key(b"anything").unwrap();
        assert_eq!(owner.owner_store_id, "s1");
        assert_eq!(owner.descriptor.id.epoch, 0);
    }

    #[test]
    fn test_no_leader_means_gap() {
        let cache = RouteCache::new();
        cache.update(&[
            StoreDescriptor::new("s1").with_range(follower(1, Boundary::FULL)),
            StoreDescriptor::new("s2").with_range(follower(1, Boundary::FULL)),
        ]);

        assert_eq!(cache.gaps(), vec![Boundary::FULL]);
        assert!(cache.current().full_covered_route().is_none());
    }
}
