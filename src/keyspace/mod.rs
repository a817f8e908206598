//! Key-space resolution and routing.
//!
//! - [`Boundary`]: half-open byte-key intervals
//! - [`resolver`]: turns per-store range reports into one routing table
//! - [`router`]: key and boundary lookups, plus a shared [`RouteCache`]

pub mod boundary;
pub mod resolver;
pub mod router;

pub use boundary::{compare_ends, compare_starts, Boundary};
pub use resolver::{
    find_gaps, full_covered_route, group_by_store, resolve, DescriptorsByStore, KeySpaceView,
    LeaderRange, RoutingTable,
};
pub use router::{find_by_boundary, find_by_key, BatchRoute, RouteCache, RoutingDecision};
