//! Range replication and routing core for a range-partitioned key-value store.
//!
//! The key space is split into ranges, each replicated by a consensus group
//! spread over several stores. This crate provides the three pieces every
//! store runs next to its consensus engine:
//!
//! - **WAL subscription**: drains a range's committed log into its state
//!   machine strictly in order, with snapshot installs preempting pending work
//! - **Key-space resolution**: turns the range descriptors reported by all
//!   stores into one non-overlapping routing table and finds uncovered gaps
//! - **Balancers**: propose load-driven splits and removal of ranges left
//!   behind by a repeated bootstrap
//!
//! # Example
//!
//! ```rust,no_run
//! use kvrange::keyspace::{Boundary, RouteCache};
//! use kvrange::types::{RaftRole, RangeDescriptor, RangeId, StoreDescriptor};
//!
//! let cache = RouteCache::new();
//! cache.update(&[
//!     StoreDescriptor::new("s1").with_range(RangeDescriptor::new(
//!         RangeId::new(1, 0),
//!         Boundary::until("m"),
//!         RaftRole::Leader,
//!     )),
//!     StoreDescriptor::new("s2").with_range(RangeDescriptor::new(
//!         RangeId::new(2, 0),
//!         Boundary::from_start("m"),
//!         RaftRole::Leader,
//!     )),
//! ]);
//!
//! assert!(cache.is_fully_covered());
//! let decision = cache.decide(b"user:42", "s1").unwrap();
//! assert!(!decision.is_local);
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │        Consensus engine (per range)         │
//! └─────────────────────────────────────────────┘
//!        │ commit index            │ snapshots
//!        ▼                         ▼
//! ┌─────────────────────────────────────────────┐
//! │              WalSubscription                │
//! │  fetch ─► ordered apply ─► WalSubscriber    │
//! └─────────────────────────────────────────────┘
//!
//!   store heartbeats (StoreDescriptor)
//!        │
//!     ┌──┴───────────────────┐
//!     ▼                      ▼
//! ┌────────────┐      ┌───────────────────┐
//! │ RouteCache │      │ BalanceController │──► CommandSink
//! │ (resolver) │      │  split / epoch    │
//! └────────────┘      └───────────────────┘
//! ```

pub mod balance;
pub mod config;
pub mod error;
pub mod keyspace;
pub mod metrics;
pub mod testing;
pub mod types;
pub mod wal;

// Re-export main types for convenience
pub use config::{
    BackoffConfig, BalanceControllerConfig, SplitBalancerConfig, WalSubscriptionConfig,
};
pub use error::{BalanceError, Error, Result, WalError};
pub use types::{
    LogEntry, LoadHint, RaftRole, RangeDescriptor, RangeId, RangeState, Snapshot,
    StoreDescriptor, StoreId,
};

// Re-export WAL types
pub use wal::{RangeWal, SnapshotInstallTask, SubscriptionHandle, WalSubscriber, WalSubscription};

// Re-export key-space types
pub use keyspace::{Boundary, KeySpaceView, LeaderRange, RouteCache, RoutingTable};

// Re-export balancer types
pub use balance::{
    BalanceCommand, BalanceController, ChangeConfigCommand, CommandSink, RangeSplitBalancer,
    RedundantEpochRemovalBalancer, SplitCommand, StoreBalancer,
};

// Re-export metrics types
pub use metrics::{BalanceMetrics, Counter, Gauge, LabeledCounter, WalMetrics};
