//! Draining a range's committed log into its state machine.
//!
//! A [`WalSubscription`] pairs a [`RangeWal`] (the read side of the
//! consensus log) with a [`WalSubscriber`] (the state machine). Entries are
//! applied exactly in index order, one at a time; snapshot installs preempt
//! pending applies.
//!
//! # Example
//!
//! ```rust,ignore
//! let (commit_tx, commit_rx) = tokio::sync::mpsc::unbounded_channel();
//! let subscription = WalSubscription::start(
//!     WalSubscriptionConfig::default(),
//!     wal,
//!     commit_rx,
//!     last_applied_index,
//!     state_machine,
//! )?;
//!
//! commit_tx.send(42)?;
//! // ...
//! subscription.shutdown().await;
//! ```

mod apply_queue;
pub mod retry;
pub mod source;
mod subscription;

pub use retry::{policy_for, ExponentialBackoff, ImmediateRetry, RetryPolicy};
pub use source::{RangeWal, SnapshotInstallTask, SubscriptionHandle, WalSubscriber};
pub use subscription::WalSubscription;
