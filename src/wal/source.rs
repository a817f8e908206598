//! Collaborator contracts of a WAL subscription.

use crate::error::Result;
use crate::types::{LogEntry, RangeId, Snapshot};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Read side of one range's committed log.
#[async_trait]
pub trait RangeWal: Send + Sync + 'static {
    /// Range this log belongs to.
    fn range_id(&self) -> RangeId;

    /// Read committed entries starting at `from_index`, stopping once
    /// `max_bytes` worth of entries have been collected (at least one entry is
    /// returned when any is available).
    ///
    /// Fails with [`WalError::Compacted`](crate::error::WalError::Compacted)
    /// when `from_index` is no longer retained.
    async fn retrieve_committed(&self, from_index: u64, max_bytes: u64) -> Result<Vec<LogEntry>>;

    /// Stream of snapshots this replica has been asked to install.
    fn subscribe_snapshot_tasks(&self) -> mpsc::UnboundedReceiver<SnapshotInstallTask>;
}

/// The state machine fed by a WAL subscription.
#[async_trait]
pub trait WalSubscriber: Send + Sync + 'static {
    /// Called once, before any apply, with a handle that can stop the subscription.
    fn on_subscribe(&self, _handle: SubscriptionHandle) {}

    /// Apply one committed entry. An error makes the subscription retry the
    /// same entry before anything else.
    async fn apply(&self, entry: &LogEntry) -> Result<()>;

    /// Replace local state with `snapshot`, fetched from `leader`. Returns the
    /// snapshot actually installed.
    async fn install(&self, snapshot: &Snapshot, leader: &str) -> Result<Snapshot>;
}

/// A request to install a snapshot, with the channel that receives the outcome.
///
/// Dropping the task without answering tells the requester the install was
/// cancelled.
#[derive(Debug)]
pub struct SnapshotInstallTask {
    pub snapshot: Snapshot,
    pub leader: String,
    pub on_done: oneshot::Sender<Result<Snapshot>>,
}

impl SnapshotInstallTask {
    /// Create a task and the receiver its outcome will be delivered on.
    pub fn new(
        snapshot: Snapshot,
        leader: impl Into<String>,
    ) -> (Self, oneshot::Receiver<Result<Snapshot>>) {
        let (on_done, done_rx) = oneshot::channel();
        (
            Self {
                snapshot,
                leader: leader.into(),
                on_done,
            },
            done_rx,
        )
    }
}

/// Cloneable stop switch of a running subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    cancel: CancellationToken,
    stopped: Arc<AtomicBool>,
}

impl SubscriptionHandle {
    pub(crate) fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Stop the subscription. Returns `true` only for the call that stopped it.
    pub fn stop(&self) -> bool {
        if self
            .stopped
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.cancel.cancel();
        true
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Resolves once the subscription has been stopped.
    pub async fn stopped(&self) {
        self.cancel.cancelled().await
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.cancel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_stop_is_single_shot() {
        let handle = SubscriptionHandle::new();
        let clone = handle.clone();

        assert!(!handle.is_stopped());
        assert!(clone.stop());
        assert!(!handle.stop());
        assert!(handle.is_stopped());
        assert!(handle.token().is_cancelled());
    }

    #[tokio::test]
    async fn test_dropped_task_reports_cancellation() {
        let (task, rx) = SnapshotInstallTask::new(
            Snapshot::new(RangeId::new(1, 0), 0, "cp", 10),
            "leader",
        );
        drop(task);
        assert!(rx.await.is_err());
    }
}
