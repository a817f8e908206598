//! The strictly sequential apply side of a WAL subscription.
//!
//! A single worker task drains an [`ApplyQueue`]: committed entries are handed
//! to the subscriber one at a time, and snapshot installs run in the same
//! sequence, so an install never overlaps an apply. A failed apply is retried
//! in place before the worker looks at the next task.

use super::retry::RetryPolicy;
use super::source::{SnapshotInstallTask, WalSubscriber};
use crate::metrics::WalMetrics;
use crate::types::{LogEntry, RangeId};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Work items executed by the apply worker.
#[derive(Debug)]
pub(crate) enum ApplyTask {
    Entry(LogEntry),
    Install { task: SnapshotInstallTask, seq: u64 },
}

/// Outcome of an install, reported back to the subscription driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InstallEvent {
    Installed { seq: u64, last_applied_index: u64 },
    /// `last_applied` is the last entry the worker applied before the install.
    Aborted { seq: u64, last_applied: u64 },
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<ApplyTask>,
    running: Option<CancellationToken>,
}

/// Pending apply tasks plus the cancel switch of the one running.
#[derive(Debug)]
pub(crate) struct ApplyQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    stop: CancellationToken,
}

impl ApplyQueue {
    pub(crate) fn new(stop: CancellationToken) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            stop,
        }
    }

    pub(crate) fn push(&self, task: ApplyTask) {
        self.state.lock().pending.push_back(task);
        self.notify.notify_one();
    }

    pub(crate) fn extend(&self, entries: impl IntoIterator<Item = LogEntry>) {
        self.state
            .lock()
            .pending
            .extend(entries.into_iter().map(ApplyTask::Entry));
        self.notify.notify_one();
    }

    /// Drop every pending task and cancel the running one. Returns the number
    /// of entries dropped without being applied.
    ///
    /// Pending installs are dropped with their completion channel, which the
    /// requester observes as a cancellation.
    pub(crate) fn cancel_all(&self) -> usize {
        let mut state = self.state.lock();
        if let Some(running) = state.running.take() {
            running.cancel();
        }
        state
            .pending
            .drain(..)
            .filter(|task| matches!(task, ApplyTask::Entry(_)))
            .count()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Wait for the next task. `None` once the subscription is stopped.
    async fn next(&self) -> Option<(ApplyTask, CancellationToken)> {
        loop {
            if self.stop.is_cancelled() {
                return None;
            }
            {
                let mut state = self.state.lock();
                if let Some(task) = state.pending.pop_front() {
                    let token = self.stop.child_token();
                    state.running = Some(token.clone());
                    return Some((task, token));
                }
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = self.stop.cancelled() => return None,
            }
        }
    }

    fn finish(&self) {
        self.state.lock().running = None;
    }
}

/// Runs the tasks of one [`ApplyQueue`] against the subscriber.
pub(crate) struct ApplyWorker {
    pub(crate) range_id: RangeId,
    pub(crate) queue: Arc<ApplyQueue>,
    pub(crate) subscriber: Arc<dyn WalSubscriber>,
    pub(crate) retry: Arc<dyn RetryPolicy>,
    pub(crate) metrics: Arc<WalMetrics>,
    pub(crate) stall_warn_threshold: u64,
    pub(crate) events: mpsc::UnboundedSender<InstallEvent>,
    /// Index of the last applied entry or installed snapshot.
    pub(crate) last_applied: u64,
}

impl ApplyWorker {
    pub(crate) async fn run(mut self) {
        debug!(range_id = %self.range_id, "Apply worker started");
        while let Some((task, token)) = self.queue.next().await {
            let applied = match task {
                ApplyTask::Entry(entry) => {
                    let index = entry.index;
                    self.apply(entry, &token).await.then_some(index)
                }
                ApplyTask::Install { task, seq } => self.install(task, seq, &token).await,
            };
            if let Some(index) = applied {
                self.last_applied = index;
            }
            self.queue.finish();
        }
        debug!(range_id = %self.range_id, "Apply worker stopped");
    }

    /// Returns `true` once the entry is applied, `false` when cancelled.
    async fn apply(&self, entry: LogEntry, token: &CancellationToken) -> bool {
        let mut failures: u32 = 0;
        loop {
            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                result = self.subscriber.apply(&entry) => Some(result),
            };

            let err = match outcome {
                None => {
                    self.metrics.applies_cancelled.inc();
                    debug!(range_id = %self.range_id, index = entry.index, "Apply cancelled");
                    return false;
                }
                Some(Ok(())) => {
                    self.metrics.record_applied(entry.index);
                    trace!(range_id = %self.range_id, index = entry.index, "Entry applied");
                    return true;
                }
                Some(Err(err)) => err,
            };

            failures = failures.saturating_add(1);
            let consecutive = self.metrics.record_apply_failure();
            if self.stall_warn_threshold > 0 && consecutive % self.stall_warn_threshold == 0 {
                warn!(
                    range_id = %self.range_id,
                    index = entry.index,
                    consecutive_failures = consecutive,
                    error = %err,
                    "Range is stuck retrying the same entry"
                );
            } else {
                debug!(
                    range_id = %self.range_id,
                    index = entry.index,
                    attempt = failures,
                    error = %err,
                    "Apply failed, retrying"
                );
            }

            let delay = self.retry.delay(failures);
            if delay.is_zero() {
                tokio::task::yield_now().await;
                if token.is_cancelled() {
                    self.metrics.applies_cancelled.inc();
                    return false;
                }
            } else {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        self.metrics.applies_cancelled.inc();
                        return false;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    /// Returns the snapshot's last applied index once installed.
    async fn install(
        &self,
        task: SnapshotInstallTask,
        seq: u64,
        token: &CancellationToken,
    ) -> Option<u64> {
        let SnapshotInstallTask {
            snapshot,
            leader,
            mut on_done,
        } = task;

        info!(
            range_id = %self.range_id,
            checkpoint_id = %snapshot.checkpoint_id,
            last_applied_index = snapshot.last_applied_index,
            leader = %leader,
            "Installing snapshot"
        );

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            _ = on_done.closed() => None,
            result = self.subscriber.install(&snapshot, &leader) => Some(result),
        };

        match outcome {
            None => {
                self.metrics.record_install(None);
                let _ = self.events.send(InstallEvent::Aborted {
                    seq,
                    last_applied: self.last_applied,
                });
                debug!(range_id = %self.range_id, seq, "Snapshot install cancelled");
                None
            }
            Some(Ok(installed)) => {
                self.metrics.record_install(Some(installed.last_applied_index));
                let _ = self.events.send(InstallEvent::Installed {
                    seq,
                    last_applied_index: installed.last_applied_index,
                });
                info!(
                    range_id = %self.range_id,
                    checkpoint_id = %installed.checkpoint_id,
                    last_applied_index = installed.last_applied_index,
                    "Snapshot installed"
                );
                let last_applied_index = installed.last_applied_index;
                let _ = on_done.send(Ok(installed));
                Some(last_applied_index)
            }
            Some(Err(err)) => {
                self.metrics.record_install(None);
                let _ = self.events.send(InstallEvent::Aborted {
                    seq,
                    last_applied: self.last_applied,
                });
                warn!(
                    range_id = %self.range_id,
                    checkpoint_id = %snapshot.checkpoint_id,
                    error = %err,
                    "Snapshot install failed"
                );
                let _ = on_done.send(Err(err));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RangeId, Snapshot};

    #[tokio::test]
    async fn test_cancel_all_drops_pending_work() {
        let queue = ApplyQueue::new(CancellationToken::new());
        queue.extend((1..=3).map(|i| LogEntry::new(i, 1, "x")));
        let (task, done_rx) =
            SnapshotInstallTask::new(Snapshot::new(RangeId::new(1, 0), 0, "cp", 9), "s2");
        queue.push(ApplyTask::Install { task, seq: 1 });
        assert_eq!(queue.len(), 4);

        let (first, token) = queue.next().await.unwrap();
        assert!(matches!(first, ApplyTask::Entry(ref e) if e.index == 1));

        assert_eq!(queue.cancel_all(), 2);
        assert!(token.is_cancelled());
        assert_eq!(queue.len(), 0);
        assert!(done_rx.await.is_err());
    }

    #[tokio::test]
    async fn test_next_returns_none_after_stop() {
        let stop = CancellationToken::new();
        let queue = Arc::new(ApplyQueue::new(stop.clone()));

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.next().await.is_none() })
        };
        stop.cancel();
        assert!(waiter.await.unwrap());
    }
}
