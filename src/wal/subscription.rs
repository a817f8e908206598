//! Per-range WAL subscription.
//!
//! # Architecture
//!
//! ```text
//!  commit index ──┐                         ┌────────────────┐
//!                 ▼                         │  apply worker  │
//!  snapshots ──► driver ── entries/install ─►  (one task at  ├──► WalSubscriber
//!                 │  ▲                      │   a time)      │
//!                 ▼  │ fetched entries      └───────┬────────┘
//!           RangeWal::retrieve_committed            │ install outcome
//!                    ▲──────────────────────────────┘
//! ```
//!
//! The driver task owns all fetch state (`last_fetched`, the known commit
//! index, the in-flight fetch and the pending install), so at most one fetch
//! is outstanding at any time. The apply worker owns the subscriber calls.
//!
//! A snapshot task preempts everything: the in-flight fetch is dropped, queued
//! applies are discarded, the running apply is cancelled, and the install is
//! queued. Fetching stays suspended until the install settles; a successful
//! install moves `last_fetched` to the snapshot's last applied index and forgets
//! the commit index until the log publishes a new one. A failed or abandoned
//! install moves `last_fetched` back to the last entry the worker applied, so
//! the applies dropped for the snapshot are fetched again.
//!
//! A read of a compacted index is not retried. The range waits for a snapshot
//! or a fresh commit index to re-arm fetching. Any other read error, and a read
//! that returns nothing below the commit index, retries after
//! `fetch_retry_delay`.

use super::apply_queue::{ApplyQueue, ApplyTask, ApplyWorker, InstallEvent};
use super::retry::policy_for;
use super::source::{RangeWal, SnapshotInstallTask, SubscriptionHandle, WalSubscriber};
use crate::config::WalSubscriptionConfig;
use crate::error::Result;
use crate::metrics::WalMetrics;
use crate::types::{LogEntry, RangeId};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

type FetchFuture = Pin<Box<dyn Future<Output = Result<Vec<LogEntry>>> + Send>>;

/// A running subscription of one range to its committed log.
///
/// Dropping the subscription stops it.
#[derive(Debug)]
pub struct WalSubscription {
    range_id: RangeId,
    handle: SubscriptionHandle,
    metrics: Arc<WalMetrics>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WalSubscription {
    /// Start consuming `wal` from `last_fetched_index + 1`.
    ///
    /// `commit_index_rx` publishes the range's commit index as it advances.
    /// Must be called from within a tokio runtime.
    pub fn start(
        config: WalSubscriptionConfig,
        wal: Arc<dyn RangeWal>,
        commit_index_rx: mpsc::UnboundedReceiver<u64>,
        last_fetched_index: u64,
        subscriber: Arc<dyn WalSubscriber>,
    ) -> Result<Self> {
        config.validate()?;

        let range_id = wal.range_id();
        let handle = SubscriptionHandle::new();
        let metrics = Arc::new(WalMetrics::new(range_id));
        let queue = Arc::new(ApplyQueue::new(handle.token().clone()));
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        subscriber.on_subscribe(handle.clone());

        let worker = ApplyWorker {
            range_id,
            queue: Arc::clone(&queue),
            subscriber,
            retry: policy_for(&config),
            metrics: Arc::clone(&metrics),
            stall_warn_threshold: config.apply_stall_warn_threshold,
            events: events_tx,
            last_applied: last_fetched_index,
        };

        let driver = Driver {
            range_id,
            snapshot_rx: wal.subscribe_snapshot_tasks(),
            wal,
            config,
            queue,
            metrics: Arc::clone(&metrics),
            handle: handle.clone(),
            last_fetched: last_fetched_index,
            commit: None,
            armed: true,
            retry_fetch: false,
            install_seq: 0,
            pending_install: None,
            fetch: None,
        };

        info!(range_id = %range_id, last_fetched_index, "WAL subscription started");

        let tasks = vec![
            tokio::spawn(worker.run()),
            tokio::spawn(driver.run(commit_index_rx, events_rx)),
        ];

        Ok(Self {
            range_id,
            handle,
            metrics,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn range_id(&self) -> RangeId {
        self.range_id
    }

    /// A handle that can stop this subscription from elsewhere.
    pub fn handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }

    /// Stop fetching and applying. Idempotent; returns `true` for the call
    /// that actually stopped the subscription.
    pub fn stop(&self) -> bool {
        let stopped = self.handle.stop();
        if stopped {
            info!(range_id = %self.range_id, "WAL subscription stopped");
        }
        stopped
    }

    pub fn is_stopped(&self) -> bool {
        self.handle.is_stopped()
    }

    pub fn metrics(&self) -> Arc<WalMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Stop and wait for the background tasks to finish.
    pub async fn shutdown(&self) {
        self.stop();
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(range_id = %self.range_id, error = %e, "WAL subscription task failed");
            }
        }
    }
}

impl Drop for WalSubscription {
    fn drop(&mut self) {
        self.handle.stop();
    }
}

struct Driver {
    range_id: RangeId,
    config: WalSubscriptionConfig,
    wal: Arc<dyn RangeWal>,
    snapshot_rx: mpsc::UnboundedReceiver<SnapshotInstallTask>,
    queue: Arc<ApplyQueue>,
    metrics: Arc<WalMetrics>,
    handle: SubscriptionHandle,

    last_fetched: u64,
    /// Latest commit index; `None` until one is published or after an install.
    commit: Option<u64>,
    /// Cleared by a compacted read, set again by the next commit index.
    armed: bool,
    /// The next fetch follows a transient failure or an empty read.
    retry_fetch: bool,
    install_seq: u64,
    pending_install: Option<u64>,
    fetch: Option<FetchFuture>,
}

impl Driver {
    async fn run(
        mut self,
        mut commit_rx: mpsc::UnboundedReceiver<u64>,
        mut events_rx: mpsc::UnboundedReceiver<InstallEvent>,
    ) {
        let token = self.handle.token().clone();
        let mut commits_open = true;
        let mut snapshots_open = true;

        loop {
            self.schedule_fetch();

            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                Some(event) = events_rx.recv() => self.on_install_event(event),
                task = self.snapshot_rx.recv(), if snapshots_open => match task {
                    Some(task) => self.on_snapshot(task),
                    None => {
                        debug!(range_id = %self.range_id, "Snapshot task stream closed");
                        snapshots_open = false;
                    }
                },
                index = commit_rx.recv(), if commits_open => match index {
                    Some(index) => self.on_commit(index),
                    None => {
                        debug!(range_id = %self.range_id, "Commit index stream closed");
                        commits_open = false;
                    }
                },
                result = poll_fetch(&mut self.fetch) => {
                    self.fetch = None;
                    self.on_fetched(result);
                }
            }
        }

        let dropped = self.queue.cancel_all();
        self.metrics.applies_cancelled.inc_by(dropped as u64);
        debug!(range_id = %self.range_id, dropped, "WAL subscription driver exited");
    }

    fn schedule_fetch(&mut self) {
        if self.fetch.is_some() || self.pending_install.is_some() || !self.armed {
            return;
        }
        let Some(commit) = self.commit else {
            return;
        };
        if self.last_fetched >= commit {
            return;
        }

        let from = self.last_fetched + 1;
        let max_bytes = self.config.max_fetch_bytes;
        let delay = if self.retry_fetch {
            self.config.fetch_retry_delay
        } else {
            std::time::Duration::ZERO
        };

        let retry = self.retry_fetch;
        self.retry_fetch = false;

        trace!(range_id = %self.range_id, from, commit, retry, "Fetching committed entries");
        let wal = Arc::clone(&self.wal);
        self.fetch = Some(Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            } else if retry {
                tokio::task::yield_now().await;
            }
            wal.retrieve_committed(from, max_bytes).await
        }));
    }

    fn on_commit(&mut self, index: u64) {
        trace!(range_id = %self.range_id, commit_index = index, "Commit index advanced");
        self.commit = Some(self.commit.map_or(index, |c| c.max(index)));
        self.armed = true;
    }

    fn on_fetched(&mut self, result: Result<Vec<LogEntry>>) {
        let entries = match result {
            Ok(entries) => entries,
            Err(e) if e.is_compaction() => {
                self.metrics.record_fetch_failure(true);
                self.armed = false;
                warn!(
                    range_id = %self.range_id,
                    from = self.last_fetched + 1,
                    error = %e,
                    "Committed log compacted past the fetch position, waiting for a snapshot"
                );
                return;
            }
            Err(e) => {
                self.metrics.record_fetch_failure(false);
                self.retry_fetch = true;
                error!(
                    range_id = %self.range_id,
                    from = self.last_fetched + 1,
                    error = %e,
                    "Failed to fetch committed entries"
                );
                return;
            }
        };

        let mut accepted = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.index <= self.last_fetched {
                warn!(
                    range_id = %self.range_id,
                    index = entry.index,
                    last_fetched = self.last_fetched,
                    "Dropping out-of-order entry"
                );
                continue;
            }
            self.last_fetched = entry.index;
            accepted.push(entry);
        }

        if accepted.is_empty() {
            // The log lags the commit index; read again while still behind it.
            self.metrics.record_fetch(0, self.last_fetched);
            self.retry_fetch = true;
            debug!(
                range_id = %self.range_id,
                last_fetched = self.last_fetched,
                commit = ?self.commit,
                "Fetch returned no new entries"
            );
            return;
        }

        self.metrics.record_fetch(accepted.len(), self.last_fetched);
        debug!(
            range_id = %self.range_id,
            entries = accepted.len(),
            last_fetched = self.last_fetched,
            "Queued committed entries"
        );
        self.queue.extend(accepted);
    }

    fn on_snapshot(&mut self, task: SnapshotInstallTask) {
        if self.fetch.take().is_some() {
            debug!(range_id = %self.range_id, "Dropped in-flight fetch for snapshot");
        }
        let dropped = self.queue.cancel_all();
        self.metrics.applies_cancelled.inc_by(dropped as u64);

        self.install_seq += 1;
        self.pending_install = Some(self.install_seq);

        info!(
            range_id = %self.range_id,
            checkpoint_id = %task.snapshot.checkpoint_id,
            last_applied_index = task.snapshot.last_applied_index,
            dropped_applies = dropped,
            "Snapshot install requested"
        );
        self.queue.push(ApplyTask::Install {
            task,
            seq: self.install_seq,
        });
    }

    fn on_install_event(&mut self, event: InstallEvent) {
        match event {
            InstallEvent::Installed {
                seq,
                last_applied_index,
            } if self.pending_install == Some(seq) => {
                self.pending_install = None;
                self.last_fetched = last_applied_index;
                self.commit = None;
                self.armed = true;
                self.retry_fetch = false;
                debug!(
                    range_id = %self.range_id,
                    last_fetched = last_applied_index,
                    "Fetch position reset by snapshot"
                );
            }
            InstallEvent::Aborted { seq, last_applied } if self.pending_install == Some(seq) => {
                self.pending_install = None;
                // Applies dropped for the snapshot were never run; fetch them again.
                let rewound = self.last_fetched.saturating_sub(last_applied);
                self.last_fetched = last_applied;
                self.armed = true;
                self.retry_fetch = false;
                debug!(
                    range_id = %self.range_id,
                    seq,
                    last_fetched = last_applied,
                    rewound,
                    "Snapshot install abandoned, fetching resumes"
                );
            }
            _ => trace!(range_id = %self.range_id, ?event, "Ignoring superseded install outcome"),
        }
    }
}

async fn poll_fetch(fetch: &mut Option<FetchFuture>) -> Result<Vec<LogEntry>> {
    match fetch {
        Some(fetch) => fetch.await,
        None => std::future::pending().await,
    }
}
