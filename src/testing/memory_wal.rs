//! In-memory committed log for exercising WAL subscriptions.

use crate::error::{Result, WalError};
use crate::types::{LogEntry, RangeId, Snapshot};
use crate::wal::{RangeWal, SnapshotInstallTask};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Default)]
struct LogState {
    entries: VecDeque<LogEntry>,
    /// Index of the first retained entry.
    first_index: u64,
    committed: u64,
    fetch_starts: Vec<u64>,
}

/// A committed log kept in memory, with knobs for compaction and read failures.
#[derive(Debug)]
pub struct MemoryWal {
    range_id: RangeId,
    state: Mutex<LogState>,
    failing_reads: AtomicU32,
    lagging_reads: AtomicU32,
    commit_tx: Mutex<Option<mpsc::UnboundedSender<u64>>>,
    snapshot_tx: Mutex<Option<mpsc::UnboundedSender<SnapshotInstallTask>>>,
}

impl MemoryWal {
    pub fn new(range_id: RangeId) -> Arc<Self> {
        Arc::new(Self {
            range_id,
            state: Mutex::new(LogState {
                first_index: 1,
                ..Default::default()
            }),
            failing_reads: AtomicU32::new(0),
            lagging_reads: AtomicU32::new(0),
            commit_tx: Mutex::new(None),
            snapshot_tx: Mutex::new(None),
        })
    }

    /// Append an entry at the next index and return that index.
    pub fn append(&self, data: impl Into<Bytes>) -> u64 {
        let mut state = self.state.lock();
        let index = state.first_index + state.entries.len() as u64;
        state.entries.push_back(LogEntry::new(index, 1, data));
        index
    }

    /// Append `count` entries with generated payloads. Returns the last index.
    pub fn append_n(&self, count: usize) -> u64 {
        let mut last = 0;
        for _ in 0..count {
            let next = self.last_index() + 1;
            last = self.append(format!("entry-{next}"));
        }
        last
    }

    pub fn last_index(&self) -> u64 {
        let state = self.state.lock();
        state.first_index + state.entries.len() as u64 - 1
    }

    /// The commit-index stream to hand to a subscription.
    pub fn commit_receiver(&self) -> mpsc::UnboundedReceiver<u64> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.commit_tx.lock() = Some(tx);
        rx
    }

    /// Mark everything up to `index` committed and publish it.
    pub fn commit(&self, index: u64) {
        {
            let mut state = self.state.lock();
            state.committed = state.committed.max(index);
        }
        if let Some(tx) = self.commit_tx.lock().as_ref() {
            let _ = tx.send(index);
        }
    }

    /// Commit every appended entry.
    pub fn commit_all(&self) -> u64 {
        let last = self.last_index();
        self.commit(last);
        last
    }

    /// Drop every entry up to and including `index`.
    pub fn compact(&self, index: u64) {
        let mut state = self.state.lock();
        while state.entries.front().is_some_and(|e| e.index <= index) {
            state.entries.pop_front();
        }
        state.first_index = state.first_index.max(index + 1);
    }

    /// Make the next `count` reads fail with a transient error.
    pub fn fail_next_reads(&self, count: u32) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` reads return no entries, like a log replica that
    /// has not caught up with the published commit index yet.
    pub fn lag_next_reads(&self, count: u32) {
        self.lagging_reads.store(count, Ordering::SeqCst);
    }

    /// Every `from_index` a read was attempted with, in order.
    pub fn fetch_starts(&self) -> Vec<u64> {
        self.state.lock().fetch_starts.clone()
    }

    /// Ask the subscriber to install `snapshot`.
    pub fn request_install(
        &self,
        snapshot: Snapshot,
        leader: &str,
    ) -> oneshot::Receiver<Result<Snapshot>> {
        let (task, done_rx) = SnapshotInstallTask::new(snapshot, leader);
        if let Some(tx) = self.snapshot_tx.lock().as_ref() {
            let _ = tx.send(task);
        }
        done_rx
    }
}

#[async_trait]
impl RangeWal for MemoryWal {
    fn range_id(&self) -> RangeId {
        self.range_id
    }

    async fn retrieve_committed(&self, from_index: u64, max_bytes: u64) -> Result<Vec<LogEntry>> {
        let mut state = self.state.lock();
        state.fetch_starts.push(from_index);

        let failing = self.failing_reads.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_reads.store(failing - 1, Ordering::SeqCst);
            return Err(WalError::Read("injected read failure".into()).into());
        }
        let lagging = self.lagging_reads.load(Ordering::SeqCst);
        if lagging > 0 {
            self.lagging_reads.store(lagging - 1, Ordering::SeqCst);
            return Ok(Vec::new());
        }
        if from_index < state.first_index {
            return Err(WalError::Compacted {
                requested: from_index,
                first_index: state.first_index,
            }
            .into());
        }

        let mut batch = Vec::new();
        let mut bytes = 0;
        let committed = state.committed;
        for entry in state
            .entries
            .iter()
            .filter(|e| e.index >= from_index && e.index <= committed)
        {
            if !batch.is_empty() && bytes + entry.size() > max_bytes {
                break;
            }
            bytes += entry.size();
            batch.push(entry.clone());
        }
        Ok(batch)
    }

    fn subscribe_snapshot_tasks(&self) -> mpsc::UnboundedReceiver<SnapshotInstallTask> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.snapshot_tx.lock() = Some(tx);
        rx
    }
}
