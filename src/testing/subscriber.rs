//! A state machine stand-in that records what a WAL subscription feeds it.

use crate::error::{Result, WalError};
use crate::types::{LogEntry, Snapshot};
use crate::wal::{SubscriptionHandle, WalSubscriber};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Records applies and installs, and can fail or hold them on demand.
#[derive(Debug)]
pub struct RecordingSubscriber {
    applied: Mutex<Vec<u64>>,
    attempts: Mutex<Vec<u64>>,
    installed: Mutex<Vec<Snapshot>>,
    failures: Mutex<HashMap<u64, u32>>,
    install_error: Mutex<Option<String>>,
    held: Mutex<Option<u64>>,
    gate: watch::Sender<bool>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    handle: Mutex<Option<SubscriptionHandle>>,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RecordingSubscriber {
    pub fn new() -> Arc<Self> {
        let (gate, _) = watch::channel(true);
        Arc::new(Self {
            applied: Mutex::new(Vec::new()),
            attempts: Mutex::new(Vec::new()),
            installed: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            install_error: Mutex::new(None),
            held: Mutex::new(None),
            gate,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            handle: Mutex::new(None),
        })
    }

    /// Indexes applied successfully, in order.
    pub fn applied(&self) -> Vec<u64> {
        self.applied.lock().clone()
    }

    /// Indexes of every apply attempt, in order.
    pub fn attempts(&self) -> Vec<u64> {
        self.attempts.lock().clone()
    }

    pub fn installed(&self) -> Vec<Snapshot> {
        self.installed.lock().clone()
    }

    /// Highest number of applies or installs observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// The handle received through `on_subscribe`.
    pub fn handle(&self) -> Option<SubscriptionHandle> {
        self.handle.lock().clone()
    }

    /// Fail the next `times` applies of `index`.
    pub fn fail_apply(&self, index: u64, times: u32) {
        self.failures.lock().insert(index, times);
    }

    /// Fail every install with `reason`.
    pub fn fail_installs(&self, reason: &str) {
        *self.install_error.lock() = Some(reason.to_string());
    }

    /// Make the apply of `index` wait until [`release`](Self::release).
    pub fn hold(&self, index: u64) {
        *self.held.lock() = Some(index);
        self.gate.send_replace(false);
    }

    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(&self.in_flight)
    }
}

#[async_trait]
impl WalSubscriber for RecordingSubscriber {
    fn on_subscribe(&self, handle: SubscriptionHandle) {
        *self.handle.lock() = Some(handle);
    }

    async fn apply(&self, entry: &LogEntry) -> Result<()> {
        let _in_flight = self.enter();
        self.attempts.lock().push(entry.index);

        let held = *self.held.lock() == Some(entry.index);
        if held {
            let mut gate = self.gate.subscribe();
            loop {
                let open = *gate.borrow_and_update();
                if open || gate.changed().await.is_err() {
                    break;
                }
            }
        }

        {
            let mut failures = self.failures.lock();
            if let Some(remaining) = failures.get_mut(&entry.index) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(WalError::ApplyFailed {
                        index: entry.index,
                        reason: "injected apply failure".into(),
                    }
                    .into());
                }
            }
        }

        self.applied.lock().push(entry.index);
        Ok(())
    }

    async fn install(&self, snapshot: &Snapshot, _leader: &str) -> Result<Snapshot> {
        let _in_flight = self.enter();
        if let Some(reason) = self.install_error.lock().clone() {
            return Err(WalError::InstallFailed(reason).into());
        }
        self.installed.lock().push(snapshot.clone());
        Ok(snapshot.clone())
    }
}
