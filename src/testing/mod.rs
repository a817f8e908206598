//! Test doubles and scenario tests.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Testing Kit                              │
//! │                                                                 │
//! │  ┌──────────────────────┐          ┌─────────────────────────┐  │
//! │  │      MemoryWal       │  entries │   RecordingSubscriber   │  │
//! │  │  - append / commit   │ ───────► │  - records applies      │  │
//! │  │  - compaction        │          │  - injected failures    │  │
//! │  │  - read failures     │ snapshot │  - held applies         │  │
//! │  │  - install requests  │ ───────► │  - concurrency probe    │  │
//! │  └──────────────────────┘          └─────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use kvrange::testing::{MemoryWal, RecordingSubscriber};
//!
//! let wal = MemoryWal::new(RangeId::new(1, 0));
//! wal.append_n(10);
//! let subscriber = RecordingSubscriber::new();
//! let subscription = WalSubscription::start(
//!     WalSubscriptionConfig::default(),
//!     wal.clone(),
//!     wal.commit_receiver(),
//!     0,
//!     subscriber.clone(),
//! )?;
//! wal.commit_all();
//! ```

mod memory_wal;
mod subscriber;
pub mod utils;

mod keyspace_tests;

pub use memory_wal::MemoryWal;
pub use subscriber::RecordingSubscriber;

#[cfg(test)]
mod tests {
    use super::utils::{wait_for, wait_for_async};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_for() {
        let flag = Arc::new(AtomicBool::new(false));
        let flag_clone = flag.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            flag_clone.store(true, Ordering::Relaxed);
        });

        let result = wait_for(
            || flag.load(Ordering::Relaxed),
            Duration::from_millis(500),
            Duration::from_millis(5),
        )
        .await;
        assert!(result);
    }

    #[tokio::test]
    async fn test_wait_for_async_times_out() {
        let result = wait_for_async(
            || async { false },
            Duration::from_millis(20),
            Duration::from_millis(5),
        )
        .await;
        assert!(!result);
    }
}
