//! Error types for the range replication and routing core.

use thiserror::Error;

/// Result type alias for range core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type.
#[derive(Error, Debug)]
pub enum Error {
    /// WAL read/apply/install errors.
    #[error("wal error: {0}")]
    Wal(#[from] WalError),

    /// Balancer and command submission errors.
    #[error("balance error: {0}")]
    Balance(#[from] BalanceError),

    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// The owning component has been stopped.
    #[error("stopped")]
    Stopped,

    /// Encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Generic internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this is an out-of-range read caused by log compaction.
    pub fn is_compaction(&self) -> bool {
        matches!(self, Error::Wal(WalError::Compacted { .. }))
    }

    /// Whether this error represents a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// Errors raised by the committed log and the state machine consuming it.
#[derive(Error, Debug)]
pub enum WalError {
    /// The requested index has been compacted away.
    #[error("log compacted: requested index {requested}, first available {first_index}")]
    Compacted { requested: u64, first_index: u64 },

    /// Any other read failure.
    #[error("read failed: {0}")]
    Read(String),

    /// The subscriber failed to apply an entry.
    #[error("failed to apply index {index}: {reason}")]
    ApplyFailed { index: u64, reason: String },

    /// The subscriber failed to install a snapshot.
    #[error("snapshot install failed: {0}")]
    InstallFailed(String),
}

/// Errors raised around balance command handling.
#[derive(Error, Debug)]
pub enum BalanceError {
    /// The command sink refused the command.
    #[error("command rejected: {0}")]
    SinkRejected(String),

    /// A command addressed a store that is not in the current snapshot.
    #[error("unknown store: {0}")]
    UnknownStore(String),
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compaction_classification() {
        let err: Error = WalError::Compacted {
            requested: 3,
            first_index: 10,
        }
        .into();
        assert!(err.is_compaction());
        assert!(err.to_string().contains("requested index 3"));

        let err: Error = WalError::Read("io".into()).into();
        assert!(!err.is_compaction());
        assert!(Error::Cancelled.is_cancelled());
    }
}
