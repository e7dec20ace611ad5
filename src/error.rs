use std::io;
use thiserror::Error;

/// Failure of the durable medium beneath the event log or state store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The underlying file operation failed.
    #[error("storage I/O failure: {0}")]
    Io(#[from] io::Error),

    /// A log record could not be decoded.
    #[error("corrupt log record at byte {offset}: {source}")]
    Corrupt {
        offset: u64,
        #[source]
        source: serde_json::Error,
    },

    /// A sequence was missing or repeated where the log guarantees neither.
    #[error("log sequence discontinuity: expected {expected}, found {found}")]
    SequenceGap { expected: u64, found: u64 },

    /// The medium cannot make progress at all. Halts ingestion.
    #[error("unrecoverable storage condition: {0}")]
    Unrecoverable(String),
}

impl StorageError {
    /// Whether ingestion must halt rather than skip-and-continue.
    ///
    /// Disk exhaustion and a read-only filesystem cannot be outwaited;
    /// anything else is treated as transient on the append path.
    pub fn is_fatal(&self) -> bool {
        match self {
            StorageError::Unrecoverable(_) => true,
            StorageError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::StorageFull | io::ErrorKind::ReadOnlyFilesystem
            ),
            _ => false,
        }
    }
}

/// Failure of an event source feeding the ingestion pipeline.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Transient loss of the transport. The pipeline reconnects with backoff.
    #[error("event source disconnected: {0}")]
    Disconnected(String),

    /// The source cannot recover. Halts ingestion.
    #[error("event source failed: {0}")]
    Fatal(String),
}

/// A single failed delivery attempt to a sink.
///
/// Dispatch workers retry these up to the configured ceiling; the error
/// itself carries no retry state.
#[derive(Debug, Error)]
#[error("publish failed: {0}")]
pub struct DispatchError(pub String);

/// Fatal termination of the ingestion pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("event source failed: {0}")]
    Source(#[from] SourceError),

    #[error("event log failure: {0}")]
    Storage(#[from] StorageError),
}
