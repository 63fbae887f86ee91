//! Scan and commit errors.

use chainscan_core::{AggregateError, CommitPart, DayBucket, StoreError};
use chainscan_source::SourceError;
use thiserror::Error;

/// Errors raised by the [`CommitPipeline`](crate::commit::CommitPipeline).
#[derive(Debug, Error)]
pub enum CommitError {
    /// One part of a day's commit failed. Other parts of the same commit may
    /// have been written.
    #[error("failed to write {part} for {day}: {source}")]
    Write {
        part: CommitPart,
        day: DayBucket,
        #[source]
        source: StoreError,
    },

    #[error("commit pipeline stopped")]
    Stopped,
}

/// Terminal errors of a [`ScanWorker`](crate::scan::ScanWorker) run.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("node is pruned; scanning needs full history")]
    Pruned,

    #[error("block source error: {0}")]
    Source(#[from] SourceError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Commit(#[from] CommitError),

    #[error("integrity error: {0}")]
    Integrity(#[from] AggregateError),

    #[error("panic while folding block {height}: {message}")]
    Panicked { height: u64, message: String },

    #[error("scan cancelled")]
    Cancelled,

    /// The block channel ended before the scan reached the head it started with.
    #[error("block stream ended at height {height} before reaching head {head}: {reason}")]
    SourceClosed { height: u64, head: u64, reason: String },
}

impl ScanError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
