//! Block source errors.

use chainscan_core::{LogError, NodeError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    /// The node or log could not be reached while constructing a source.
    #[error("failed to connect: {0}")]
    Connect(String),

    #[error(transparent)]
    Node(#[from] NodeError),

    #[error(transparent)]
    Log(#[from] LogError),

    /// A group this task was reading from stopped with an error.
    #[error("upstream group failed: {0}")]
    Upstream(String),

    /// The source or group was closed, or the consumer went away.
    #[error("block source closed")]
    Closed,

    #[error("giving up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<SourceError> },
}

impl SourceError {
    /// Returns `true` for failures that may succeed when retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Node(_) => true,
            Self::Log(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Returns `true` if the error only signals a shutdown.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}
