//! Error types shared by the aggregation core and the collaborator ports.

use thiserror::Error;

use crate::day::DayBucket;

/// Integrity errors raised while folding transactions into a [`TxAggregate`].
///
/// [`TxAggregate`]: crate::merger::TxAggregate
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregateError {
    #[error("unbond record already exists for validator {validator} on day {day}")]
    DuplicateUnbond { day: DayBucket, validator: String },
}

/// Errors returned by a [`BlockLog`](crate::log::BlockLog) and the offset lookup.
#[derive(Debug, Error)]
pub enum LogError {
    /// The log holds no entries yet.
    #[error("block log is empty")]
    Empty,

    /// No entry with the requested height is present (yet).
    #[error("height {height} not found in block log")]
    NotFound { height: u64 },

    /// Replay observed a height jump; entries between are missing.
    #[error("gap in block log: expected height {expected}, found {found}")]
    Gap { expected: u64, found: u64 },

    /// An entry could not be encoded or decoded.
    #[error("log codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Broker / transport failure in the log client.
    #[error("log backend error: {0}")]
    Backend(String),
}

impl LogError {
    /// Returns `true` when retrying later can succeed (log still catching up
    /// or a transient backend failure).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Empty | Self::NotFound { .. } | Self::Backend(_))
    }
}

/// Errors returned by a [`NodeClient`](crate::node::NodeClient).
#[derive(Debug, Clone, Error)]
pub enum NodeError {
    #[error("node unreachable: {0}")]
    Unreachable(String),

    #[error("node RPC error: {0}")]
    Rpc(String),

    #[error("block {height} not available on node")]
    BlockNotFound { height: u64 },
}

/// Errors returned by a [`ChainStore`](crate::store::ChainStore).
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Backend(String),

    #[error("stored record is malformed: {0}")]
    Corrupt(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_error_retryable() {
        assert!(LogError::Empty.is_retryable());
        assert!(LogError::NotFound { height: 7 }.is_retryable());
        assert!(!LogError::Gap { expected: 3, found: 5 }.is_retryable());
    }

    #[test]
    fn duplicate_unbond_message() {
        let err = AggregateError::DuplicateUnbond {
            day: DayBucket::from_timestamp(86_400),
            validator: "pc1p-val".into(),
        };
        assert!(err.to_string().contains("pc1p-val"));
    }
}
