//! Durable block log port.
//!
//! The log is a single append-only partition of encoded blocks (see
//! [`codec`](crate::codec)). Offsets are dense: every offset in
//! `[low, high)` holds exactly one record.

use async_trait::async_trait;

use crate::codec;
use crate::error::LogError;

/// One entry read back from the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub offset: u64,
    pub payload: Vec<u8>,
}

#[async_trait]
pub trait BlockLog: Send + Sync {
    /// Append an encoded block. Returns the offset it was written at.
    async fn append(&self, payload: Vec<u8>) -> Result<u64, LogError>;

    /// Offset range `[low, high)` currently readable.
    async fn bounds(&self) -> Result<(u64, u64), LogError>;

    /// Read the record at `offset`.
    async fn read(&self, offset: u64) -> Result<LogRecord, LogError>;

    /// Read up to `max` records starting at `offset`. An empty result means
    /// the reader is at the tail.
    async fn fetch(&self, offset: u64, max: usize) -> Result<Vec<LogRecord>, LogError>;

    /// Height of the newest block in the log, [`LogError::Empty`] if none.
    async fn last_height(&self) -> Result<u64, LogError> {
        let (low, high) = self.bounds().await?;
        if high <= low {
            return Err(LogError::Empty);
        }
        let record = self.read(high - 1).await?;
        codec::peek_height(&record.payload)
    }
}
