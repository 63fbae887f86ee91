//! In-memory block log.

use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use chainscan_core::{BlockLog, LogError, LogRecord};

#[derive(Default)]
struct Partition {
    base: u64,
    entries: Vec<Vec<u8>>,
    fail_appends: u32,
    fail_fetches: u32,
}

/// A single-partition [`BlockLog`] held in RAM.
///
/// Offsets start at the partition's base offset, so tests can model a log
/// whose older segments were deleted by retention.
#[derive(Default)]
pub struct MemoryBlockLog {
    partition: Mutex<Partition>,
}

impl MemoryBlockLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty log whose first append lands at `base`.
    pub fn with_base_offset(base: u64) -> Self {
        Self {
            partition: Mutex::new(Partition {
                base,
                ..Partition::default()
            }),
        }
    }

    fn partition(&self) -> MutexGuard<'_, Partition> {
        self.partition.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the next `n` appends with a backend error.
    pub fn fail_next_appends(&self, n: u32) {
        self.partition().fail_appends = n;
    }

    /// Fail the next `n` fetches with a backend error.
    pub fn fail_next_fetches(&self, n: u32) {
        self.partition().fail_fetches = n;
    }

    pub fn len(&self) -> usize {
        self.partition().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlockLog for MemoryBlockLog {
    async fn append(&self, payload: Vec<u8>) -> Result<u64, LogError> {
        let mut p = self.partition();
        if p.fail_appends > 0 {
            p.fail_appends -= 1;
            return Err(LogError::Backend("injected append failure".into()));
        }
        let offset = p.base + p.entries.len() as u64;
        p.entries.push(payload);
        Ok(offset)
    }

    async fn bounds(&self) -> Result<(u64, u64), LogError> {
        let p = self.partition();
        Ok((p.base, p.base + p.entries.len() as u64))
    }

    async fn read(&self, offset: u64) -> Result<LogRecord, LogError> {
        let p = self.partition();
        offset
            .checked_sub(p.base)
            .and_then(|i| p.entries.get(i as usize))
            .map(|payload| LogRecord {
                offset,
                payload: payload.clone(),
            })
            .ok_or_else(|| LogError::Backend(format!("offset {offset} out of range")))
    }

    async fn fetch(&self, offset: u64, max: usize) -> Result<Vec<LogRecord>, LogError> {
        let mut p = self.partition();
        if p.fail_fetches > 0 {
            p.fail_fetches -= 1;
            return Err(LogError::Backend("injected fetch failure".into()));
        }
        let start = offset.saturating_sub(p.base) as usize;
        Ok(p.entries
            .iter()
            .enumerate()
            .skip(start)
            .take(max)
            .map(|(i, payload)| LogRecord {
                offset: p.base + i as u64,
                payload: payload.clone(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainscan_core::codec::encode_block;
    use chainscan_core::Block;

    fn encoded(height: u64) -> Vec<u8> {
        encode_block(&Block {
            height,
            timestamp: 0,
            proposer: "p".into(),
            txs: vec![],
        })
        .unwrap()
    }

    #[tokio::test]
    async fn append_and_fetch() {
        let log = MemoryBlockLog::new();
        for h in 1..=5 {
            assert_eq!(log.append(encoded(h)).await.unwrap(), h - 1);
        }
        assert_eq!(log.bounds().await.unwrap(), (0, 5));
        let page = log.fetch(2, 2).await.unwrap();
        assert_eq!(page.iter().map(|r| r.offset).collect::<Vec<_>>(), vec![2, 3]);
        assert!(log.fetch(5, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn last_height_of_empty_and_filled_log() {
        let log = MemoryBlockLog::with_base_offset(40);
        assert!(matches!(log.last_height().await, Err(LogError::Empty)));
        log.append(encoded(7)).await.unwrap();
        log.append(encoded(8)).await.unwrap();
        assert_eq!(log.last_height().await.unwrap(), 8);
        assert_eq!(log.read(41).await.unwrap().offset, 41);
        assert!(log.read(39).await.is_err());
    }

    #[tokio::test]
    async fn injected_failures_are_transient() {
        let log = MemoryBlockLog::new();
        log.fail_next_appends(1);
        let err = log.append(encoded(1)).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(log.append(encoded(1)).await.unwrap(), 0);
        assert_eq!(log.len(), 1);
    }
}
