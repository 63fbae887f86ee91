//! Offset lookup over the block log.
//!
//! The log is ordered by height, possibly with duplicates left behind by
//! producer retries, so a binary search over its single partition finds the
//! leftmost entry for a height.

use std::cmp::Ordering;

use chainscan_core::{codec, BlockLog, LogError, LogRecord};

/// Leftmost offset in `[low, high)` whose record compares
/// [`Ordering::Equal`].
///
/// `cmp` reports how the peeked record relates to the target: `Less` means
/// the record sorts before it.
pub async fn find_offset<F>(log: &dyn BlockLog, mut cmp: F) -> Result<u64, LogError>
where
    F: FnMut(&LogRecord) -> Result<Ordering, LogError>,
{
    let (low, high) = log.bounds().await?;
    if high <= low {
        return Err(LogError::Empty);
    }

    let (mut left, mut right) = (low, high);
    let mut found = None;
    while left < right {
        let mid = left + (right - left) / 2;
        let record = log.read(mid).await?;
        match cmp(&record)? {
            Ordering::Less => left = mid + 1,
            Ordering::Greater => right = mid,
            Ordering::Equal => {
                found = Some(mid);
                right = mid;
            }
        }
    }
    found.ok_or(LogError::NotFound { height: 0 })
}

/// Offset of the first log entry holding the block at `height`.
pub async fn find_offset_by_height(log: &dyn BlockLog, height: u64) -> Result<u64, LogError> {
    let res = find_offset(log, |record| {
        let peeked = codec::peek_height(&record.payload)?;
        Ok(peeked.cmp(&height))
    })
    .await;
    match res {
        Err(LogError::NotFound { .. }) => Err(LogError::NotFound { height }),
        other => other,
    }
}
