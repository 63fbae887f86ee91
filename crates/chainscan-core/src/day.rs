//! Day buckets: the aggregation window key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const SECS_PER_DAY: i64 = 86_400;

/// Unix time of UTC midnight on the date of a block timestamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DayBucket(i64);

impl DayBucket {
    /// Bucket a unix timestamp (seconds) into its UTC day.
    pub fn from_timestamp(secs: i64) -> Self {
        let midnight = DateTime::<Utc>::from_timestamp(secs, 0)
            .and_then(|t| t.date_naive().and_hms_opt(0, 0, 0))
            .map(|d| d.and_utc().timestamp())
            // outside chrono's range: plain arithmetic gives the same answer
            .unwrap_or_else(|| secs.div_euclid(SECS_PER_DAY) * SECS_PER_DAY);
        Self(midnight)
    }

    /// Wrap a value that is already a midnight epoch second (e.g. read back from storage).
    pub fn from_epoch(secs: i64) -> Self {
        Self(secs)
    }

    /// Epoch second of the bucket's midnight.
    pub fn epoch(&self) -> i64 {
        self.0
    }

    /// The bucket following this one.
    pub fn next(&self) -> Self {
        Self(self.0 + SECS_PER_DAY)
    }
}

impl std::fmt::Display for DayBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match DateTime::<Utc>::from_timestamp(self.0, 0) {
            Some(t) => write!(f, "{}", t.format("%Y-%m-%d")),
            None => write!(f, "{}", self.0),
        }
    }
}
