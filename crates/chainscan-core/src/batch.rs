//! The unit of work handed from the scan to the commit pipeline.

use serde::{Deserialize, Serialize};

use crate::day::DayBucket;
use crate::merger::TxAggregate;
use crate::state::NetworkStatus;

/// Everything one finished day produced.
///
/// Built once at day rotation and moved into the commit pipeline; nothing
/// mutates it afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitBatch {
    height: u64,
    head_height: u64,
    day: DayBucket,
    aggregate: TxAggregate,
    status: NetworkStatus,
}

impl CommitBatch {
    pub fn new(
        height: u64,
        head_height: u64,
        day: DayBucket,
        aggregate: TxAggregate,
        status: NetworkStatus,
    ) -> Self {
        Self {
            height,
            head_height,
            day,
            aggregate,
            status,
        }
    }

    /// Height of the last block folded into this day. Resuming scans start
    /// at `height + 1`.
    pub fn height(&self) -> u64 {
        self.height
    }

    /// Chain head observed when the scan started.
    pub fn head_height(&self) -> u64 {
        self.head_height
    }

    pub fn day(&self) -> DayBucket {
        self.day
    }

    pub fn aggregate(&self) -> &TxAggregate {
        &self.aggregate
    }

    pub fn status(&self) -> &NetworkStatus {
        &self.status
    }

    /// Scan progress in percent of the head height.
    pub fn progress(&self) -> f64 {
        if self.head_height == 0 {
            return 100.0;
        }
        self.height as f64 / self.head_height as f64 * 100.0
    }
}
