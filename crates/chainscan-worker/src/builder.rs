//! Fluent builder for [`ScanConfig`].
//!
//! # Example
//!
//! ```rust
//! use chainscan_core::SourceKind;
//! use chainscan_worker::ScanConfigBuilder;
//!
//! let config = ScanConfigBuilder::new()
//!     .group_id("daily-scan")
//!     .source(SourceKind::Log)
//!     .channel_capacity(200)
//!     .fetch_batch(500)
//!     .build_config();
//! assert_eq!(config.poll.channel_capacity, 200);
//! ```

use chainscan_core::{RetryConfig, ScanConfig, SourceKind, SupplyAccounts};

/// Fluent builder for `ScanConfig`.
#[derive(Default)]
pub struct ScanConfigBuilder {
    config: ScanConfig,
}

impl ScanConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ScanConfig::default(),
        }
    }

    /// Set the consumer group the scan reads under.
    pub fn group_id(mut self, id: impl Into<String>) -> Self {
        self.config.group_id = id.into();
        self
    }

    /// Read from the node directly or replay from the block log.
    pub fn source(mut self, kind: SourceKind) -> Self {
        self.config.source = kind;
        self
    }

    /// Set the per-group block channel capacity.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.poll.channel_capacity = capacity;
        self
    }

    /// Set how often a caught-up group re-checks the node head.
    pub fn head_poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll.head_poll_interval_ms = ms;
        self
    }

    /// Log progress every N blocks while catching up.
    pub fn milestone_interval(mut self, n: u64) -> Self {
        self.config.poll.milestone_interval = n;
        self
    }

    /// Backoff for node calls.
    pub fn node_retry(mut self, retry: RetryConfig) -> Self {
        self.config.poll.retry = retry;
        self
    }

    /// Set the number of log entries read per fetch.
    pub fn fetch_batch(mut self, n: usize) -> Self {
        self.config.replay.fetch_batch = n;
        self
    }

    pub fn tail_poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.replay.tail_poll_interval_ms = ms;
        self
    }

    /// Backoff for log reads and appends.
    pub fn log_retry(mut self, retry: RetryConfig) -> Self {
        self.config.replay.retry = retry;
        self
    }

    /// Backoff while waiting for the start height to reach the log.
    pub fn offset_retry(mut self, retry: RetryConfig) -> Self {
        self.config.replay.offset_retry = retry;
        self
    }

    pub fn producer_group(mut self, id: impl Into<String>) -> Self {
        self.config.replay.producer_group = id.into();
        self
    }

    /// Set the number of finished days that may wait for commit.
    pub fn commit_queue(mut self, capacity: usize) -> Self {
        self.config.commit.queue_capacity = capacity;
        self
    }

    pub fn accounts(mut self, accounts: SupplyAccounts) -> Self {
        self.config.accounts = accounts;
        self
    }

    /// Build the `ScanConfig`.
    pub fn build_config(self) -> ScanConfig {
        self.config
    }
}
