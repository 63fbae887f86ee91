//! Scan configuration.
//!
//! All structs deserialize with sensible defaults for every omitted field, so
//! a host can load a partial document (file, env, CLI) and fill in the rest.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::accounts::SupplyAccounts;

/// Which block source implementation backs the scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Poll the node directly.
    #[default]
    Poll,
    /// Replay from the durable block log, fed by a background producer.
    Log,
}

/// Capped exponential backoff for transient failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Give up after this many consecutive failures; `None` retries forever.
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_initial_backoff_ms() -> u64 { 1_000 }
fn default_max_backoff_ms() -> u64 { 30_000 }
fn default_multiplier() -> f64 { 2.0 }

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: None,
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl RetryConfig {
    /// Fixed-interval retry.
    pub fn fixed(interval: Duration, max_retries: Option<u32>) -> Self {
        let ms = interval.as_millis() as u64;
        Self {
            max_retries,
            initial_backoff_ms: ms,
            max_backoff_ms: ms,
            multiplier: 1.0,
        }
    }
}

/// Direct-poll source settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollConfig {
    /// Capacity of each consumer group's delivery channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Wait between head queries once the cursor has caught up.
    #[serde(default = "default_head_poll_interval_ms")]
    pub head_poll_interval_ms: u64,
    /// Log a progress line every N blocks while catching up.
    #[serde(default = "default_milestone_interval")]
    pub milestone_interval: u64,
    /// Backoff for failed node reads.
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_channel_capacity() -> usize { 100 }
fn default_head_poll_interval_ms() -> u64 { 5_000 }
// one day of 10 s blocks
fn default_milestone_interval() -> u64 { 8_640 }

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            head_poll_interval_ms: default_head_poll_interval_ms(),
            milestone_interval: default_milestone_interval(),
            retry: RetryConfig::default(),
        }
    }
}

impl PollConfig {
    pub fn head_poll_interval(&self) -> Duration {
        Duration::from_millis(self.head_poll_interval_ms)
    }
}

/// Log-backed source settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Records per log fetch.
    #[serde(default = "default_fetch_batch")]
    pub fetch_batch: usize,
    /// Wait between fetches once a group reached the log tail.
    #[serde(default = "default_tail_poll_interval_ms")]
    pub tail_poll_interval_ms: u64,
    /// Backoff while the start height is not yet in the log.
    #[serde(default = "default_offset_retry")]
    pub offset_retry: RetryConfig,
    /// Backoff for failed log appends and fetches.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Group id the producer uses on the inner poll source.
    #[serde(default = "default_producer_group")]
    pub producer_group: String,
}

fn default_fetch_batch() -> usize { 100 }
fn default_tail_poll_interval_ms() -> u64 { 1_000 }
fn default_offset_retry() -> RetryConfig {
    RetryConfig::fixed(Duration::from_secs(60), None)
}
fn default_producer_group() -> String { "log_producer".into() }

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            fetch_batch: default_fetch_batch(),
            tail_poll_interval_ms: default_tail_poll_interval_ms(),
            offset_retry: default_offset_retry(),
            retry: RetryConfig::default(),
            producer_group: default_producer_group(),
        }
    }
}

impl ReplayConfig {
    pub fn tail_poll_interval(&self) -> Duration {
        Duration::from_millis(self.tail_poll_interval_ms)
    }
}

/// Commit pipeline settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitConfig {
    /// Batches that may wait for the commit worker before the scan blocks.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_queue_capacity() -> usize { 64 }

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Top-level scan configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Consumer group the scan reads under.
    #[serde(default = "default_group_id")]
    pub group_id: String,
    #[serde(default)]
    pub source: SourceKind,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
    #[serde(default)]
    pub commit: CommitConfig,
    #[serde(default)]
    pub accounts: SupplyAccounts,
}

fn default_group_id() -> String { "chainscan".into() }

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            group_id: default_group_id(),
            source: SourceKind::default(),
            poll: PollConfig::default(),
            replay: ReplayConfig::default(),
            commit: CommitConfig::default(),
            accounts: SupplyAccounts::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ScanConfig::default();
        assert_eq!(cfg.poll.channel_capacity, 100);
        assert_eq!(cfg.poll.head_poll_interval(), Duration::from_secs(5));
        assert_eq!(cfg.poll.milestone_interval, 8_640);
        assert_eq!(cfg.commit.queue_capacity, 64);
        assert_eq!(cfg.source, SourceKind::Poll);
        assert_eq!(cfg.replay.offset_retry.initial_backoff_ms, 60_000);
    }

    #[test]
    fn partial_document_fills_defaults() {
        let cfg: ScanConfig = serde_json::from_str(
            r#"{ "source": "log", "poll": { "head_poll_interval_ms": 10 } }"#,
        )
        .unwrap();
        assert_eq!(cfg.source, SourceKind::Log);
        assert_eq!(cfg.poll.head_poll_interval_ms, 10);
        assert_eq!(cfg.poll.channel_capacity, 100);
        assert_eq!(cfg.group_id, "chainscan");
        assert!(cfg.accounts.is_treasury(crate::accounts::MAINNET_TREASURY));
    }
}
