//! Log-backed block source.
//!
//! One background producer keeps the durable block log current by polling
//! the node; every consumer group replays from the log. The producer starts
//! with the first group that is read and is shared by all of them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chainscan_core::{codec, BlockLog, ChainInfo, LogError, NodeClient, PollConfig, ReplayConfig};
use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::SourceError;
use crate::group::{lock, ConsumerGroup, GroupFeed, GroupLauncher, GroupRegistry};
use crate::offset::find_offset_by_height;
use crate::poll::PollSource;
use crate::retry::RetryPolicy;
use crate::source::BlockSource;

pub struct LogSource {
    poll: Arc<PollSource>,
    registry: Arc<GroupRegistry>,
    launcher: Arc<ReplayLauncher>,
}

impl LogSource {
    /// Read the log's newest height and connect the inner poll source.
    ///
    /// An empty log starts the producer at height 1. Any other log error, or
    /// a node that cannot be reached, is fatal.
    pub async fn connect(
        node: Arc<dyn NodeClient>,
        log: Arc<dyn BlockLog>,
        poll: PollConfig,
        replay: ReplayConfig,
    ) -> Result<Self, SourceError> {
        let last_height = match log.last_height().await {
            Ok(height) => {
                info!(height, "last block in log");
                height
            }
            Err(LogError::Empty) => {
                info!("block log is empty");
                0
            }
            Err(e) => return Err(e.into()),
        };

        let registry = GroupRegistry::new(poll.channel_capacity);
        let poll = Arc::new(PollSource::connect(node, poll).await?);
        let producer = Arc::new(Producer {
            poll: poll.clone(),
            log: log.clone(),
            config: replay.clone(),
            start_height: last_height + 1,
            next_height: AtomicU64::new(last_height + 1),
            cancel: registry.cancel_token().child_token(),
            handle: Mutex::new(None),
            failure: Mutex::new(None),
        });

        Ok(Self {
            poll,
            registry,
            launcher: Arc::new(ReplayLauncher {
                log,
                config: replay,
                producer,
            }),
        })
    }

    /// Height the producer appends from.
    pub fn producer_start_height(&self) -> u64 {
        self.launcher.producer.start_height
    }

    pub fn is_producer_running(&self) -> bool {
        self.launcher.producer.is_running()
    }

    /// Why the producer last stopped, if it failed.
    pub fn producer_error(&self) -> Option<String> {
        lock(&self.launcher.producer.failure).clone()
    }
}

#[async_trait]
impl BlockSource for LogSource {
    async fn blockchain_info(&self) -> Result<ChainInfo, SourceError> {
        self.poll.blockchain_info().await
    }

    fn create_group(&self, start_height: u64, id: &str) -> (Arc<ConsumerGroup>, bool) {
        self.registry
            .load_or_store(id, start_height, self.launcher.clone())
    }

    fn close(&self) {
        if !self.registry.cancel_token().is_cancelled() {
            info!("closing log source");
        }
        self.registry.close_all();
        self.poll.close();
    }
}

impl Drop for LogSource {
    fn drop(&mut self) {
        self.registry.close_all();
        self.poll.close();
    }
}

// ─── Producer ─────────────────────────────────────────────────────────────────

struct Producer {
    poll: Arc<PollSource>,
    log: Arc<dyn BlockLog>,
    config: ReplayConfig,
    start_height: u64,
    next_height: AtomicU64,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
    failure: Mutex<Option<String>>,
}

impl Producer {
    fn is_running(&self) -> bool {
        let handle = lock(&self.handle);
        lock(&self.failure).is_none() && handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Start the producer, or restart it after it stopped.
    fn ensure_started(self: &Arc<Self>) {
        if self.cancel.is_cancelled() {
            return;
        }
        let mut handle = lock(&self.handle);
        // a recorded failure means produce() already returned
        match lock(&self.failure).take() {
            Some(reason) => info!(reason = %reason, "restarting log producer"),
            None if handle.as_ref().is_some_and(|h| !h.is_finished()) => return,
            None => {}
        }
        let this = self.clone();
        *handle = Some(tokio::spawn(async move {
            match this.produce().await {
                Ok(()) => info!("log producer stopped"),
                Err(e) if e.is_closed() => info!("log producer stopped"),
                Err(e) => {
                    error!(error = %e, "log producer failed");
                    *lock(&this.failure) = Some(e.to_string());
                }
            }
        }));
    }

    /// Fails once the producer has stopped with an error.
    fn check(&self) -> Result<(), SourceError> {
        match lock(&self.failure).as_ref() {
            Some(reason) => Err(SourceError::Upstream(format!("log producer failed: {reason}"))),
            None => Ok(()),
        }
    }

    async fn produce(&self) -> Result<(), SourceError> {
        let start = self.next_height.load(Ordering::SeqCst);
        let (group, _) = self.poll.create_group(start, &self.config.producer_group);
        info!(start, "log producer started");
        let res = self.append_from(&group).await;
        // a restarted producer opens a fresh group at its new height
        group.close();
        res
    }

    async fn append_from(&self, group: &ConsumerGroup) -> Result<(), SourceError> {
        let rx = group.read();
        let retry = RetryPolicy::new(self.config.retry.clone());

        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                b = rx.recv() => b,
            };
            let Some(block) = next else {
                return match group.last_error() {
                    Some(reason) => Err(SourceError::Upstream(reason)),
                    None => Ok(()),
                };
            };

            let height = block.height;
            let payload = codec::encode_block(&block)?;
            let offset = retry
                .run(&self.cancel, "log_append", || {
                    let log = self.log.clone();
                    let payload = payload.clone();
                    async move { log.append(payload).await.map_err(SourceError::from) }
                })
                .await?;
            self.next_height.store(height + 1, Ordering::SeqCst);
            debug!(height, offset, "block appended to log");
        }
    }
}

// ─── Replay ───────────────────────────────────────────────────────────────────

struct ReplayLauncher {
    log: Arc<dyn BlockLog>,
    config: ReplayConfig,
    producer: Arc<Producer>,
}

impl GroupLauncher for ReplayLauncher {
    fn launch(&self, feed: GroupFeed) -> BoxFuture<'static, Result<(), SourceError>> {
        self.producer.ensure_started();
        Box::pin(replay_blocks(
            self.log.clone(),
            self.config.clone(),
            self.producer.clone(),
            feed,
        ))
    }
}

async fn replay_blocks(
    log: Arc<dyn BlockLog>,
    config: ReplayConfig,
    producer: Arc<Producer>,
    feed: GroupFeed,
) -> Result<(), SourceError> {
    let cancel = feed.cancel_token().clone();
    let start = feed.start_height();

    let lookup = RetryPolicy::new(config.offset_retry.clone());
    let mut offset = lookup
        .run(&cancel, "find_offset", || {
            let log = log.clone();
            let producer = producer.clone();
            async move {
                // the start height can only reach the log through the producer
                producer.check()?;
                find_offset_by_height(log.as_ref(), start)
                    .await
                    .map_err(SourceError::from)
            }
        })
        .await?;
    info!(group = feed.id(), start, offset, "replaying block log");

    let retry = RetryPolicy::new(config.retry.clone());
    let mut expected = start;
    loop {
        let from = offset;
        let records = retry
            .run(&cancel, "log_fetch", || {
                let log = log.clone();
                let max = config.fetch_batch;
                async move { log.fetch(from, max).await.map_err(SourceError::from) }
            })
            .await?;

        if records.is_empty() {
            if !feed.is_slow_mode() {
                feed.set_slow_mode();
                info!(group = feed.id(), height = expected.saturating_sub(1), "reached log tail");
            }
            producer.check()?;
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(config.tail_poll_interval()) => continue,
            }
        }

        for record in records {
            offset = record.offset + 1;
            let block = codec::decode_block(&record.payload)?;
            if block.height < expected {
                debug!(group = feed.id(), height = block.height, "skipping duplicate log entry");
                continue;
            }
            if block.height > expected {
                return Err(LogError::Gap {
                    expected,
                    found: block.height,
                }
                .into());
            }
            feed.send(block).await?;
            expected += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chainscan_core::{codec::encode_block, Block, RetryConfig};
    use chainscan_storage::{MemoryBlockLog, MemoryNode};

    use crate::group::BlockReceiver;

    fn block(height: u64) -> Block {
        Block {
            height,
            timestamp: height as i64 * 10,
            proposer: "p".into(),
            txs: vec![],
        }
    }

    fn configs() -> (PollConfig, ReplayConfig) {
        let fast = RetryConfig::fixed(Duration::from_millis(1), None);
        (
            PollConfig {
                head_poll_interval_ms: 10,
                retry: fast.clone(),
                ..PollConfig::default()
            },
            ReplayConfig {
                tail_poll_interval_ms: 10,
                offset_retry: RetryConfig::fixed(Duration::from_millis(10), None),
                retry: fast,
                ..ReplayConfig::default()
            },
        )
    }

    async fn log_with(heights: &[u64]) -> Arc<MemoryBlockLog> {
        let log = Arc::new(MemoryBlockLog::new());
        for h in heights {
            log.append(encode_block(&block(*h)).unwrap()).await.unwrap();
        }
        log
    }

    async fn connect(node: Arc<MemoryNode>, log: Arc<MemoryBlockLog>) -> LogSource {
        let (poll, replay) = configs();
        LogSource::connect(node, log, poll, replay).await.unwrap()
    }

    async fn next(rx: &BlockReceiver) -> Option<Block> {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for a block")
    }

    #[tokio::test]
    async fn producer_resumes_after_last_durable_height() {
        let node = Arc::new(MemoryNode::with_blocks((1..=6).map(block)));
        let log = log_with(&[1, 2, 3]).await;
        let source = connect(node, log.clone()).await;
        assert_eq!(source.producer_start_height(), 4);
        assert!(!source.is_producer_running());

        let (group, _) = source.create_group(2, "reader");
        let rx = group.read();
        assert!(source.is_producer_running());
        for h in 2..=6 {
            assert_eq!(next(&rx).await.unwrap().height, h);
        }
        assert_eq!(log.len(), 6);
        source.close();
    }

    #[tokio::test]
    async fn empty_log_starts_at_one() {
        let node = Arc::new(MemoryNode::with_blocks((1..=3).map(block)));
        let source = connect(node, Arc::new(MemoryBlockLog::new())).await;
        assert_eq!(source.producer_start_height(), 1);

        // the offset lookup retries until the producer filled the log
        let (group, _) = source.create_group(1, "reader");
        let rx = group.read();
        for h in 1..=3 {
            assert_eq!(next(&rx).await.unwrap().height, h);
        }
    }

    #[tokio::test]
    async fn groups_share_one_producer() {
        let node = Arc::new(MemoryNode::with_blocks((1..=4).map(block)));
        let log = Arc::new(MemoryBlockLog::new());
        let source = connect(node.clone(), log.clone()).await;
        let (a, _) = source.create_group(1, "a");
        let (b, _) = source.create_group(3, "b");
        let (rx_a, rx_b) = (a.read(), b.read());
        for h in 1..=4 {
            assert_eq!(next(&rx_a).await.unwrap().height, h);
        }
        for h in 3..=4 {
            assert_eq!(next(&rx_b).await.unwrap().height, h);
        }
        // every block was fetched from the node once
        assert_eq!(node.block_calls(), 4);
        assert_eq!(log.len(), 4);
    }

    #[tokio::test]
    async fn replay_skips_duplicate_entries() {
        let node = Arc::new(MemoryNode::with_blocks((1..=3).map(block)));
        let log = log_with(&[1, 2, 2, 3, 3]).await;
        let source = connect(node, log).await;
        let (group, _) = source.create_group(1, "reader");
        let rx = group.read();
        for h in 1..=3 {
            assert_eq!(next(&rx).await.unwrap().height, h);
        }
        source.close();
        assert!(next(&rx).await.is_none());
        assert!(group.last_error().is_none());
    }

    #[tokio::test]
    async fn replay_fails_on_gap() {
        let node = Arc::new(MemoryNode::with_blocks((1..=4).map(block)));
        let log = log_with(&[1, 2, 4]).await;
        let source = connect(node, log).await;
        let (group, _) = source.create_group(1, "reader");
        let rx = group.read();
        assert_eq!(next(&rx).await.unwrap().height, 1);
        assert_eq!(next(&rx).await.unwrap().height, 2);
        assert!(next(&rx).await.is_none());
        let reason = group.last_error().unwrap();
        assert!(reason.contains("gap"), "{reason}");
    }

    #[tokio::test]
    async fn append_failures_are_retried() {
        let node = Arc::new(MemoryNode::with_blocks((1..=3).map(block)));
        let log = Arc::new(MemoryBlockLog::new());
        log.fail_next_appends(2);
        let source = connect(node, log.clone()).await;
        let (group, _) = source.create_group(1, "reader");
        let rx = group.read();
        for h in 1..=3 {
            assert_eq!(next(&rx).await.unwrap().height, h);
        }
        assert_eq!(log.len(), 3);
    }

    async fn connect_failing(node: Arc<MemoryNode>) -> LogSource {
        let (mut poll, replay) = configs();
        poll.retry = RetryConfig::fixed(Duration::from_millis(5), Some(1));
        let source = LogSource::connect(node.clone(), Arc::new(MemoryBlockLog::new()), poll, replay)
            .await
            .unwrap();
        node.fail_next(100);
        source
    }

    #[tokio::test]
    async fn producer_failure_closes_replay_groups() {
        let node = Arc::new(MemoryNode::with_blocks((1..=3).map(block)));
        let source = connect_failing(node).await;

        let (group, _) = source.create_group(1, "reader");
        let rx = group.read();
        assert!(next(&rx).await.is_none());

        let reason = group.last_error().unwrap();
        assert!(reason.contains("log producer failed"), "{reason}");
        assert!(!source.is_producer_running());
        assert!(source.producer_error().is_some());
    }

    #[tokio::test]
    async fn failed_producer_restarts_for_new_group() {
        let node = Arc::new(MemoryNode::with_blocks((1..=3).map(block)));
        let source = connect_failing(node.clone()).await;

        let (first, _) = source.create_group(1, "reader");
        assert!(next(&first.read()).await.is_none());
        first.close();

        node.fail_next(0);
        let (second, existed) = source.create_group(1, "reader");
        assert!(!existed);
        let rx = second.read();
        for h in 1..=3 {
            assert_eq!(next(&rx).await.unwrap().height, h);
        }
        assert!(source.producer_error().is_none());
        source.close();
    }

    #[tokio::test]
    async fn unreadable_log_is_fatal() {
        let node = Arc::new(MemoryNode::with_blocks([block(1)]));
        let log = Arc::new(MemoryBlockLog::new());
        log.append(b"not a block".to_vec()).await.unwrap();
        let (poll, replay) = configs();
        let err = LogSource::connect(node, log, poll, replay).await.err().unwrap();
        assert!(matches!(err, SourceError::Log(LogError::Codec(_))));
    }
}
