//! The scan worker: one pass from the last committed height up to the head
//! observed at start.
//!
//! # Bootstrapping
//! Load the resume point from the store, query the source head and refuse
//! pruned nodes.
//!
//! # Streaming
//! Open one consumer group at `last + 1` and fold every delivered block into
//! a [`DayScanner`]. Each day rotation hands a [`CommitBatch`] to the
//! [`CommitPipeline`]. The block at or above the head is not folded; the
//! unfinished day is left uncommitted and reported back.
//!
//! # Draining
//! Wait for every queued day to be written.
//!
//! [`CommitBatch`]: chainscan_core::CommitBatch

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use chainscan_core::{Block, ChainStore, DayScanner, GlobalState, ScanConfig, TxAggregate};
use chainscan_source::{BlockReceiver, BlockSource, ConsumerGroup};
use tokio_util::sync::CancellationToken;

use crate::commit::{CommitPipeline, CommitStats};
use crate::error::ScanError;

/// Lifecycle state of a [`ScanWorker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    /// Not yet started.
    Idle,
    /// Loading the resume point and checking the source.
    Bootstrapping,
    /// Folding blocks.
    Streaming,
    /// Waiting for queued commits to be written.
    Draining,
    Done,
    Failed,
}

impl std::fmt::Display for ScanState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Bootstrapping => write!(f, "bootstrapping"),
            Self::Streaming => write!(f, "streaming"),
            Self::Draining => write!(f, "draining"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Outcome of a successful scan.
#[derive(Debug, Clone)]
pub struct ScanReport {
    /// First height requested from the source.
    pub start_height: u64,
    /// Head observed at start; the scan stops there.
    pub head_height: u64,
    /// Last folded block, `None` if nothing was folded.
    pub last_height: Option<u64>,
    pub committed_batches: u64,
    pub rows: u64,
    /// Running state of the day that was still open when the scan stopped.
    pub pending_state: GlobalState,
    /// Aggregate of that open day. Not committed.
    pub pending: TxAggregate,
}

/// Drives one scan pass over a [`BlockSource`] into a [`ChainStore`].
pub struct ScanWorker {
    source: Arc<dyn BlockSource>,
    store: Arc<dyn ChainStore>,
    config: ScanConfig,
    cancel: CancellationToken,
    state: ScanState,
    #[cfg(test)]
    fold_hook: Option<fn(&Block)>,
}

impl ScanWorker {
    pub fn new(source: Arc<dyn BlockSource>, store: Arc<dyn ChainStore>, config: ScanConfig) -> Self {
        Self {
            source,
            store,
            config,
            cancel: CancellationToken::new(),
            state: ScanState::Idle,
            #[cfg(test)]
            fold_hook: None,
        }
    }

    /// Observe `cancel` instead of a private token.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Run the scan until the head, an error or cancellation.
    pub async fn run(&mut self) -> Result<ScanReport, ScanError> {
        let started = Instant::now();
        let result = self.scan().await;
        match &result {
            Ok(report) => {
                self.state = ScanState::Done;
                tracing::info!(
                    last = ?report.last_height,
                    head = report.head_height,
                    batches = report.committed_batches,
                    elapsed = ?started.elapsed(),
                    "Scan complete"
                );
            }
            Err(e) => {
                self.state = ScanState::Failed;
                tracing::error!(error = %e, elapsed = ?started.elapsed(), "Scan failed");
            }
        }
        result
    }

    async fn scan(&mut self) -> Result<ScanReport, ScanError> {
        self.state = ScanState::Bootstrapping;
        let last = self.store.top_committed_height().await?.unwrap_or(0);
        let state = match self.store.top_network_status().await? {
            Some(status) => GlobalState::resume(&status),
            None => GlobalState::new(),
        };

        let info = self.source.blockchain_info().await?;
        if info.is_pruned {
            return Err(ScanError::Pruned);
        }
        let head = info.head_height;
        let start = last + 1;

        if last >= head {
            tracing::info!(last, head, "Nothing to scan");
            return Ok(ScanReport {
                start_height: start,
                head_height: head,
                last_height: None,
                committed_batches: 0,
                rows: 0,
                pending_state: state,
                pending: TxAggregate::new(),
            });
        }

        tracing::info!(start, head, day = %state.day, "Starting scan");

        self.state = ScanState::Streaming;
        let mut scanner = DayScanner::new(self.config.accounts.clone(), state, head);
        let mut pipeline = CommitPipeline::start(self.store.clone(), &self.config.commit);
        let (group, existed) = self.source.create_group(start, &self.config.group_id);
        if existed {
            tracing::warn!(group = %self.config.group_id, "Joined an already open consumer group");
        }
        let blocks = group.read();

        let streamed = self
            .stream(&group, &blocks, &mut scanner, &mut pipeline, start, head)
            .await;
        group.close();

        let stats = match streamed {
            Ok(()) => {
                self.state = ScanState::Draining;
                tracing::info!(last = ?scanner.last_height(), "Draining commits");
                let worker = pipeline.abort_handle();
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {
                        worker.abort();
                        return Err(ScanError::Cancelled);
                    }
                    stats = pipeline.shutdown() => stats?,
                }
            }
            Err(e) => {
                pipeline.abort();
                return Err(e);
            }
        };

        Ok(report(start, head, scanner, stats))
    }

    async fn stream(
        &self,
        group: &ConsumerGroup,
        blocks: &BlockReceiver,
        scanner: &mut DayScanner,
        pipeline: &mut CommitPipeline,
        start: u64,
        head: u64,
    ) -> Result<(), ScanError> {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(ScanError::Cancelled),
                Some(err) = pipeline.next_error() => return Err(err.into()),
                next = blocks.recv() => next,
            };

            let Some(block) = next else {
                let reason = group
                    .last_error()
                    .unwrap_or_else(|| "block channel closed".to_string());
                return Err(ScanError::SourceClosed {
                    height: scanner.last_height().unwrap_or(start - 1),
                    head,
                    reason,
                });
            };

            if block.height >= head {
                tracing::info!(height = block.height, head, "Reached head");
                return Ok(());
            }

            let batch = match catch_unwind(AssertUnwindSafe(|| {
                self.before_fold(&block);
                scanner.push(&block)
            })) {
                Ok(folded) => folded?,
                Err(payload) => {
                    return Err(ScanError::Panicked {
                        height: block.height,
                        message: panic_message(payload.as_ref()),
                    })
                }
            };

            if let Some(batch) = batch {
                tracing::debug!(day = %batch.day(), height = batch.height(), "day queued for commit");
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Err(ScanError::Cancelled),
                    res = pipeline.submit(batch) => res?,
                }
            }
        }
    }
}

impl ScanWorker {
    #[cfg(test)]
    fn before_fold(&self, block: &Block) {
        if let Some(hook) = self.fold_hook {
            hook(block);
        }
    }

    #[cfg(not(test))]
    fn before_fold(&self, _block: &Block) {}
}

fn report(start: u64, head: u64, scanner: DayScanner, stats: CommitStats) -> ScanReport {
    let last_height = scanner.last_height();
    let (pending_state, pending) = scanner.into_parts();
    ScanReport {
        start_height: start,
        head_height: head,
        last_height,
        committed_batches: stats.batches,
        rows: stats.rows,
        pending_state,
        pending,
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chainscan_core::{
        CommitBatch, CommitPart, NetworkStatus, PollConfig, RetryConfig, StoreError, Transaction,
    };
    use chainscan_source::PollSource;
    use chainscan_storage::{InMemoryStore, MemoryNode};
    use std::time::Duration;

    const DAY: i64 = 86_400;

    fn block(height: u64, timestamp: i64, txs: Vec<Transaction>) -> Block {
        Block {
            height,
            timestamp,
            proposer: "P".into(),
            txs,
        }
    }

    fn config() -> ScanConfig {
        let mut config = ScanConfig::default();
        config.poll = PollConfig {
            head_poll_interval_ms: 10,
            retry: RetryConfig::fixed(Duration::from_millis(5), Some(3)),
            ..PollConfig::default()
        };
        config
    }

    async fn worker(node: Arc<MemoryNode>, store: Arc<InMemoryStore>) -> ScanWorker {
        worker_with(node, store, config()).await
    }

    async fn worker_with(node: Arc<MemoryNode>, store: Arc<InMemoryStore>, cfg: ScanConfig) -> ScanWorker {
        let source = PollSource::connect(node, cfg.poll.clone()).await.unwrap();
        ScanWorker::new(Arc::new(source), store, cfg)
    }

    #[test]
    fn state_display() {
        assert_eq!(ScanState::Bootstrapping.to_string(), "bootstrapping");
        assert_eq!(ScanState::Failed.to_string(), "failed");
    }

    #[test]
    fn panic_payloads() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }

    #[tokio::test]
    async fn up_to_date_store_is_done_immediately() {
        let node = Arc::new(MemoryNode::with_blocks((1..=3).map(|h| block(h, 0, vec![]))));
        let store = Arc::new(InMemoryStore::seeded(3, Default::default()));
        let mut w = worker(node.clone(), store).await;
        let report = w.run().await.unwrap();
        assert_eq!(w.state(), ScanState::Done);
        assert_eq!(report.last_height, None);
        assert_eq!(node.block_calls(), 0);
    }

    #[tokio::test]
    async fn pruned_node_fails_bootstrap() {
        let node = Arc::new(MemoryNode::with_blocks([block(1, 0, vec![])]));
        node.set_pruned(true);
        let mut w = worker(node, Arc::new(InMemoryStore::new())).await;
        assert!(matches!(w.run().await, Err(ScanError::Pruned)));
        assert_eq!(w.state(), ScanState::Failed);
    }

    #[tokio::test]
    async fn head_block_is_not_folded() {
        let node = Arc::new(MemoryNode::with_blocks([
            block(1, 0, vec![]),
            block(2, DAY, vec![]),
            block(3, DAY + 5, vec![]),
        ]));
        let store = Arc::new(InMemoryStore::new());
        let mut w = worker(node, store.clone()).await;
        let report = w.run().await.unwrap();

        assert_eq!(report.start_height, 1);
        assert_eq!(report.head_height, 3);
        assert_eq!(report.last_height, Some(2));
        assert_eq!(report.committed_batches, 1);
        assert_eq!(report.pending_state.blocks, 1);
        assert_eq!(store.cursors().keys().copied().collect::<Vec<_>>(), vec![1]);
    }

    #[tokio::test]
    async fn fold_panic_is_recovered() {
        let node = Arc::new(MemoryNode::with_blocks([
            block(1, 0, vec![]),
            block(2, 0, vec![]),
            block(3, 0, vec![]),
        ]));
        let mut w = worker(node, Arc::new(InMemoryStore::new())).await;
        let hook: fn(&Block) = |block| {
            if block.height == 2 {
                panic!("bad block {}", block.height);
            }
        };
        w.fold_hook = Some(hook);
        match w.run().await {
            Err(ScanError::Panicked { height, message }) => {
                assert_eq!(height, 2);
                assert_eq!(message, "bad block 2");
            }
            other => panic!("expected panic error, got {other:?}"),
        }
        assert_eq!(w.state(), ScanState::Failed);
    }

    /// Delays every write so commits are still queued when the stream ends.
    struct SlowStore {
        inner: Arc<InMemoryStore>,
        delay: Duration,
    }

    #[async_trait]
    impl ChainStore for SlowStore {
        async fn top_committed_height(&self) -> Result<Option<u64>, StoreError> {
            self.inner.top_committed_height().await
        }
        async fn top_network_status(&self) -> Result<Option<NetworkStatus>, StoreError> {
            self.inner.top_network_status().await
        }
        async fn write(&self, part: CommitPart, batch: &CommitBatch) -> Result<u64, StoreError> {
            tokio::time::sleep(self.delay).await;
            self.inner.write(part, batch).await
        }
    }

    #[tokio::test]
    async fn cancel_while_draining_stops_commits() {
        // one day per block: four finished days queued behind a slow store
        let node = Arc::new(MemoryNode::with_blocks((1..=6).map(|h| block(h, h as i64 * DAY, vec![]))));
        let inner = Arc::new(InMemoryStore::new());
        let store = Arc::new(SlowStore {
            inner: inner.clone(),
            delay: Duration::from_millis(100),
        });
        let source = PollSource::connect(node, config().poll).await.unwrap();
        let mut w = ScanWorker::new(Arc::new(source), store, config());
        let cancel = w.cancel_token().clone();
        let run = tokio::spawn(async move { w.run().await });

        tokio::time::sleep(Duration::from_millis(150)).await;
        cancel.cancel();
        let res = tokio::time::timeout(Duration::from_secs(2), run)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(res, Err(ScanError::Cancelled)));

        let written = inner.days().len();
        assert!(written < 4, "{written} days written before cancel");
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(inner.days().len(), written);
    }

    #[tokio::test]
    async fn cancelled_before_head() {
        let node = Arc::new(MemoryNode::with_blocks([block(1, 0, vec![])]));
        // head is above what the node serves; unbounded retries stall the stream
        node.set_head(10);
        let mut cfg = config();
        cfg.poll.retry = RetryConfig::fixed(Duration::from_millis(5), None);
        let w = worker_with(node, Arc::new(InMemoryStore::new()), cfg).await;
        let cancel = CancellationToken::new();
        let mut w = w.with_cancel(cancel.clone());
        let run = tokio::spawn(async move { w.run().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        let res = tokio::time::timeout(Duration::from_secs(2), run)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(res, Err(ScanError::Cancelled)));
    }
}
