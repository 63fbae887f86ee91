//! Direct-poll block source.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chainscan_core::{ChainInfo, NodeClient, PollConfig};
use futures::future::BoxFuture;
use tracing::{debug, info};

use crate::error::SourceError;
use crate::group::{ConsumerGroup, GroupFeed, GroupLauncher, GroupRegistry};
use crate::retry::RetryPolicy;
use crate::source::BlockSource;

/// Reads blocks straight from the node, one fetch task per consumer group.
pub struct PollSource {
    node: Arc<dyn NodeClient>,
    registry: Arc<GroupRegistry>,
    launcher: Arc<PollLauncher>,
}

impl PollSource {
    /// Query the node once. Failure here is fatal ([`SourceError::Connect`]).
    pub async fn connect(node: Arc<dyn NodeClient>, config: PollConfig) -> Result<Self, SourceError> {
        let info = node
            .blockchain_info()
            .await
            .map_err(|e| SourceError::Connect(e.to_string()))?;
        info!(head = info.head_height, pruned = info.is_pruned, "connected to node");

        Ok(Self {
            registry: GroupRegistry::new(config.channel_capacity),
            launcher: Arc::new(PollLauncher {
                node: node.clone(),
                config,
            }),
            node,
        })
    }

    pub fn group_count(&self) -> usize {
        self.registry.len()
    }
}

#[async_trait]
impl BlockSource for PollSource {
    async fn blockchain_info(&self) -> Result<ChainInfo, SourceError> {
        Ok(self.node.blockchain_info().await?)
    }

    fn create_group(&self, start_height: u64, id: &str) -> (Arc<ConsumerGroup>, bool) {
        self.registry
            .load_or_store(id, start_height, self.launcher.clone())
    }

    fn close(&self) {
        if !self.registry.cancel_token().is_cancelled() {
            info!("closing poll source");
        }
        self.registry.close_all();
    }
}

impl Drop for PollSource {
    fn drop(&mut self) {
        self.registry.close_all();
    }
}

struct PollLauncher {
    node: Arc<dyn NodeClient>,
    config: PollConfig,
}

impl GroupLauncher for PollLauncher {
    fn launch(&self, feed: GroupFeed) -> BoxFuture<'static, Result<(), SourceError>> {
        Box::pin(poll_blocks(self.node.clone(), self.config.clone(), feed))
    }
}

async fn poll_blocks(
    node: Arc<dyn NodeClient>,
    config: PollConfig,
    feed: GroupFeed,
) -> Result<(), SourceError> {
    let retry = RetryPolicy::new(config.retry.clone());
    let cancel = feed.cancel_token().clone();
    let started = Instant::now();
    let mut cursor = feed.start_height();
    let mut head: Option<u64> = None;

    info!(group = feed.id(), start = cursor, "polling node");

    loop {
        if head.map_or(true, |h| cursor > h) {
            let info = retry
                .run(&cancel, "blockchain_info", || async {
                    Ok(node.blockchain_info().await?)
                })
                .await?;
            let caught_up = head.is_some() || info.head_height < cursor;
            if caught_up && !feed.is_slow_mode() {
                feed.set_slow_mode();
                info!(group = feed.id(), height = cursor.saturating_sub(1), "caught up with head");
            }
            if info.head_height < cursor {
                debug!(group = feed.id(), head = info.head_height, "waiting for new blocks");
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(config.head_poll_interval()) => continue,
                }
            }
            head = Some(info.head_height);
        }

        let height = cursor;
        let block = retry
            .run(&cancel, "block", || async { Ok(node.block(height).await?) })
            .await?;
        feed.send(block).await?;

        let head_height = head.unwrap_or(height);
        if feed.is_slow_mode() {
            info!(group = feed.id(), height, "block delivered");
        } else if (config.milestone_interval > 0 && height % config.milestone_interval == 0)
            || height >= head_height
        {
            info!(
                group = feed.id(),
                height,
                head = head_height,
                progress = format!("{:.2}%", height as f64 / head_height.max(1) as f64 * 100.0),
                elapsed = ?started.elapsed(),
                "catching up"
            );
        }
        cursor += 1;
    }
}
