//! The block source abstraction and variant selection.

use std::sync::Arc;

use async_trait::async_trait;
use chainscan_core::{BlockLog, ChainInfo, NodeClient, PollConfig, ReplayConfig, SourceKind};

use crate::error::SourceError;
use crate::group::ConsumerGroup;
use crate::log_source::LogSource;
use crate::poll::PollSource;

/// Where blocks come from.
#[async_trait]
pub trait BlockSource: Send + Sync {
    /// Current head height and pruning status of the node.
    async fn blockchain_info(&self) -> Result<ChainInfo, SourceError>;

    /// Open (or return the already open) group `id` starting at
    /// `start_height`. The flag is `true` if the group existed; its cursor is
    /// left untouched in that case.
    fn create_group(&self, start_height: u64, id: &str) -> (Arc<ConsumerGroup>, bool);

    /// Close every group and stop background tasks. Idempotent.
    fn close(&self);
}

/// Construct the source selected by `kind`.
///
/// `log` is required for [`SourceKind::Log`].
pub async fn build_source(
    kind: SourceKind,
    node: Arc<dyn NodeClient>,
    log: Option<Arc<dyn BlockLog>>,
    poll: PollConfig,
    replay: ReplayConfig,
) -> Result<Arc<dyn BlockSource>, SourceError> {
    match kind {
        SourceKind::Poll => Ok(Arc::new(PollSource::connect(node, poll).await?)),
        SourceKind::Log => {
            let log = log.ok_or_else(|| {
                SourceError::Connect("log-backed source selected without a block log".into())
            })?;
            Ok(Arc::new(LogSource::connect(node, log, poll, replay).await?))
        }
    }
}
