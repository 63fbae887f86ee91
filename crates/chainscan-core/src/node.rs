//! Node RPC port.

use async_trait::async_trait;

use crate::error::NodeError;
use crate::types::{Block, ChainInfo};

/// The subset of the node's RPC surface a scan needs.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Current head height and whether the node is pruned.
    async fn blockchain_info(&self) -> Result<ChainInfo, NodeError>;

    /// The block at `height` with full transaction detail.
    async fn block(&self, height: u64) -> Result<Block, NodeError>;
}
