//! Scripted node.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use chainscan_core::{Block, ChainInfo, NodeClient, NodeError};

#[derive(Default)]
struct Chain {
    blocks: BTreeMap<u64, Block>,
    head: u64,
    pruned: bool,
    unreachable: bool,
    fail_next: u32,
    block_calls: u64,
}

/// A [`NodeClient`] serving blocks from memory.
///
/// The head is the highest pushed block unless set explicitly. Blocks above
/// the head are not served, which lets tests release them step by step.
#[derive(Default)]
pub struct MemoryNode {
    chain: Mutex<Chain>,
}

impl MemoryNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blocks(blocks: impl IntoIterator<Item = Block>) -> Self {
        let node = Self::new();
        for block in blocks {
            node.push(block);
        }
        node
    }

    fn chain(&self) -> MutexGuard<'_, Chain> {
        self.chain.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a block and advance the head to it.
    pub fn push(&self, block: Block) {
        let mut c = self.chain();
        c.head = c.head.max(block.height);
        c.blocks.insert(block.height, block);
    }

    pub fn set_head(&self, head: u64) {
        self.chain().head = head;
    }

    pub fn set_pruned(&self, pruned: bool) {
        self.chain().pruned = pruned;
    }

    /// While unreachable every call fails with [`NodeError::Unreachable`].
    pub fn set_unreachable(&self, unreachable: bool) {
        self.chain().unreachable = unreachable;
    }

    /// Fail the next `n` calls with a transient RPC error.
    pub fn fail_next(&self, n: u32) {
        self.chain().fail_next = n;
    }

    /// Number of successful `block` calls.
    pub fn block_calls(&self) -> u64 {
        self.chain().block_calls
    }

    fn check(c: &mut Chain) -> Result<(), NodeError> {
        if c.unreachable {
            return Err(NodeError::Unreachable("connection refused".into()));
        }
        if c.fail_next > 0 {
            c.fail_next -= 1;
            return Err(NodeError::Rpc("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl NodeClient for MemoryNode {
    async fn blockchain_info(&self) -> Result<ChainInfo, NodeError> {
        let mut c = self.chain();
        Self::check(&mut c)?;
        Ok(ChainInfo {
            head_height: c.head,
            is_pruned: c.pruned,
        })
    }

    async fn block(&self, height: u64) -> Result<Block, NodeError> {
        let mut c = self.chain();
        Self::check(&mut c)?;
        if height > c.head {
            return Err(NodeError::BlockNotFound { height });
        }
        let block = c
            .blocks
            .get(&height)
            .cloned()
            .ok_or(NodeError::BlockNotFound { height })?;
        c.block_calls += 1;
        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(height: u64) -> Block {
        Block {
            height,
            timestamp: height as i64,
            proposer: "p".into(),
            txs: vec![],
        }
    }

    #[tokio::test]
    async fn head_follows_pushes() {
        let node = MemoryNode::with_blocks((1..=3).map(block));
        assert_eq!(node.blockchain_info().await.unwrap().head_height, 3);
        node.set_head(2);
        assert!(matches!(
            node.block(3).await,
            Err(NodeError::BlockNotFound { height: 3 })
        ));
        assert_eq!(node.block(2).await.unwrap().height, 2);
        assert_eq!(node.block_calls(), 1);
    }

    #[tokio::test]
    async fn injected_failures() {
        let node = MemoryNode::with_blocks([block(1)]);
        node.fail_next(1);
        assert!(matches!(node.block(1).await, Err(NodeError::Rpc(_))));
        assert!(node.block(1).await.is_ok());
        node.set_unreachable(true);
        assert!(matches!(
            node.blockchain_info().await,
            Err(NodeError::Unreachable(_))
        ));
    }
}
