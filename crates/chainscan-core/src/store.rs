//! Persistence port.
//!
//! The scan reads its resume point through [`ChainStore`] and the commit
//! pipeline writes each [`CommitBatch`] as a set of independent parts. A
//! backend decides how each part maps to tables or collections; parts are
//! written concurrently and are not transactional with each other.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::batch::CommitBatch;
use crate::error::StoreError;
use crate::merger::IndexKind;
use crate::state::NetworkStatus;

/// One independently written piece of a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitPart {
    /// The block cursor row (height + day), the scan's resume point.
    Cursor,
    /// The day's [`NetworkStatus`] row.
    NetworkStatus,
    /// One of the address indices.
    Index(IndexKind),
    Unbond,
    AccountBalance,
    ValidatorStake,
}

impl CommitPart {
    /// Every part of a commit, in dispatch order.
    pub fn all() -> Vec<CommitPart> {
        let mut parts = vec![CommitPart::Cursor, CommitPart::NetworkStatus];
        parts.extend(IndexKind::ALL.iter().map(|k| CommitPart::Index(*k)));
        parts.extend([
            CommitPart::Unbond,
            CommitPart::AccountBalance,
            CommitPart::ValidatorStake,
        ]);
        parts
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Cursor => "cursor",
            Self::NetworkStatus => "network_status",
            Self::Index(kind) => kind.name(),
            Self::Unbond => "unbond",
            Self::AccountBalance => "account_balance",
            Self::ValidatorStake => "validator_stake",
        }
    }
}

impl std::fmt::Display for CommitPart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Storage backend for committed scan results.
#[async_trait]
pub trait ChainStore: Send + Sync {
    /// Height of the last committed block, `None` on an empty store.
    async fn top_committed_height(&self) -> Result<Option<u64>, StoreError>;

    /// The most recent committed [`NetworkStatus`], `None` on an empty store.
    async fn top_network_status(&self) -> Result<Option<NetworkStatus>, StoreError>;

    /// Write one part of `batch`. Returns the number of rows/documents touched.
    async fn write(&self, part: CommitPart, batch: &CommitBatch) -> Result<u64, StoreError>;
}
