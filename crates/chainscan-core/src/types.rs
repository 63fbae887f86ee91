//! Block and transaction types as delivered by the node.

use serde::{Deserialize, Serialize};

use crate::day::DayBucket;

// ─── ChainInfo ────────────────────────────────────────────────────────────────

/// Result of a `GetBlockchainInfo` query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainInfo {
    /// Height of the latest block known to the node.
    pub head_height: u64,
    /// `true` if the node dropped historical blocks (non-archival).
    pub is_pruned: bool,
}

// ─── Block ────────────────────────────────────────────────────────────────────

/// A block with full transaction detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Block height.
    pub height: u64,
    /// Unix timestamp of the block (seconds since epoch, UTC).
    pub timestamp: i64,
    /// Address of the validator that proposed the block.
    pub proposer: String,
    /// Transactions in block order.
    #[serde(default)]
    pub txs: Vec<Transaction>,
}

impl Block {
    /// The day bucket this block aggregates into.
    pub fn day(&self) -> DayBucket {
        DayBucket::from_timestamp(self.timestamp)
    }
}

// ─── Transaction ──────────────────────────────────────────────────────────────

/// A transaction and its kind-specific payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction hash.
    pub id: String,
    /// Fee paid, in the chain's smallest unit.
    pub fee: i64,
    pub payload: TxPayload,
}

/// One entry of a batch transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub receiver: String,
    pub amount: i64,
}

/// Kind-specific transaction fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TxPayload {
    Unspecified,
    Transfer {
        sender: String,
        receiver: String,
        amount: i64,
    },
    Bond {
        sender: String,
        receiver: String,
        stake: i64,
    },
    Sortition {
        address: String,
    },
    Unbond {
        validator: String,
    },
    Withdraw {
        validator: String,
        account: String,
        amount: i64,
    },
    BatchTransfer {
        sender: String,
        recipients: Vec<Recipient>,
    },
}

impl TxPayload {
    /// Short kind name, used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unspecified => "unspecified",
            Self::Transfer { .. } => "transfer",
            Self::Bond { .. } => "bond",
            Self::Sortition { .. } => "sortition",
            Self::Unbond { .. } => "unbond",
            Self::Withdraw { .. } => "withdraw",
            Self::BatchTransfer { .. } => "batch_transfer",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_serde_tag() {
        let tx = Transaction {
            id: "0xabc".into(),
            fee: 1,
            payload: TxPayload::Withdraw {
                validator: "val".into(),
                account: "acc".into(),
                amount: 20,
            },
        };
        let json = serde_json::to_value(&tx).unwrap();
        assert_eq!(json["payload"]["type"], "withdraw");
        let back: Transaction = serde_json::from_value(json).unwrap();
        assert_eq!(back, tx);
    }

    #[test]
    fn block_day() {
        let b = Block {
            height: 1,
            timestamp: 86_400 * 3 + 5,
            proposer: "p".into(),
            txs: vec![],
        };
        assert_eq!(b.day().epoch(), 86_400 * 3);
    }
}
