//! chainscan-core: the data model and day-bucketed aggregation for ChainScan.
//!
//! # Architecture
//!
//! ```text
//! BlockSource → ConsumerGroup → ScanWorker
//!                                   ├── DayScanner   (day window, rotation, folding)
//!                                   │     ├── GlobalState  (supply, stake, per-day counters)
//!                                   │     └── TxAggregate  (per-day per-address indices, deltas)
//!                                   └── CommitPipeline → ChainStore
//! ```
//!
//! This crate holds everything that is independent of where blocks come from
//! and where aggregates end up: the block types, the folding rules, the
//! [`CommitBatch`] snapshot, and the collaborator ports ([`ChainStore`],
//! [`BlockLog`], [`NodeClient`]) that the source and worker crates are written against.

pub mod accounts;
pub mod batch;
pub mod codec;
pub mod config;
pub mod day;
pub mod error;
pub mod log;
pub mod merger;
pub mod node;
pub mod scanner;
pub mod state;
pub mod store;
pub mod types;

pub use accounts::SupplyAccounts;
pub use batch::CommitBatch;
pub use config::{CommitConfig, PollConfig, ReplayConfig, RetryConfig, ScanConfig, SourceKind};
pub use day::DayBucket;
pub use error::{AggregateError, LogError, NodeError, StoreError};
pub use log::{BlockLog, LogRecord};
pub use merger::{DayIndex, IndexKind, MergedTransfer, TxAggregate, UnbondRecord};
pub use node::NodeClient;
pub use scanner::DayScanner;
pub use state::{GlobalState, NetworkStatus};
pub use store::{ChainStore, CommitPart};
pub use types::{Block, ChainInfo, Recipient, Transaction, TxPayload};
