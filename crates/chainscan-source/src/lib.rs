//! chainscan-source: where blocks come from.
//!
//! Two [`BlockSource`] variants behind one trait:
//!
//! - [`PollSource`] reads blocks straight from the node.
//! - [`LogSource`] replays from a durable [`BlockLog`](chainscan_core::BlockLog)
//!   while a single background producer keeps the log current from the node.
//!
//! Consumers subscribe through a [`ConsumerGroup`]: a named cursor with its
//! own bounded channel and a lazily started background task.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chainscan_core::{NodeClient, PollConfig, ReplayConfig, SourceKind};
//! use chainscan_source::build_source;
//!
//! # async fn example(node: Arc<dyn NodeClient>) -> Result<(), chainscan_source::SourceError> {
//! let source = build_source(SourceKind::Poll, node, None, PollConfig::default(), ReplayConfig::default()).await?;
//! let (group, _) = source.create_group(1, "reader");
//! let blocks = group.read();
//! while let Some(block) = blocks.recv().await {
//!     println!("block {}", block.height);
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod group;
pub mod log_source;
pub mod offset;
pub mod poll;
pub mod retry;
pub mod source;

pub use chainscan_core::NodeClient;
pub use error::SourceError;
pub use group::{BlockReceiver, ConsumerGroup, GroupFeed, GroupLauncher};
pub use log_source::LogSource;
pub use offset::{find_offset, find_offset_by_height};
pub use poll::PollSource;
pub use retry::RetryPolicy;
pub use source::{build_source, BlockSource};
