//! chainscan-storage: in-memory collaborators for ChainScan.
//!
//! - [`memory`]: [`InMemoryStore`], a [`ChainStore`](chainscan_core::ChainStore)
//!   holding committed days in RAM
//! - [`log`]: [`MemoryBlockLog`], a single-partition block log
//! - [`node`]: [`MemoryNode`], a scripted node for driving sources
//!
//! All three support failure injection so the retry and error paths of the
//! scan can be exercised without real infrastructure.

pub mod log;
pub mod memory;
pub mod node;

pub use log::MemoryBlockLog;
pub use memory::InMemoryStore;
pub use node::MemoryNode;
