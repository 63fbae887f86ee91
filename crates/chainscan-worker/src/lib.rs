//! chainscan-worker: runs scans and commits their results.
//!
//! - [`ScanWorker`] drives one pass from the last committed height to the
//!   head: it reads a consumer group, folds blocks through a
//!   [`DayScanner`](chainscan_core::DayScanner) and hands finished days to the
//!   [`CommitPipeline`].
//! - [`ScanService`] runs a worker on start and once a day after that.
//! - [`telemetry`] sets up `tracing` output for the host process.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chainscan_core::{ChainStore, NodeClient};
//! use chainscan_worker::{init_tracing, LogConfig, ScanConfigBuilder, ScanService, ScheduleConfig};
//!
//! # async fn example(node: Arc<dyn NodeClient>, store: Arc<dyn ChainStore>) -> Result<(), Box<dyn std::error::Error>> {
//! init_tracing(&LogConfig::default());
//! let config = ScanConfigBuilder::new().group_id("daily").build_config();
//! let service = ScanService::connect(node, None, store, config, ScheduleConfig::default()).await?;
//! let handle = service.start();
//! tokio::signal::ctrl_c().await?;
//! handle.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod commit;
pub mod error;
pub mod scan;
pub mod service;
pub mod telemetry;

pub use builder::ScanConfigBuilder;
pub use commit::{commit_batch, CommitPipeline, CommitStats};
pub use error::{CommitError, ScanError};
pub use scan::{ScanReport, ScanState, ScanWorker};
pub use service::{ScanService, ScheduleConfig, ServiceHandle, ServiceStats};
pub use telemetry::{init_tracing, LogConfig};
