//! The commit pipeline.
//!
//! Finished days are queued to a single worker task that persists each
//! [`CommitBatch`] as one logical write, fanned out over every
//! [`CommitPart`]. Parts of one commit are written concurrently and are not
//! transactional: if one fails the others may still land, and the first
//! failure is reported on the pipeline's error channel. The worker stops
//! after reporting, so a later day is never committed over a failed one.

use std::sync::Arc;
use std::time::Instant;

use chainscan_core::{ChainStore, CommitBatch, CommitConfig, CommitPart};
use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};

use crate::error::CommitError;

/// Totals reported when the pipeline drains.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitStats {
    /// Batches fully written.
    pub batches: u64,
    /// Rows touched across all parts.
    pub rows: u64,
}

/// Write every part of `batch`, concurrently.
///
/// All parts are attempted even if one fails; the first failure (in part
/// order) is returned.
pub async fn commit_batch(store: &dyn ChainStore, batch: &CommitBatch) -> Result<u64, CommitError> {
    let writes = CommitPart::all().into_iter().map(|part| async move {
        let res = store.write(part, batch).await;
        (part, res)
    });

    let mut rows = 0;
    let mut first_err = None;
    for (part, res) in join_all(writes).await {
        match res {
            Ok(0) => tracing::info!(part = %part, day = %batch.day(), "No rows written"),
            Ok(n) => rows += n,
            Err(e) => {
                tracing::error!(part = %part, day = %batch.day(), error = %e, "Commit part failed");
                if first_err.is_none() {
                    first_err = Some(CommitError::Write {
                        part,
                        day: batch.day(),
                        source: e,
                    });
                }
            }
        }
    }
    first_err.map_or(Ok(rows), Err)
}

/// Bounded queue of finished days with exactly one writer task.
pub struct CommitPipeline {
    tx: mpsc::Sender<Option<CommitBatch>>,
    errors: mpsc::Receiver<CommitError>,
    worker: JoinHandle<CommitStats>,
}

impl CommitPipeline {
    /// Spawn the writer task.
    pub fn start(store: Arc<dyn ChainStore>, config: &CommitConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let (err_tx, errors) = mpsc::channel(1);
        let worker = tokio::spawn(run_worker(store, rx, err_tx));
        Self { tx, errors, worker }
    }

    /// Queue a finished day, waiting while the queue is full.
    pub async fn submit(&mut self, batch: CommitBatch) -> Result<(), CommitError> {
        if self.tx.send(Some(batch)).await.is_err() {
            return Err(self.errors.try_recv().unwrap_or(CommitError::Stopped));
        }
        Ok(())
    }

    /// Resolves with the first commit failure. Pending forever while the
    /// worker is healthy; `None` once the worker has exited cleanly.
    pub async fn next_error(&mut self) -> Option<CommitError> {
        self.errors.recv().await
    }

    /// Send the shutdown sentinel and wait for every queued batch to be written.
    pub async fn shutdown(mut self) -> Result<CommitStats, CommitError> {
        // a failed send means the worker already exited; its error is below
        let _ = self.tx.send(None).await;
        let stats = match self.worker.await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::error!(error = %e, "Commit worker died");
                return Err(CommitError::Stopped);
            }
        };
        match self.errors.try_recv() {
            Ok(err) => Err(err),
            Err(_) => Ok(stats),
        }
    }

    /// Stop the worker without draining. Batches still queued are dropped.
    pub fn abort(self) {
        self.worker.abort();
    }

    /// Handle that aborts the worker while the pipeline is borrowed or
    /// being shut down.
    pub fn abort_handle(&self) -> AbortHandle {
        self.worker.abort_handle()
    }
}

async fn run_worker(
    store: Arc<dyn ChainStore>,
    mut rx: mpsc::Receiver<Option<CommitBatch>>,
    errors: mpsc::Sender<CommitError>,
) -> CommitStats {
    let started = Instant::now();
    let mut stats = CommitStats::default();

    while let Some(msg) = rx.recv().await {
        let Some(batch) = msg else {
            tracing::info!(batches = stats.batches, "Commit queue drained");
            break;
        };

        match commit_batch(store.as_ref(), &batch).await {
            Ok(rows) => {
                stats.batches += 1;
                stats.rows += rows;
                tracing::info!(
                    height = batch.height(),
                    head = batch.head_height(),
                    progress = format!("{:.2}%", batch.progress()),
                    day = %batch.day(),
                    rows,
                    elapsed = ?started.elapsed(),
                    "Day committed"
                );
            }
            Err(e) => {
                let _ = errors.try_send(e);
                break;
            }
        }
    }
    stats
}
