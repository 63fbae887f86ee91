//! Host-facing lifecycle: run a scan now and then once a day.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chainscan_core::{BlockLog, ChainStore, NodeClient, ScanConfig};
use chainscan_source::{build_source, BlockSource, SourceError};
use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::scan::{panic_message, ScanWorker};

const SECS_PER_DAY: u32 = 86_400;

/// When the daily scan fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Run once immediately when the service starts.
    #[serde(default = "default_run_on_start")]
    pub run_on_start: bool,
    /// Seconds after UTC midnight of the daily run (default 00:10).
    #[serde(default = "default_daily_at_secs")]
    pub daily_at_secs: u32,
}

fn default_run_on_start() -> bool { true }
fn default_daily_at_secs() -> u32 { 600 }

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            run_on_start: default_run_on_start(),
            daily_at_secs: default_daily_at_secs(),
        }
    }
}

impl ScheduleConfig {
    /// The first daily trigger strictly after `now`.
    pub fn next_run_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let midnight = now
            - chrono::Duration::seconds(i64::from(now.num_seconds_from_midnight()))
            - chrono::Duration::nanoseconds(i64::from(now.nanosecond()));
        let today = midnight + chrono::Duration::seconds(i64::from(self.daily_at_secs % SECS_PER_DAY));
        if today > now {
            today
        } else {
            today + chrono::Duration::days(1)
        }
    }
}

/// Counters kept by the supervisor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceStats {
    pub runs: u64,
    pub failures: u64,
    pub last_height: Option<u64>,
    pub last_error: Option<String>,
}

type SharedStats = Arc<Mutex<ServiceStats>>;

fn update(stats: &SharedStats, f: impl FnOnce(&mut ServiceStats)) {
    f(&mut stats.lock().unwrap_or_else(PoisonError::into_inner));
}

/// Runs [`ScanWorker`] passes on a schedule. Runs never overlap.
pub struct ScanService {
    source: Arc<dyn BlockSource>,
    store: Arc<dyn ChainStore>,
    config: ScanConfig,
    schedule: ScheduleConfig,
}

impl ScanService {
    pub fn new(
        source: Arc<dyn BlockSource>,
        store: Arc<dyn ChainStore>,
        config: ScanConfig,
        schedule: ScheduleConfig,
    ) -> Self {
        Self {
            source,
            store,
            config,
            schedule,
        }
    }

    /// Build the source named by `config.source` and wrap it in a service.
    pub async fn connect(
        node: Arc<dyn NodeClient>,
        log: Option<Arc<dyn BlockLog>>,
        store: Arc<dyn ChainStore>,
        config: ScanConfig,
        schedule: ScheduleConfig,
    ) -> Result<Self, SourceError> {
        let source = build_source(
            config.source,
            node,
            log,
            config.poll.clone(),
            config.replay.clone(),
        )
        .await?;
        Ok(Self::new(source, store, config, schedule))
    }

    /// Spawn the supervisor task.
    pub fn start(self) -> ServiceHandle {
        let cancel = CancellationToken::new();
        let stats = SharedStats::default();
        let task = tokio::spawn(self.supervise(cancel.clone(), stats.clone()));
        tracing::info!("Scan service started");
        ServiceHandle { cancel, stats, task }
    }

    async fn supervise(self, cancel: CancellationToken, stats: SharedStats) {
        let mut run_now = self.schedule.run_on_start;
        loop {
            if !run_now {
                let now = Utc::now();
                let next = self.schedule.next_run_after(now);
                let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
                tracing::info!(next = %next, "Next scan scheduled");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
            }
            run_now = false;

            self.run_once(&cancel, &stats).await;
            if cancel.is_cancelled() {
                break;
            }
        }
        self.source.close();
        tracing::info!("Scan service stopped");
    }

    async fn run_once(&self, cancel: &CancellationToken, stats: &SharedStats) {
        let mut worker = ScanWorker::new(self.source.clone(), self.store.clone(), self.config.clone())
            .with_cancel(cancel.child_token());

        let outcome = match tokio::spawn(async move { worker.run().await }).await {
            Ok(Ok(report)) => Ok(report.last_height),
            Ok(Err(e)) if e.is_cancelled() => {
                tracing::info!("Scan cancelled");
                return;
            }
            Ok(Err(e)) => Err(e.to_string()),
            Err(join) if join.is_panic() => {
                let message = panic_message(join.into_panic().as_ref());
                tracing::error!(panic = %message, "Scan run panicked");
                Err(format!("panic: {message}"))
            }
            Err(join) => Err(join.to_string()),
        };

        update(stats, |s| {
            s.runs += 1;
            match outcome {
                Ok(height) => {
                    if height.is_some() {
                        s.last_height = height;
                    }
                }
                Err(e) => {
                    s.failures += 1;
                    s.last_error = Some(e);
                }
            }
        });
    }
}

/// Handle to a running [`ScanService`].
pub struct ServiceHandle {
    cancel: CancellationToken,
    stats: SharedStats,
    task: JoinHandle<()>,
}

impl ServiceHandle {
    pub fn stats(&self) -> ServiceStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Cancel the in-flight run and wait for the supervisor to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Scan supervisor ended abnormally");
        }
    }
}
