//! Consumer groups: cursor-bearing subscriptions over a block source.
//!
//! A [`ConsumerGroup`] owns one bounded delivery channel and at most one
//! background task feeding it. The task is started lazily by the first
//! [`ConsumerGroup::read`] and is the only holder of the channel's sender, so
//! the channel closes exactly once: when that task ends. What the task does is
//! decided by the source through a [`GroupLauncher`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chainscan_core::Block;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::SourceError;

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ─── GroupFeed ────────────────────────────────────────────────────────────────

/// The producing half of a group, handed to its background task.
pub struct GroupFeed {
    id: String,
    start_height: u64,
    tx: mpsc::Sender<Block>,
    cancel: CancellationToken,
    slow_mode: Arc<AtomicBool>,
}

impl GroupFeed {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// First height this group delivers.
    pub fn start_height(&self) -> u64 {
        self.start_height
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Deliver one block, waiting while the channel is full.
    ///
    /// Fails with [`SourceError::Closed`] if the group is closed or the
    /// consumer dropped the channel.
    pub async fn send(&self, block: Block) -> Result<(), SourceError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(SourceError::Closed),
            res = self.tx.send(block) => res.map_err(|_| SourceError::Closed),
        }
    }

    pub fn set_slow_mode(&self) {
        self.slow_mode.store(true, Ordering::Relaxed);
    }

    pub fn is_slow_mode(&self) -> bool {
        self.slow_mode.load(Ordering::Relaxed)
    }
}

/// Strategy that turns a [`GroupFeed`] into the group's background task.
pub trait GroupLauncher: Send + Sync {
    fn launch(&self, feed: GroupFeed) -> BoxFuture<'static, Result<(), SourceError>>;
}

// ─── BlockReceiver ────────────────────────────────────────────────────────────

/// Shared handle to a group's delivery channel.
///
/// Every [`ConsumerGroup::read`] returns a clone of the same handle.
#[derive(Clone)]
pub struct BlockReceiver {
    inner: Arc<tokio::sync::Mutex<mpsc::Receiver<Block>>>,
}

impl BlockReceiver {
    /// Next block, `None` once the group's task ended and the channel drained.
    pub async fn recv(&self) -> Option<Block> {
        self.inner.lock().await.recv().await
    }
}

// ─── ConsumerGroup ────────────────────────────────────────────────────────────

enum GroupTask {
    Idle(mpsc::Sender<Block>),
    Running,
    Closed,
}

pub struct ConsumerGroup {
    id: String,
    start_height: u64,
    rx: BlockReceiver,
    task: Mutex<GroupTask>,
    cancel: CancellationToken,
    slow_mode: Arc<AtomicBool>,
    last_error: Arc<Mutex<Option<String>>>,
    launcher: Arc<dyn GroupLauncher>,
    registry: Weak<GroupRegistry>,
}

impl ConsumerGroup {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn start_height(&self) -> u64 {
        self.start_height
    }

    /// The group's channel. Starts the background task on first call.
    pub fn read(&self) -> BlockReceiver {
        let mut task = lock(&self.task);
        match std::mem::replace(&mut *task, GroupTask::Closed) {
            GroupTask::Idle(tx) => {
                self.spawn(tx);
                *task = GroupTask::Running;
            }
            other => *task = other,
        }
        self.rx.clone()
    }

    fn spawn(&self, tx: mpsc::Sender<Block>) {
        // held until last_error is published, so a consumer woken by the
        // channel closing always sees the reason
        let keep_open = tx.clone();
        let feed = GroupFeed {
            id: self.id.clone(),
            start_height: self.start_height,
            tx,
            cancel: self.cancel.clone(),
            slow_mode: self.slow_mode.clone(),
        };
        let job = self.launcher.launch(feed);
        let id = self.id.clone();
        let last_error = self.last_error.clone();

        debug!(group = %id, start = self.start_height, "starting group task");
        tokio::spawn(async move {
            match job.await {
                Ok(()) => debug!(group = %id, "group task finished"),
                Err(e) if e.is_closed() => debug!(group = %id, "group task stopped"),
                Err(e) => {
                    warn!(group = %id, error = %e, "group task failed");
                    *lock(&last_error) = Some(e.to_string());
                }
            }
            drop(keep_open);
        });
    }

    /// Stop the group and remove it from its source. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
        let prev = std::mem::replace(&mut *lock(&self.task), GroupTask::Closed);
        if !matches!(prev, GroupTask::Closed) {
            debug!(group = %self.id, "group closed");
        }
        drop(prev);
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.id, self);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Advisory: `true` once the group has caught up with its upstream.
    pub fn is_slow_mode(&self) -> bool {
        self.slow_mode.load(Ordering::Relaxed)
    }

    /// Why the background task stopped, if it failed.
    pub fn last_error(&self) -> Option<String> {
        lock(&self.last_error).clone()
    }
}

impl std::fmt::Debug for ConsumerGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerGroup")
            .field("id", &self.id)
            .field("start_height", &self.start_height)
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ─── GroupRegistry ────────────────────────────────────────────────────────────

/// The groups one source owns, keyed by id.
pub(crate) struct GroupRegistry {
    groups: DashMap<String, Arc<ConsumerGroup>>,
    cancel: CancellationToken,
    capacity: usize,
}

impl GroupRegistry {
    pub(crate) fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            groups: DashMap::new(),
            cancel: CancellationToken::new(),
            capacity: capacity.max(1),
        })
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Return the group registered under `id`, or register a new one.
    /// The flag is `true` if the group already existed.
    ///
    /// Once the registry is closed the group is returned already closed and
    /// is not registered.
    pub(crate) fn load_or_store(
        self: &Arc<Self>,
        id: &str,
        start_height: u64,
        launcher: Arc<dyn GroupLauncher>,
    ) -> (Arc<ConsumerGroup>, bool) {
        if self.cancel.is_cancelled() {
            debug!(group = %id, "source closed, group not registered");
            let group = self.new_group(id, start_height, launcher);
            *lock(&group.task) = GroupTask::Closed;
            return (group, false);
        }
        match self.groups.entry(id.to_string()) {
            Entry::Occupied(e) => (e.get().clone(), true),
            Entry::Vacant(e) => {
                let group = self.new_group(id, start_height, launcher);
                e.insert(group.clone());
                (group, false)
            }
        }
    }

    fn new_group(
        self: &Arc<Self>,
        id: &str,
        start_height: u64,
        launcher: Arc<dyn GroupLauncher>,
    ) -> Arc<ConsumerGroup> {
        let (tx, rx) = mpsc::channel(self.capacity);
        Arc::new(ConsumerGroup {
            id: id.to_string(),
            start_height,
            rx: BlockReceiver {
                inner: Arc::new(tokio::sync::Mutex::new(rx)),
            },
            task: Mutex::new(GroupTask::Idle(tx)),
            cancel: self.cancel.child_token(),
            slow_mode: Arc::new(AtomicBool::new(false)),
            last_error: Arc::new(Mutex::new(None)),
            launcher,
            registry: Arc::downgrade(self),
        })
    }

    fn remove(&self, id: &str, group: &ConsumerGroup) {
        self.groups
            .remove_if(id, |_, g| std::ptr::eq(Arc::as_ptr(g), group));
    }

    pub(crate) fn len(&self) -> usize {
        self.groups.len()
    }

    /// Cancel every group and empty the registry.
    pub(crate) fn close_all(&self) {
        self.cancel.cancel();
        let groups: Vec<_> = self.groups.iter().map(|g| g.value().clone()).collect();
        for group in groups {
            group.close();
        }
    }
}
