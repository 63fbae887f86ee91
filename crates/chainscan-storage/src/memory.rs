//! In-memory commit store.
//!
//! Keeps every committed part in RAM, keyed the way a relational backend
//! would key its tables. Re-writing a batch (at-least-once delivery) upserts
//! the keyed parts and skips balance / stake deltas already applied for that
//! day, so a replayed commit converges to the same state.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use chainscan_core::{
    ChainStore, CommitBatch, CommitPart, DayBucket, IndexKind, MergedTransfer, NetworkStatus,
    StoreError, UnbondRecord,
};

#[derive(Default)]
struct Tables {
    cursor: BTreeMap<u64, DayBucket>,
    status: BTreeMap<DayBucket, NetworkStatus>,
    index: HashMap<IndexKind, BTreeMap<(DayBucket, String), MergedTransfer>>,
    unbond: BTreeMap<(DayBucket, String), UnbondRecord>,
    balance: BTreeMap<String, i64>,
    stake: BTreeMap<String, i64>,
    applied: HashSet<(CommitPart, DayBucket)>,
    writes: u64,
}

/// In-memory [`ChainStore`].
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
    failing: Mutex<BTreeSet<&'static str>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that already committed up to `height` with `status`.
    pub fn seeded(height: u64, status: NetworkStatus) -> Self {
        let store = Self::new();
        {
            let mut t = store.tables();
            t.cursor.insert(height, status.day);
            t.status.insert(status.day, status);
        }
        store
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every write of `part` fail until [`heal`](Self::heal) is called.
    pub fn fail_on(&self, part: CommitPart) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(part.name());
    }

    pub fn heal(&self) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn is_failing(&self, part: CommitPart) -> bool {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(part.name())
    }

    /// Committed cursor rows, height → day.
    pub fn cursors(&self) -> BTreeMap<u64, DayBucket> {
        self.tables().cursor.clone()
    }

    pub fn network_status(&self, day: DayBucket) -> Option<NetworkStatus> {
        self.tables().status.get(&day).cloned()
    }

    /// Every committed day, oldest first.
    pub fn days(&self) -> Vec<DayBucket> {
        self.tables().status.keys().copied().collect()
    }

    pub fn merged(&self, kind: IndexKind, day: DayBucket, address: &str) -> Option<MergedTransfer> {
        self.tables()
            .index
            .get(&kind)
            .and_then(|rows| rows.get(&(day, address.to_string())))
            .cloned()
    }

    pub fn unbond(&self, day: DayBucket, validator: &str) -> Option<UnbondRecord> {
        self.tables()
            .unbond
            .get(&(day, validator.to_string()))
            .cloned()
    }

    /// Net balance change applied for `address` across all commits.
    pub fn balance(&self, address: &str) -> i64 {
        self.tables().balance.get(address).copied().unwrap_or(0)
    }

    pub fn stake(&self, validator: &str) -> i64 {
        self.tables().stake.get(validator).copied().unwrap_or(0)
    }

    /// Successful part writes so far.
    pub fn write_count(&self) -> u64 {
        self.tables().writes
    }
}

fn apply_deltas(target: &mut BTreeMap<String, i64>, deltas: &BTreeMap<String, i64>) -> u64 {
    for (address, delta) in deltas {
        *target.entry(address.clone()).or_insert(0) += delta;
    }
    deltas.len() as u64
}

#[async_trait]
impl ChainStore for InMemoryStore {
    async fn top_committed_height(&self) -> Result<Option<u64>, StoreError> {
        Ok(self.tables().cursor.keys().next_back().copied())
    }

    async fn top_network_status(&self) -> Result<Option<NetworkStatus>, StoreError> {
        Ok(self.tables().status.values().next_back().cloned())
    }

    async fn write(&self, part: CommitPart, batch: &CommitBatch) -> Result<u64, StoreError> {
        if self.is_failing(part) {
            return Err(StoreError::Backend(format!("injected failure writing {part}")));
        }

        let day = batch.day();
        let aggregate = batch.aggregate();
        let mut t = self.tables();

        let rows = match part {
            CommitPart::Cursor => {
                t.cursor.insert(batch.height(), day);
                1
            }
            CommitPart::NetworkStatus => {
                t.status.insert(day, batch.status().clone());
                1
            }
            CommitPart::Index(kind) => {
                let table = t.index.entry(kind).or_default();
                let mut rows = 0;
                for (d, addresses) in aggregate.index(kind) {
                    for (address, merged) in addresses {
                        table.insert((*d, address.clone()), merged.clone());
                        rows += 1;
                    }
                }
                rows
            }
            CommitPart::Unbond => {
                let mut rows = 0;
                for (d, validators) in aggregate.unbonds() {
                    for (validator, record) in validators {
                        t.unbond.insert((*d, validator.clone()), record.clone());
                        rows += 1;
                    }
                }
                rows
            }
            CommitPart::AccountBalance => {
                if t.applied.insert((part, day)) {
                    apply_deltas(&mut t.balance, aggregate.account_deltas())
                } else {
                    0
                }
            }
            CommitPart::ValidatorStake => {
                if t.applied.insert((part, day)) {
                    apply_deltas(&mut t.stake, aggregate.validator_deltas())
                } else {
                    0
                }
            }
        };

        t.writes += 1;
        debug!(part = %part, day = %day, rows, "part written");
        Ok(rows)
    }
}
