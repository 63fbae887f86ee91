//! Running network counters.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::day::DayBucket;

/// The persisted form of [`GlobalState`] for one day.
///
/// Active sets are reduced to their sizes; this is what a commit stores and
/// what the scan resumes from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStatus {
    pub day: DayBucket,
    pub stake: i64,
    pub supply: i64,
    pub circulating_supply: i64,
    pub txs: u64,
    pub blocks: u64,
    pub fee: i64,
    pub active_validators: u64,
    pub active_accounts: u64,
}

/// Network totals carried across the whole scan plus counters for the
/// current day.
///
/// `stake`, `supply` and `circulating_supply` are cumulative and never reset.
/// Everything else belongs to `day` and is cleared by [`GlobalState::reset`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalState {
    pub day: DayBucket,
    pub stake: i64,
    pub supply: i64,
    pub circulating_supply: i64,
    pub txs: u64,
    pub blocks: u64,
    pub fee: i64,
    pub active_validators: BTreeSet<String>,
    pub active_accounts: BTreeSet<String>,
}

impl GlobalState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue from the last committed status: cumulative totals carry over,
    /// per-day counters start empty.
    pub fn resume(status: &NetworkStatus) -> Self {
        Self {
            day: status.day,
            stake: status.stake,
            supply: status.supply,
            circulating_supply: status.circulating_supply,
            ..Self::default()
        }
    }

    /// Start a new day: clear per-day counters, keep cumulative totals.
    pub fn reset(&mut self, day: DayBucket) {
        self.day = day;
        self.txs = 0;
        self.blocks = 0;
        self.fee = 0;
        self.active_validators.clear();
        self.active_accounts.clear();
    }

    pub fn mark_validator(&mut self, address: &str) {
        if !self.active_validators.contains(address) {
            self.active_validators.insert(address.to_string());
        }
    }

    pub fn mark_account(&mut self, address: &str) {
        if !self.active_accounts.contains(address) {
            self.active_accounts.insert(address.to_string());
        }
    }

    /// Copy for a commit; the running state keeps its sets.
    pub fn snapshot(&self) -> NetworkStatus {
        NetworkStatus {
            day: self.day,
            stake: self.stake,
            supply: self.supply,
            circulating_supply: self.circulating_supply,
            txs: self.txs,
            blocks: self.blocks,
            fee: self.fee,
            active_validators: self.active_validators.len() as u64,
            active_accounts: self.active_accounts.len() as u64,
        }
    }
}
