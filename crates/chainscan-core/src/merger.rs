//! Per-day, per-address transaction aggregation.
//!
//! A [`TxAggregate`] collects everything one day of transactions changes:
//! merged transfer / bond / withdraw / reward totals with counterparty
//! breakdowns, unbond records, and the signed balance and stake deltas that
//! storage applies on top of the previous day's values.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::day::DayBucket;
use crate::error::AggregateError;

/// Totals for one address on one day, broken down by counterparty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedTransfer {
    pub total: i64,
    pub counterparties: BTreeMap<String, i64>,
}

impl MergedTransfer {
    fn add(&mut self, counterparty: &str, amount: i64) {
        self.total += amount;
        *self.counterparties.entry(counterparty.to_string()).or_insert(0) += amount;
    }
}

/// The (single) unbond a validator performed on a given day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnbondRecord {
    pub height: u64,
    pub tx_id: String,
    /// Block time of the unbond (unix seconds).
    pub time: i64,
}

/// day → address → merged totals.
pub type DayIndex = BTreeMap<DayBucket, BTreeMap<String, MergedTransfer>>;

/// The address-keyed indices a [`TxAggregate`] maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    /// sender → receivers
    TransferSender,
    /// receiver → senders
    TransferReceiver,
    /// reward receiver → proposers
    TransferReward,
    BondSender,
    BondReceiver,
    /// validator → accounts
    WithdrawSender,
    /// account → validators
    WithdrawReceiver,
}

impl IndexKind {
    pub const ALL: [IndexKind; 7] = [
        IndexKind::TransferSender,
        IndexKind::TransferReceiver,
        IndexKind::TransferReward,
        IndexKind::BondSender,
        IndexKind::BondReceiver,
        IndexKind::WithdrawSender,
        IndexKind::WithdrawReceiver,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::TransferSender => "transfer_sender",
            Self::TransferReceiver => "transfer_receiver",
            Self::TransferReward => "transfer_reward",
            Self::BondSender => "bond_sender",
            Self::BondReceiver => "bond_receiver",
            Self::WithdrawSender => "withdraw_sender",
            Self::WithdrawReceiver => "withdraw_receiver",
        }
    }
}

/// Aggregated transactions for one scan window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxAggregate {
    transfer_sender: DayIndex,
    transfer_receiver: DayIndex,
    transfer_reward: DayIndex,
    bond_sender: DayIndex,
    bond_receiver: DayIndex,
    withdraw_sender: DayIndex,
    withdraw_receiver: DayIndex,
    unbond: BTreeMap<DayBucket, BTreeMap<String, UnbondRecord>>,
    account_balance: BTreeMap<String, i64>,
    validator_stake: BTreeMap<String, i64>,
}

fn merge(index: &mut DayIndex, day: DayBucket, address: &str, counterparty: &str, amount: i64) {
    index
        .entry(day)
        .or_default()
        .entry(address.to_string())
        .or_default()
        .add(counterparty, amount);
}

fn apply_delta(deltas: &mut BTreeMap<String, i64>, address: &str, delta: i64) {
    *deltas.entry(address.to_string()).or_insert(0) += delta;
}

impl TxAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plain value transfer. The sender pays `amount + fee`.
    pub fn add_transfer(
        &mut self,
        day: DayBucket,
        sender: &str,
        receiver: &str,
        amount: i64,
        fee: i64,
    ) {
        merge(&mut self.transfer_receiver, day, receiver, sender, amount);
        merge(&mut self.transfer_sender, day, sender, receiver, amount);
        apply_delta(&mut self.account_balance, sender, -(amount + fee));
        apply_delta(&mut self.account_balance, receiver, amount);
    }

    /// Treasury payout to `receiver`, attributed to the block's proposer.
    pub fn add_reward(
        &mut self,
        day: DayBucket,
        receiver: &str,
        amount: i64,
        proposer: &str,
        treasury: &str,
    ) {
        merge(&mut self.transfer_reward, day, receiver, proposer, amount);
        apply_delta(&mut self.account_balance, receiver, amount);
        apply_delta(&mut self.account_balance, treasury, -amount);
    }

    /// Stake moved from an account into a validator.
    pub fn add_bond(&mut self, day: DayBucket, sender: &str, receiver: &str, stake: i64, fee: i64) {
        merge(&mut self.bond_receiver, day, receiver, sender, stake);
        merge(&mut self.bond_sender, day, sender, receiver, stake);
        apply_delta(&mut self.account_balance, sender, -(stake + fee));
        apply_delta(&mut self.validator_stake, receiver, stake);
    }

    /// Record a validator's unbond. A second unbond for the same validator on
    /// the same day is rejected and the first record is kept.
    pub fn add_unbond(
        &mut self,
        day: DayBucket,
        validator: &str,
        height: u64,
        tx_id: &str,
        time: i64,
    ) -> Result<(), AggregateError> {
        let records = self.unbond.entry(day).or_default();
        if records.contains_key(validator) {
            return Err(AggregateError::DuplicateUnbond {
                day,
                validator: validator.to_string(),
            });
        }
        records.insert(
            validator.to_string(),
            UnbondRecord {
                height,
                tx_id: tx_id.to_string(),
                time,
            },
        );
        Ok(())
    }

    /// Unbonded stake paid out from a validator to an account.
    /// The fee is taken from the validator's stake.
    pub fn add_withdraw(
        &mut self,
        day: DayBucket,
        validator: &str,
        account: &str,
        amount: i64,
        fee: i64,
    ) {
        merge(&mut self.withdraw_sender, day, validator, account, amount);
        merge(&mut self.withdraw_receiver, day, account, validator, amount);
        apply_delta(&mut self.account_balance, account, amount);
        apply_delta(&mut self.validator_stake, validator, -(amount + fee));
    }

    /// Debit a fee that is not part of a transfer record (batch transfers).
    pub fn charge_fee(&mut self, address: &str, fee: i64) {
        if fee != 0 {
            apply_delta(&mut self.account_balance, address, -fee);
        }
    }

    pub fn index(&self, kind: IndexKind) -> &DayIndex {
        match kind {
            IndexKind::TransferSender => &self.transfer_sender,
            IndexKind::TransferReceiver => &self.transfer_receiver,
            IndexKind::TransferReward => &self.transfer_reward,
            IndexKind::BondSender => &self.bond_sender,
            IndexKind::BondReceiver => &self.bond_receiver,
            IndexKind::WithdrawSender => &self.withdraw_sender,
            IndexKind::WithdrawReceiver => &self.withdraw_receiver,
        }
    }

    pub fn unbonds(&self) -> &BTreeMap<DayBucket, BTreeMap<String, UnbondRecord>> {
        &self.unbond
    }

    pub fn unbond(&self, day: DayBucket, validator: &str) -> Option<&UnbondRecord> {
        self.unbond.get(&day).and_then(|m| m.get(validator))
    }

    /// Signed account balance changes.
    pub fn account_deltas(&self) -> &BTreeMap<String, i64> {
        &self.account_balance
    }

    /// Signed validator stake changes.
    pub fn validator_deltas(&self) -> &BTreeMap<String, i64> {
        &self.validator_stake
    }

    /// Returns `true` if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        IndexKind::ALL.iter().all(|k| self.index(*k).is_empty())
            && self.unbond.is_empty()
            && self.account_balance.is_empty()
            && self.validator_stake.is_empty()
    }
}
