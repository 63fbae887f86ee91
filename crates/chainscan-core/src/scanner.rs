//! Day-window folding.
//!
//! [`DayScanner`] is the synchronous heart of a scan: it is fed blocks in
//! height order, keeps the running [`GlobalState`] and the current day's
//! [`TxAggregate`], and hands back a [`CommitBatch`] each time a block opens a
//! new day. It knows nothing about channels or storage, which keeps the
//! folding rules testable without a runtime.

use tracing::debug;

use crate::accounts::SupplyAccounts;
use crate::batch::CommitBatch;
use crate::day::DayBucket;
use crate::error::AggregateError;
use crate::merger::TxAggregate;
use crate::state::GlobalState;
use crate::types::{Block, TxPayload};

pub struct DayScanner {
    accounts: SupplyAccounts,
    head_height: u64,
    state: GlobalState,
    aggregate: TxAggregate,
    window: Option<DayBucket>,
    last_height: Option<u64>,
}

impl DayScanner {
    /// `head_height` is only carried into commit batches for progress reporting.
    pub fn new(accounts: SupplyAccounts, state: GlobalState, head_height: u64) -> Self {
        Self {
            accounts,
            head_height,
            state,
            aggregate: TxAggregate::new(),
            window: None,
            last_height: None,
        }
    }

    /// Fold one block. Returns the finished previous day if this block
    /// starts a new one.
    pub fn push(&mut self, block: &Block) -> Result<Option<CommitBatch>, AggregateError> {
        let day = block.day();
        let mut finished = None;

        match self.window {
            None => {
                self.window = Some(day);
                self.state.reset(day);
            }
            Some(current) if current != day => {
                finished = Some(self.rotate(current, day));
            }
            Some(_) => {}
        }

        self.fold(day, block)?;
        self.last_height = Some(block.height);
        Ok(finished)
    }

    fn rotate(&mut self, current: DayBucket, next: DayBucket) -> CommitBatch {
        let aggregate = std::mem::take(&mut self.aggregate);
        let height = self.last_height.unwrap_or_default();
        let batch = CommitBatch::new(
            height,
            self.head_height,
            current,
            aggregate,
            self.state.snapshot(),
        );
        debug!(day = %current, next = %next, height, "day rotated");
        self.window = Some(next);
        self.state.reset(next);
        batch
    }

    fn fold(&mut self, day: DayBucket, block: &Block) -> Result<(), AggregateError> {
        self.state.txs += block.txs.len() as u64;
        self.state.blocks += 1;
        self.state.mark_validator(&block.proposer);

        for tx in &block.txs {
            self.state.fee += tx.fee;
            match &tx.payload {
                TxPayload::Unspecified | TxPayload::Sortition { .. } => {}
                TxPayload::Transfer {
                    sender,
                    receiver,
                    amount,
                } => {
                    self.state.mark_account(sender);
                    self.move_value(day, &block.proposer, sender, receiver, *amount, tx.fee);
                }
                TxPayload::Bond {
                    sender,
                    receiver,
                    stake,
                } => {
                    self.aggregate.add_bond(day, sender, receiver, *stake, tx.fee);
                    self.state.stake += stake;
                    self.state.circulating_supply -= stake;
                }
                TxPayload::Unbond { validator } => {
                    self.aggregate
                        .add_unbond(day, validator, block.height, &tx.id, block.timestamp)?;
                }
                TxPayload::Withdraw {
                    validator,
                    account,
                    amount,
                } => {
                    self.aggregate
                        .add_withdraw(day, validator, account, *amount, tx.fee);
                    self.state.stake -= amount;
                    self.state.circulating_supply += amount;
                }
                TxPayload::BatchTransfer { sender, recipients } => {
                    self.state.mark_account(sender);
                    for r in recipients {
                        self.move_value(day, &block.proposer, sender, &r.receiver, r.amount, 0);
                    }
                    if !self.accounts.is_treasury(sender) {
                        self.aggregate.charge_fee(sender, tx.fee);
                    }
                }
            }
        }
        Ok(())
    }

    fn move_value(
        &mut self,
        day: DayBucket,
        proposer: &str,
        sender: &str,
        receiver: &str,
        amount: i64,
        fee: i64,
    ) {
        let minted = self.accounts.supply_delta(sender, receiver, amount);
        self.state.supply += minted;
        self.state.circulating_supply += minted;

        if self.accounts.is_treasury(sender) {
            self.aggregate
                .add_reward(day, receiver, amount, proposer, &self.accounts.treasury);
        } else {
            self.aggregate.add_transfer(day, sender, receiver, amount, fee);
        }
    }

    /// Height of the last folded block.
    pub fn last_height(&self) -> Option<u64> {
        self.last_height
    }

    /// The day currently being accumulated.
    pub fn window(&self) -> Option<DayBucket> {
        self.window
    }

    pub fn state(&self) -> &GlobalState {
        &self.state
    }

    pub fn aggregate(&self) -> &TxAggregate {
        &self.aggregate
    }

    /// The unfinished day.
    pub fn into_parts(self) -> (GlobalState, TxAggregate) {
        (self.state, self.aggregate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::MAINNET_TREASURY;
    use crate::merger::IndexKind;
    use crate::types::{Recipient, Transaction};

    const DAY: i64 = 86_400;

    fn tx(id: &str, fee: i64, payload: TxPayload) -> Transaction {
        Transaction {
            id: id.into(),
            fee,
            payload,
        }
    }

    fn block(height: u64, timestamp: i64, txs: Vec<Transaction>) -> Block {
        Block {
            height,
            timestamp,
            proposer: "P".into(),
            txs,
        }
    }

    fn scanner() -> DayScanner {
        DayScanner::new(SupplyAccounts::none("T"), GlobalState::new(), 100)
    }

    #[test]
    fn first_block_opens_window_without_commit() {
        let mut s = scanner();
        let out = s.push(&block(1, 10 * DAY + 5, vec![])).unwrap();
        assert!(out.is_none());
        assert_eq!(s.window(), Some(DayBucket::from_timestamp(10 * DAY)));
        assert_eq!(s.state().blocks, 1);
        assert!(s.state().active_validators.contains("P"));
    }

    #[test]
    fn rotation_commits_previous_day_with_last_folded_height() {
        let mut s = scanner();
        s.push(&block(
            1,
            100,
            vec![tx(
                "t1",
                1,
                TxPayload::Transfer {
                    sender: "A".into(),
                    receiver: "B".into(),
                    amount: 100,
                },
            )],
        ))
        .unwrap();
        s.push(&block(2, 200, vec![])).unwrap();

        let batch = s.push(&block(3, DAY + 1, vec![])).unwrap().unwrap();
        assert_eq!(batch.height(), 2);
        assert_eq!(batch.head_height(), 100);
        assert_eq!(batch.day(), DayBucket::from_timestamp(0));
        assert_eq!(batch.status().blocks, 2);
        assert_eq!(batch.status().txs, 1);
        assert_eq!(batch.status().fee, 1);
        assert_eq!(batch.status().active_accounts, 1);
        assert_eq!(batch.aggregate().account_deltas()["A"], -101);

        // the new day starts from scratch
        assert_eq!(s.state().blocks, 1);
        assert_eq!(s.state().fee, 0);
        assert!(s.aggregate().is_empty());
        assert_eq!(s.last_height(), Some(3));
    }

    #[test]
    fn treasury_transfer_is_reward() {
        let mut s = scanner();
        s.push(&block(
            1,
            0,
            vec![tx(
                "r",
                0,
                TxPayload::Transfer {
                    sender: "T".into(),
                    receiver: "V".into(),
                    amount: 7,
                },
            )],
        ))
        .unwrap();
        let rewards = &s.aggregate().index(IndexKind::TransferReward)[&DayBucket::from_timestamp(0)];
        assert_eq!(rewards["V"].counterparties["P"], 7);
        assert_eq!(s.aggregate().account_deltas()["T"], -7);
        assert!(s.aggregate().index(IndexKind::TransferSender).is_empty());
    }

    #[test]
    fn reserve_and_team_transfers_move_supply() {
        let mut accounts = SupplyAccounts::none(MAINNET_TREASURY);
        accounts.reserve.insert("R".into());
        accounts.team_hot.insert("H".into());
        let mut s = DayScanner::new(accounts, GlobalState::new(), 10);
        let transfer = |id: &str, from: &str, to: &str, amount| {
            tx(
                id,
                0,
                TxPayload::Transfer {
                    sender: from.into(),
                    receiver: to.into(),
                    amount,
                },
            )
        };
        s.push(&block(
            1,
            0,
            vec![transfer("1", "R", "X", 30), transfer("2", "H", "Y", 5), transfer("3", "Z", "R", 2)],
        ))
        .unwrap();
        assert_eq!(s.state().supply, 33);
        assert_eq!(s.state().circulating_supply, 33);
    }

    #[test]
    fn batch_transfer_charges_fee_once() {
        let mut s = scanner();
        s.push(&block(
            1,
            0,
            vec![tx(
                "b",
                3,
                TxPayload::BatchTransfer {
                    sender: "A".into(),
                    recipients: vec![
                        Recipient {
                            receiver: "B".into(),
                            amount: 10,
                        },
                        Recipient {
                            receiver: "C".into(),
                            amount: 20,
                        },
                    ],
                },
            )],
        ))
        .unwrap();
        let deltas = s.aggregate().account_deltas();
        assert_eq!(deltas["A"], -33);
        assert_eq!(deltas["B"], 10);
        assert_eq!(deltas["C"], 20);
        assert_eq!(s.state().fee, 3);
        assert_eq!(s.state().txs, 1);
    }

    #[test]
    fn bond_and_withdraw_move_stake() {
        let mut s = scanner();
        s.push(&block(
            1,
            0,
            vec![
                tx(
                    "b",
                    1,
                    TxPayload::Bond {
                        sender: "A".into(),
                        receiver: "V".into(),
                        stake: 50,
                    },
                ),
                tx(
                    "w",
                    1,
                    TxPayload::Withdraw {
                        validator: "V".into(),
                        account: "A".into(),
                        amount: 20,
                    },
                ),
                tx("s", 0, TxPayload::Sortition { address: "V".into() }),
            ],
        ))
        .unwrap();
        assert_eq!(s.state().stake, 30);
        assert_eq!(s.state().circulating_supply, -30);
        assert_eq!(s.state().txs, 3);
        assert_eq!(s.state().fee, 2);
        assert!(s.state().active_accounts.is_empty());
    }

    #[test]
    fn duplicate_unbond_fails_the_fold() {
        let mut s = scanner();
        let unbond = |id: &str| tx(id, 0, TxPayload::Unbond { validator: "V".into() });
        s.push(&block(1, 0, vec![unbond("u1")])).unwrap();
        let err = s.push(&block(2, 10, vec![unbond("u2")])).unwrap_err();
        assert!(matches!(err, AggregateError::DuplicateUnbond { .. }));
        let kept = s.aggregate().unbond(DayBucket::from_timestamp(0), "V").unwrap();
        assert_eq!(kept.tx_id, "u1");
        assert_eq!(kept.height, 1);
    }
}
