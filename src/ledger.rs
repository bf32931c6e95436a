//! Account ledger: a mutex-guarded map of account id to balance.
//!
//! Two instances exist per node: the live ledger, which always reflects
//! the sequential application of the current longest chain, and the
//! genesis ledger, a pristine snapshot used as the replay base on
//! rollback.
//!
//! Fee policy: 1 unit of every applied transfer is burned — the sender is
//! debited the full amount, the recipient credited `amount - 1`. A
//! transfer the sender cannot afford is rejected without touching either
//! balance; balances never go negative.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;

use crate::types::{AccountId, SignedTransaction};

/// Initial balance of each founding account.
pub const GENESIS_ALLOCATION: i64 = 1_000_000;

/// Flat reward credited to a verified block proposer.
pub const BASE_REWARD: i64 = 10;

/// Units burned per applied transfer.
pub const TRANSFER_FEE: i64 = 1;

#[derive(Debug, Default)]
pub struct Ledger {
    accounts: Mutex<HashMap<AccountId, i64>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a transfer. Accounts are created lazily with zero balance.
    /// Returns false (and leaves all balances untouched) if the sender
    /// cannot cover the amount.
    pub fn apply(&self, tx: &SignedTransaction) -> bool {
        let mut accounts = self.accounts.lock().unwrap();
        let from_balance = *accounts.entry(tx.from.clone()).or_insert(0);
        accounts.entry(tx.to.clone()).or_insert(0);

        if from_balance < tx.amount {
            debug!(
                id = %tx.id,
                balance = from_balance,
                amount = tx.amount,
                "transfer rejected: insufficient balance"
            );
            return false;
        }
        *accounts.get_mut(&tx.from).unwrap() -= tx.amount;
        *accounts.get_mut(&tx.to).unwrap() += tx.amount - TRANSFER_FEE;
        true
    }

    /// Credit the proposer of a verified winning block: a flat reward plus
    /// one unit per included transaction.
    pub fn credit_reward(&self, vk: &str, tx_count: usize) {
        let reward = BASE_REWARD + tx_count as i64;
        let mut accounts = self.accounts.lock().unwrap();
        *accounts.entry(vk.to_string()).or_insert(0) += reward;
    }

    /// Create an account with zero balance. Returns false if it exists.
    pub fn add_account(&self, key: &str) -> bool {
        let mut accounts = self.accounts.lock().unwrap();
        if accounts.contains_key(key) {
            return false;
        }
        accounts.insert(key.to_string(), 0);
        true
    }

    /// Create a founding account with the genesis allocation. Returns
    /// false if it exists.
    pub fn add_genesis_account(&self, key: &str) -> bool {
        let mut accounts = self.accounts.lock().unwrap();
        if accounts.contains_key(key) {
            return false;
        }
        accounts.insert(key.to_string(), GENESIS_ALLOCATION);
        true
    }

    /// Balance of an account; unknown accounts read as zero.
    pub fn balance(&self, key: &str) -> i64 {
        *self.accounts.lock().unwrap().get(key).unwrap_or(&0)
    }

    /// Copy of the full account map.
    pub fn snapshot(&self) -> HashMap<AccountId, i64> {
        self.accounts.lock().unwrap().clone()
    }

    /// Replace the entire state with a snapshot. Used on rollback to reset
    /// the live ledger to the genesis ledger before replay.
    pub fn restore(&self, snapshot: HashMap<AccountId, i64>) {
        *self.accounts.lock().unwrap() = snapshot;
    }
}
