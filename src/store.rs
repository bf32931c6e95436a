//! Seen-message bookkeeping shared by the overlay and the engine.
//!
//! Transactions are kept in full: the same map that suppresses gossip
//! re-broadcast also resolves the transaction ids referenced by blocks
//! during ledger replay. Block hashes only need a membership set. Entries
//! are never removed.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::types::SignedTransaction;

#[derive(Debug, Default)]
pub struct TxStore {
    txs: Mutex<HashMap<String, SignedTransaction>>,
    blocks: Mutex<HashSet<String>>,
}

impl TxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a transaction. Returns true exactly once per id: the caller
    /// forwards it on first sight and drops silent duplicates.
    pub fn record_tx(&self, tx: &SignedTransaction) -> bool {
        let mut txs = self.txs.lock().unwrap();
        if txs.contains_key(&tx.id) {
            return false;
        }
        txs.insert(tx.id.clone(), tx.clone());
        true
    }

    /// Resolve a transaction id referenced by a block.
    pub fn get_tx(&self, id: &str) -> Option<SignedTransaction> {
        self.txs.lock().unwrap().get(id).cloned()
    }

    /// Record a block hash. Returns true exactly once per hash.
    pub fn record_block(&self, hash: &str) -> bool {
        self.blocks.lock().unwrap().insert(hash.to_string())
    }

    pub fn has_block(&self, hash: &str) -> bool {
        self.blocks.lock().unwrap().contains(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(id: &str) -> SignedTransaction {
        SignedTransaction {
            id: id.into(),
            from: "a".into(),
            to: "b".into(),
            amount: 1,
            signature: String::new(),
        }
    }

    #[test]
    fn record_tx_true_only_once() {
        let store = TxStore::new();
        assert!(store.record_tx(&tx("1")));
        assert!(!store.record_tx(&tx("1")));
        assert!(store.record_tx(&tx("2")));
    }

    #[test]
    fn recorded_tx_resolvable_by_id() {
        let store = TxStore::new();
        store.record_tx(&tx("42"));
        assert_eq!(store.get_tx("42").unwrap().id, "42");
        assert!(store.get_tx("43").is_none());
    }

    #[test]
    fn record_block_true_only_once() {
        let store = TxStore::new();
        assert!(store.record_block("h"));
        assert!(!store.record_block("h"));
        assert!(store.has_block("h"));
        assert!(!store.has_block("g"));
    }
}
