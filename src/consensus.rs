//! Proof-of-stake consensus engine.
//!
//! One engine per node. It sleeps in `AwaitingGenesis` until the genesis
//! block arrives (or is self-produced), then runs the per-slot lottery,
//! assembles blocks on wins, verifies incoming winning blocks, and keeps
//! the live ledger reconciled against the longest chain in the block
//! tree.
//!
//! Stake policy: the lottery weighs accounts by their balance in the
//! genesis snapshot, on both the proposing and the verifying side. Live
//! balances never enter the win condition, so verification is stable
//! under reorganization.
//!
//! Reward policy: a proposer is rewarded exactly when its block sits on
//! the canonical chain — credited directly on the fast path, re-credited
//! by replay after a rollback. Blocks parked on side branches earn their
//! reward if and when their branch becomes canonical.

use std::sync::Arc;

use num_bigint::BigUint;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::block_tree::{BlockTree, TreeError};
use crate::crypto::{self, CryptoError, Keypair};
use crate::ledger::Ledger;
use crate::store::TxStore;
use crate::types::{
    lottery_payload, ticket_payload, Block, GenesisBlock, SignedTransaction,
};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("engine is not active: genesis block not yet processed")]
    NotActive,
    #[error("genesis block already processed")]
    AlreadyActive,
    #[error("invalid genesis block: {0}")]
    InvalidGenesis(String),
    #[error("block content hash does not match its fields")]
    HashMismatch,
    #[error("block signature did not verify under the proposer key")]
    BadBlockSignature,
    #[error("lottery draw did not verify under the proposer key")]
    BadDraw,
    #[error("stake-weighted draw value does not exceed hardness")]
    InsufficientStake,
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// How an accepted block affected the canonical chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    /// Appended to the longest leaf; transactions applied directly.
    Extended,
    /// Attached to a side branch that is still shorter; no ledger change.
    SideChain,
    /// Attached to a branch that overtook the old canonical chain; the
    /// ledger was rebuilt from the genesis snapshot.
    Reorganized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    AwaitingGenesis,
    Active,
}

pub struct ConsensusEngine {
    keypair: Keypair,
    store: Arc<TxStore>,
    ledger: Ledger,
    genesis_ledger: Ledger,
    tree: BlockTree,
    state: EngineState,
    seed: u64,
    hardness: BigUint,
    slot: u64,
    /// Transaction ids buffered for this node's next candidate block.
    pending: Vec<String>,
}

impl ConsensusEngine {
    pub fn new(keypair: Keypair, store: Arc<TxStore>) -> Self {
        Self {
            keypair,
            store,
            ledger: Ledger::new(),
            genesis_ledger: Ledger::new(),
            tree: BlockTree::new(),
            state: EngineState::AwaitingGenesis,
            seed: 0,
            hardness: BigUint::default(),
            slot: 0,
            pending: Vec::new(),
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == EngineState::Active
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn genesis_ledger(&self) -> &Ledger {
        &self.genesis_ledger
    }

    pub fn tree(&self) -> &BlockTree {
        &self.tree
    }

    pub fn slot(&self) -> u64 {
        self.slot
    }

    pub fn public_key(&self) -> String {
        self.keypair.public_key()
    }

    /// Hash of the current longest-chain leaf.
    pub fn canonical_leaf(&self) -> String {
        self.tree.longest_leaf().0.to_string()
    }

    /// Process the genesis block: seed both ledgers with the founding
    /// accounts, adopt seed and hardness, root the tree, go active.
    pub fn on_genesis(&mut self, genesis: &GenesisBlock) -> Result<(), EngineError> {
        if self.is_active() {
            return Err(EngineError::AlreadyActive);
        }
        if genesis.founders.is_empty() {
            return Err(EngineError::InvalidGenesis("no founding accounts".into()));
        }
        let hardness = crypto::parse_decimal(&genesis.hardness)
            .map_err(|e| EngineError::InvalidGenesis(e.to_string()))?;

        for key in &genesis.founders {
            self.ledger.add_genesis_account(key);
            self.genesis_ledger.add_genesis_account(key);
        }
        self.seed = genesis.seed;
        self.hardness = hardness;
        self.tree = BlockTree::new();
        self.slot = 0;
        self.state = EngineState::Active;

        info!(
            founders = genesis.founders.len(),
            seed = genesis.seed,
            "genesis processed, consensus active"
        );
        Ok(())
    }

    /// Validate a freshly received transaction and buffer its id for this
    /// node's next candidate block. Returns false for transactions that
    /// must not be gossiped further.
    pub fn buffer_transaction(&mut self, tx: &SignedTransaction) -> bool {
        if tx.amount < 1 {
            debug!(id = %tx.id, amount = tx.amount, "rejected transaction: non-positive amount");
            return false;
        }
        if !tx.verify_signature() {
            debug!(id = %tx.id, "rejected transaction: bad signature");
            return false;
        }
        self.pending.push(tx.id.clone());
        true
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// One lottery round. Advances the slot, draws, and returns a signed,
    /// sealed block on a win.
    pub fn on_slot(&mut self) -> Result<Option<Block>, EngineError> {
        if !self.is_active() {
            return Err(EngineError::NotActive);
        }
        self.slot += 1;
        let slot = self.slot;
        let vk = self.keypair.public_key();
        let draw = self.keypair.sign(&lottery_payload(self.seed, slot));

        if self.draw_value(&vk, slot, &draw) <= self.hardness {
            debug!(slot, "lottery lost");
            return Ok(None);
        }

        let tx_ids = std::mem::take(&mut self.pending);
        let prev_hash = self.canonical_leaf();
        let block = Block::create(&self.keypair, slot, tx_ids, draw, prev_hash);
        info!(slot, txs = block.tx_ids.len(), hash = %block.hash, "lottery won, block assembled");
        Ok(Some(block))
    }

    /// `stake_at_genesis(vk) * H(ticket payload)`, the quantity compared
    /// against hardness. Unbounded precision.
    fn draw_value(&self, vk: &str, slot: u64, draw: &str) -> BigUint {
        let stake = self.genesis_ledger.balance(vk).max(0) as u64;
        let ticket = crypto::hash_to_int(&ticket_payload(self.seed, slot, vk, draw));
        BigUint::from(stake) * ticket
    }

    /// Verify a candidate winning block without mutating any state.
    pub fn verify_block(&self, block: &Block) -> Result<(), EngineError> {
        if !block.hash_is_consistent() {
            return Err(EngineError::HashMismatch);
        }
        if !crypto::verify(&block.vk, &block.signing_payload(), &block.signature) {
            return Err(EngineError::BadBlockSignature);
        }
        if !crypto::verify(&block.vk, &lottery_payload(self.seed, block.slot), &block.draw) {
            return Err(EngineError::BadDraw);
        }
        if self.draw_value(&block.vk, block.slot, &block.draw) <= self.hardness {
            return Err(EngineError::InsufficientStake);
        }
        Ok(())
    }

    /// Verify a received block, insert it into the tree, and reconcile the
    /// ledger against the possibly-changed longest chain.
    pub fn on_block(&mut self, block: Block) -> Result<BlockOutcome, EngineError> {
        if !self.is_active() {
            return Err(EngineError::NotActive);
        }
        self.verify_block(&block)?;

        let old_leaf = self.canonical_leaf();
        let fast_path = block.prev_hash == old_leaf;
        let hash = block.hash.clone();
        let vk = block.vk.clone();
        let tx_ids = block.tx_ids.clone();
        let slot = block.slot;

        self.tree.insert(block)?;
        let new_leaf = self.canonical_leaf();

        if fast_path {
            // strictly deeper than the old leaf, so it is the new leaf
            self.ledger.credit_reward(&vk, tx_ids.len());
            self.apply_transactions(&tx_ids);
            self.prune_pending(&tx_ids);
            debug!(slot, hash = %hash, "chain extended");
            return Ok(BlockOutcome::Extended);
        }

        if new_leaf == old_leaf {
            debug!(slot, hash = %hash, "block parked on side branch");
            return Ok(BlockOutcome::SideChain);
        }

        info!(slot, old = %old_leaf, new = %new_leaf, "longest chain changed, rolling back");
        self.rollback(&new_leaf);
        self.prune_pending(&tx_ids);
        Ok(BlockOutcome::Reorganized)
    }

    /// Reset the live ledger to the genesis snapshot and replay every
    /// block along the new canonical chain. A full replay, not a diff:
    /// correct under arbitrary-depth reorganizations.
    fn rollback(&mut self, leaf: &str) {
        self.ledger.restore(self.genesis_ledger.snapshot());
        let chain: Vec<(String, Vec<String>)> = self
            .tree
            .chain_from_genesis(leaf)
            .into_iter()
            .map(|b| (b.vk.clone(), b.tx_ids.clone()))
            .collect();
        for (vk, tx_ids) in chain {
            self.ledger.credit_reward(&vk, tx_ids.len());
            self.apply_transactions(&tx_ids);
        }
    }

    /// Apply a block's referenced transactions to the live ledger. A
    /// transaction that fails validation or is no longer affordable is
    /// skipped; the block itself stays accepted.
    fn apply_transactions(&self, tx_ids: &[String]) {
        for id in tx_ids {
            let Some(tx) = self.store.get_tx(id) else {
                warn!(id = %id, "block references unknown transaction, skipping");
                continue;
            };
            if tx.amount < 1 || !tx.verify_signature() {
                warn!(id = %id, "invalid transaction in block, skipping");
                continue;
            }
            if !self.ledger.apply(&tx) {
                warn!(id = %id, "transaction no longer affordable, skipping");
            }
        }
    }

    /// Drop ids that made it into an accepted block from the local
    /// candidate buffer so they are not proposed twice.
    fn prune_pending(&mut self, included: &[String]) {
        if self.pending.is_empty() || included.is_empty() {
            return;
        }
        self.pending.retain(|id| !included.contains(id));
    }
}
