//! Core data model: transactions, blocks, genesis.
//!
//! Every cryptographic field (keys, signatures, draws, hashes) is decimal
//! text so that signing payloads can be assembled by plain string joins,
//! independent of the wire encoding.

use serde::{Deserialize, Serialize};

use crate::crypto::{self, Keypair};

/// Account identifier: the RSA modulus as decimal text.
pub type AccountId = String;

/// Sentinel identity of the genesis node in the block tree.
pub const GENESIS_HASH: &str = "genesis";

/// Number of founding accounts seeded at genesis.
pub const FOUNDER_COUNT: usize = 10;

/// A transfer signed by the sender. Immutable once created: it is gossiped
/// verbatim, referenced by `id` inside blocks, and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub id: String,
    pub from: AccountId,
    pub to: AccountId,
    pub amount: i64,
    pub signature: String,
}

impl SignedTransaction {
    /// Create and sign a transfer with the sender's keypair. The id is a
    /// fresh random value; uniqueness per session is all the protocol needs.
    pub fn create(keypair: &Keypair, to: AccountId, amount: i64) -> Self {
        let id = rand::random::<u128>().to_string();
        let from = keypair.public_key();
        let signature = keypair.sign(&signing_payload(&id, &from, &to, amount));
        Self { id, from, to, amount, signature }
    }

    /// Check the signature against the sender's own public key.
    pub fn verify_signature(&self) -> bool {
        crypto::verify(
            &self.from,
            &signing_payload(&self.id, &self.from, &self.to, self.amount),
            &self.signature,
        )
    }
}

fn signing_payload(id: &str, from: &str, to: &str, amount: i64) -> String {
    format!("{id}{from}{to}{amount}")
}

/// A candidate block: transaction ids assembled by a lottery winner,
/// anchored at a parent via `prev_hash` and sealed with a content hash
/// that becomes its identity in the block tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub tx_ids: Vec<String>,
    pub vk: AccountId,
    pub slot: u64,
    pub draw: String,
    pub prev_hash: String,
    pub signature: String,
    pub hash: String,
}

impl Block {
    /// Assemble, sign and seal a block for `slot` on top of `prev_hash`.
    pub fn create(
        keypair: &Keypair,
        slot: u64,
        tx_ids: Vec<String>,
        draw: String,
        prev_hash: String,
    ) -> Self {
        let signature = keypair.sign(&block_payload(slot, &tx_ids, &prev_hash));
        let mut block = Self {
            tx_ids,
            vk: keypair.public_key(),
            slot,
            draw,
            prev_hash,
            signature,
            hash: String::new(),
        };
        block.hash = block.content_hash();
        block
    }

    /// Hash of all fields fixed before sealing, joined with `:`.
    pub fn content_hash(&self) -> String {
        let joined = format!(
            "BLOCK:{}:{}:{}:{}:{}:{}",
            self.vk,
            self.slot,
            self.draw,
            self.tx_ids.join(":"),
            self.prev_hash,
            self.signature,
        );
        crypto::hash_to_decimal(&joined)
    }

    /// The sealed hash must match the content; a mismatch means the block
    /// was tampered with in flight.
    pub fn hash_is_consistent(&self) -> bool {
        self.hash == self.content_hash()
    }

    /// Payload covered by sigma, for verification.
    pub fn signing_payload(&self) -> String {
        block_payload(self.slot, &self.tx_ids, &self.prev_hash)
    }
}

/// `"BLOCK:slot:transactionIDs:prevHash"` — the message sigma covers.
pub fn block_payload(slot: u64, tx_ids: &[String], prev_hash: &str) -> String {
    format!("BLOCK:{}:{}:{}", slot, tx_ids.join(":"), prev_hash)
}

/// `"LOTTERY:seed:slot"` — the message a draw signs.
pub fn lottery_payload(seed: u64, slot: u64) -> String {
    format!("LOTTERY:{seed}:{slot}")
}

/// `"LOTTERY:seed:slot:vk:draw"` — hashed into the lottery ticket.
pub fn ticket_payload(seed: u64, slot: u64, vk: &str, draw: &str) -> String {
    format!("LOTTERY:{seed}:{slot}:{vk}:{draw}")
}

/// The distinguished first block: founding public keys, the lottery seed
/// and the hardness threshold. Has no parent and no proposer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisBlock {
    pub founders: Vec<AccountId>,
    pub seed: u64,
    /// Decimal; unbounded precision.
    pub hardness: String,
}

impl GenesisBlock {
    /// Gossip identity of the genesis announcement.
    pub fn gossip_hash(&self) -> String {
        let joined = format!("GENESIS:{}:{}:{}", self.founders.join(":"), self.seed, self.hardness);
        crypto::hash_to_decimal(&joined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn keypair(seed: u64) -> Keypair {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        Keypair::generate(512, &mut rng).unwrap()
    }

    #[test]
    fn transaction_signature_verifies() {
        let kp = keypair(10);
        let tx = SignedTransaction::create(&kp, "receiver".into(), 50);
        assert!(tx.verify_signature());
    }

    #[test]
    fn tampered_amount_fails_verification() {
        let kp = keypair(11);
        let mut tx = SignedTransaction::create(&kp, "receiver".into(), 50);
        tx.amount = 500;
        assert!(!tx.verify_signature());
    }

    #[test]
    fn block_hash_detects_mutation() {
        let kp = keypair(12);
        let block = Block::create(&kp, 3, vec!["t1".into()], "draw".into(), GENESIS_HASH.into());
        assert!(block.hash_is_consistent());

        let mut forged = block.clone();
        forged.tx_ids.push("t2".into());
        assert!(!forged.hash_is_consistent());
    }

    #[test]
    fn block_signature_covers_slot_ids_and_parent() {
        let kp = keypair(13);
        let block = Block::create(&kp, 7, vec!["a".into(), "b".into()], "d".into(), "p".into());
        assert!(crypto::verify(&block.vk, &block.signing_payload(), &block.signature));

        let mut wrong_slot = block.clone();
        wrong_slot.slot = 8;
        assert!(!crypto::verify(&wrong_slot.vk, &wrong_slot.signing_payload(), &wrong_slot.signature));
    }
}
