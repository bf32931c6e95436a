//! Aurum: a permissionless proof-of-stake blockchain over a TCP gossip
//! overlay.
//!
//! Peers join through any known node, flood transactions and blocks to
//! the whole network, and run a per-slot stake-weighted lottery. Winning
//! blocks grow a forking block tree; every node follows the longest
//! chain and reconciles its ledger by full replay whenever the longest
//! chain moves.

pub mod block_tree;
pub mod consensus;
pub mod crypto;
pub mod genesis;
pub mod ledger;
pub mod net;
pub mod node;
pub mod store;
pub mod types;

pub use block_tree::{BlockTree, TreeError};
pub use consensus::{BlockOutcome, ConsensusEngine, EngineError, EngineState};
pub use crypto::{CryptoError, Keypair};
pub use genesis::GenesisConfig;
pub use ledger::Ledger;
pub use net::{Message, NetConfig, NetEvent, Overlay};
pub use node::{Node, NodeConfig, NodeHandle};
pub use store::TxStore;
pub use types::{Block, GenesisBlock, SignedTransaction};
