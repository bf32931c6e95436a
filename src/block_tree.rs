//! Forking tree of candidate blocks, rooted at genesis.
//!
//! Nodes live in an arena indexed by block hash; parents and children are
//! stored as indices, never as references, so rollback-triggered
//! traversals cannot alias. The tree only grows: competing forks persist
//! as dead branches.
//!
//! Longest-chain tie-break: among leaves at maximal depth, the leaf whose
//! block was inserted earliest wins. Insertion order is the arena order,
//! so the rule is deterministic for a fixed message history.

use std::collections::HashMap;

use thiserror::Error;

use crate::types::{Block, GENESIS_HASH};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TreeError {
    #[error("parent hash not present in tree: {0}")]
    UnknownParent(String),
    #[error("block hash already present in tree: {0}")]
    DuplicateBlock(String),
}

#[derive(Debug)]
struct TreeNode {
    /// None only for the genesis root.
    block: Option<Block>,
    hash: String,
    parent: Option<usize>,
    children: Vec<usize>,
    depth: u64,
}

#[derive(Debug)]
pub struct BlockTree {
    nodes: Vec<TreeNode>,
    index: HashMap<String, usize>,
}

impl BlockTree {
    /// A tree holding only the genesis sentinel.
    pub fn new() -> Self {
        let root = TreeNode {
            block: None,
            hash: GENESIS_HASH.to_string(),
            parent: None,
            children: Vec::new(),
            depth: 0,
        };
        let mut index = HashMap::new();
        index.insert(GENESIS_HASH.to_string(), 0);
        Self { nodes: vec![root], index }
    }

    /// Attach a block under the node its `prev_hash` names, wherever that
    /// node sits in the tree. Appending to the longest leaf and growing a
    /// fork are the same operation here; the caller decides whether the
    /// longest chain moved by comparing `longest_leaf` before and after.
    pub fn insert(&mut self, block: Block) -> Result<(), TreeError> {
        if self.index.contains_key(&block.hash) {
            return Err(TreeError::DuplicateBlock(block.hash));
        }
        let parent_idx = *self
            .index
            .get(&block.prev_hash)
            .ok_or_else(|| TreeError::UnknownParent(block.prev_hash.clone()))?;

        let idx = self.nodes.len();
        let depth = self.nodes[parent_idx].depth + 1;
        let hash = block.hash.clone();
        self.nodes.push(TreeNode {
            block: Some(block),
            hash: hash.clone(),
            parent: Some(parent_idx),
            children: Vec::new(),
            depth,
        });
        self.nodes[parent_idx].children.push(idx);
        self.index.insert(hash, idx);
        Ok(())
    }

    /// Hash and depth of the longest-chain leaf. Earliest-inserted wins
    /// among equally deep leaves; the genesis root is the leaf of an empty
    /// tree.
    pub fn longest_leaf(&self) -> (&str, u64) {
        let mut best = 0usize;
        for (idx, node) in self.nodes.iter().enumerate() {
            if node.children.is_empty() && node.depth > self.nodes[best].depth {
                best = idx;
            }
        }
        (&self.nodes[best].hash, self.nodes[best].depth)
    }

    /// Ordered blocks from genesis (exclusive) down to `leaf_hash`
    /// (inclusive); the replay sequence for ledger reconciliation.
    pub fn chain_from_genesis(&self, leaf_hash: &str) -> Vec<&Block> {
        let mut chain = Vec::new();
        let Some(&start) = self.index.get(leaf_hash) else {
            return chain;
        };
        let mut cursor = Some(start);
        while let Some(idx) = cursor {
            if let Some(block) = &self.nodes[idx].block {
                chain.push(block);
            }
            cursor = self.nodes[idx].parent;
        }
        chain.reverse();
        chain
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.index.contains_key(hash)
    }

    /// Total nodes including the genesis root.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        // never empty: the genesis root is always present
        false
    }
}

impl Default for BlockTree {
    fn default() -> Self {
        Self::new()
    }
}
