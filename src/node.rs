//! The node: wires the consensus engine to the gossip overlay and drives
//! both from a single event loop.
//!
//! The engine is single-threaded and owned by the loop; everything else
//! talks to it through channels. A [`NodeHandle`] submits transactions,
//! answers queries, and triggers shutdown.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::consensus::{ConsensusEngine, EngineError};
use crate::crypto::Keypair;
use crate::genesis::GenesisConfig;
use crate::net::{JoinOutcome, Message, NetConfig, NetError, NetEvent, Overlay};
use crate::store::TxStore;
use crate::types::{AccountId, SignedTransaction};

#[derive(Error, Debug)]
pub enum NodeError {
    #[error(transparent)]
    Net(#[from] NetError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub net: NetConfig,
    /// Wall-clock length of one lottery slot.
    pub slot_interval: Duration,
    /// Connections a founding node waits for before publishing genesis.
    pub connection_threshold: usize,
    pub genesis: GenesisConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            net: NetConfig::default(),
            slot_interval: Duration::from_secs(1),
            connection_threshold: 0,
            genesis: GenesisConfig::default(),
        }
    }
}

/// Point-in-time view of the node, served over the query channel.
#[derive(Debug, Clone)]
pub struct NodeStatus {
    /// Dialable address of this node; empty until the listener is bound.
    pub uri: String,
    pub active: bool,
    pub slot: u64,
    pub chain_depth: u64,
    pub connections: usize,
    pub pending: usize,
    pub own_balance: i64,
}

enum Query {
    Balance(AccountId, oneshot::Sender<i64>),
    Status(oneshot::Sender<NodeStatus>),
}

/// Cloneable handle into a running node.
#[derive(Clone)]
pub struct NodeHandle {
    submit_tx: mpsc::Sender<SignedTransaction>,
    query_tx: mpsc::Sender<Query>,
    shutdown_tx: watch::Sender<bool>,
}

impl NodeHandle {
    /// Hand a locally created transaction to the node for validation and
    /// gossip. Returns false once the node has shut down.
    pub async fn submit(&self, tx: SignedTransaction) -> bool {
        self.submit_tx.send(tx).await.is_ok()
    }

    /// Live-ledger balance of an account; None once the node is gone.
    pub async fn balance(&self, account: &str) -> Option<i64> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.query_tx
            .send(Query::Balance(account.to_string(), reply_tx))
            .await
            .ok()?;
        reply_rx.await.ok()
    }

    pub async fn status(&self) -> Option<NodeStatus> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.query_tx.send(Query::Status(reply_tx)).await.ok()?;
        reply_rx.await.ok()
    }

    /// Stop the node and every overlay task.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

pub struct Node {
    config: NodeConfig,
    engine: ConsensusEngine,
    store: Arc<TxStore>,
    overlay: Arc<Overlay>,
    events: mpsc::Receiver<NetEvent>,
    submit_rx: mpsc::Receiver<SignedTransaction>,
    query_rx: mpsc::Receiver<Query>,
    shutdown_tx: watch::Sender<bool>,
    /// True while this node founded the network and has not yet published
    /// the genesis block.
    founding: bool,
}

impl Node {
    pub fn new(keypair: Keypair, config: NodeConfig) -> (Self, NodeHandle) {
        let store = Arc::new(TxStore::new());
        let (overlay, events, shutdown_tx) =
            Overlay::new(config.net.clone(), Arc::clone(&store));
        let engine = ConsensusEngine::new(keypair, Arc::clone(&store));
        let (submit_tx, submit_rx) = mpsc::channel(256);
        let (query_tx, query_rx) = mpsc::channel(64);
        let handle = NodeHandle {
            submit_tx,
            query_tx,
            shutdown_tx: shutdown_tx.clone(),
        };
        let node = Self {
            config,
            engine,
            store,
            overlay,
            events,
            submit_rx,
            query_rx,
            shutdown_tx,
            founding: false,
        };
        (node, handle)
    }

    pub fn local_uri(&self) -> String {
        self.overlay.local_uri()
    }

    /// Join (or found) the network, then run the event loop until
    /// shutdown. Consumes the node; observe it through the handle.
    pub async fn run(mut self) -> Result<(), NodeError> {
        let outcome = self.overlay.start().await?;
        self.founding = outcome == JoinOutcome::Founding;
        info!(uri = %self.overlay.local_uri(), ?outcome, "node started");
        self.maybe_publish_genesis()?;

        let mut slot_timer = tokio::time::interval(self.config.slot_interval);
        slot_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = slot_timer.tick() => self.on_slot_tick(),
                event = self.events.recv() => match event {
                    Some(event) => self.on_net_event(event)?,
                    None => break,
                },
                submitted = self.submit_rx.recv() => {
                    if let Some(tx) = submitted {
                        self.on_transaction(tx);
                    }
                }
                query = self.query_rx.recv() => {
                    if let Some(query) = query {
                        self.on_query(query);
                    }
                }
            }
        }
        info!("node stopped");
        Ok(())
    }

    /// A founding node publishes genesis once enough peers connected.
    fn maybe_publish_genesis(&mut self) -> Result<(), NodeError> {
        if !self.founding
            || self.engine.is_active()
            || self.overlay.connection_count() < self.config.connection_threshold
        {
            return Ok(());
        }
        let genesis = self.config.genesis.build().map_err(EngineError::from)?;
        self.engine.on_genesis(&genesis)?;
        self.store.record_block(&genesis.gossip_hash());
        self.overlay.gossip(&Message::Genesis(genesis));
        self.founding = false;
        info!("genesis block published");
        Ok(())
    }

    /// One slot: draw the lottery and, on a win, apply the block locally
    /// and flood it.
    fn on_slot_tick(&mut self) {
        if !self.engine.is_active() {
            return;
        }
        match self.engine.on_slot() {
            Ok(Some(block)) => {
                self.store.record_block(&block.hash);
                self.overlay.gossip(&Message::Block(block.clone()));
                match self.engine.on_block(block) {
                    Ok(outcome) => debug!(?outcome, "own block applied"),
                    Err(e) => warn!(error = %e, "own block rejected"),
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "slot processing failed"),
        }
    }

    fn on_net_event(&mut self, event: NetEvent) -> Result<(), NodeError> {
        match event {
            NetEvent::PeerConnected(addr) => {
                debug!(%addr, connections = self.overlay.connection_count(), "peer connected");
                self.maybe_publish_genesis()?;
            }
            NetEvent::PeerDisconnected(addr) => {
                debug!(%addr, "peer disconnected");
            }
            NetEvent::Tx(tx) => self.on_transaction(tx),
            NetEvent::Genesis(genesis) => match self.engine.on_genesis(&genesis) {
                Ok(()) => info!("genesis block received, consensus active"),
                Err(e) => warn!(error = %e, "genesis block dropped"),
            },
            NetEvent::Block(block) => {
                if !self.engine.is_active() {
                    warn!(hash = %block.hash, "block received before genesis, dropped");
                    return Ok(());
                }
                match self.engine.on_block(block) {
                    Ok(outcome) => debug!(?outcome, "block accepted"),
                    Err(e) => warn!(error = %e, "block rejected"),
                }
            }
        }
        Ok(())
    }

    /// Shared path for gossiped and locally submitted transactions: store
    /// once, validate, buffer for the next candidate block, re-flood.
    fn on_transaction(&mut self, tx: SignedTransaction) {
        if !self.store.record_tx(&tx) {
            return;
        }
        if self.engine.buffer_transaction(&tx) {
            self.overlay.gossip(&Message::Tx(tx));
        }
    }

    fn on_query(&self, query: Query) {
        match query {
            Query::Balance(account, reply) => {
                let _ = reply.send(self.engine.ledger().balance(&account));
            }
            Query::Status(reply) => {
                let own = self.engine.public_key();
                let _ = reply.send(NodeStatus {
                    uri: self.overlay.local_uri(),
                    active: self.engine.is_active(),
                    slot: self.engine.slot(),
                    chain_depth: self.engine.tree().longest_leaf().1,
                    connections: self.overlay.connection_count(),
                    pending: self.engine.pending_len(),
                    own_balance: self.engine.ledger().balance(&own),
                });
            }
        }
    }
}
