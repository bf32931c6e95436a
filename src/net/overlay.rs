//! Peer overlay: connection bootstrap, presence flooding, gossip relay.
//!
//! One reader task and one writer task per connection; the writer is fed
//! by an unbounded channel so gossip never blocks on a slow peer's
//! socket. A failed write (or read) removes only that connection from
//! the active set. Decoded application payloads are handed to the node
//! through the [`NetEvent`] channel; presence announcements and the
//! flood-before-verify relay of blocks are handled here.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::codec::{self, CodecError, Message};
use super::{NetConfig, NetEvent};
use crate::store::TxStore;

#[derive(Error, Debug)]
pub enum NetError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// How `start` ended up in the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// No reachable bootstrap peer: this node founds a new network and is
    /// eligible to publish the genesis block.
    Founding,
    /// Connected into an existing network.
    Joined,
}

type PeerMap = Arc<Mutex<HashMap<u64, mpsc::UnboundedSender<Message>>>>;

pub struct Overlay {
    config: NetConfig,
    store: Arc<TxStore>,
    event_tx: mpsc::Sender<NetEvent>,
    /// Writer handles of all active connections.
    peers: PeerMap,
    /// URIs of every peer known to be present, in announcement order.
    peer_uris: Mutex<Vec<String>>,
    next_peer_id: AtomicU64,
    local_uri: Mutex<String>,
    shutdown: watch::Receiver<bool>,
}

impl Overlay {
    /// Create the overlay. Returns the event stream for the node and the
    /// shutdown handle; flipping the handle to `true` stops every task.
    pub fn new(
        config: NetConfig,
        store: Arc<TxStore>,
    ) -> (Arc<Self>, mpsc::Receiver<NetEvent>, watch::Sender<bool>) {
        let (event_tx, event_rx) = mpsc::channel(1024);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let overlay = Arc::new(Self {
            config,
            store,
            event_tx,
            peers: Arc::new(Mutex::new(HashMap::new())),
            peer_uris: Mutex::new(Vec::new()),
            next_peer_id: AtomicU64::new(0),
            local_uri: Mutex::new(String::new()),
            shutdown: shutdown_rx,
        });
        (overlay, event_rx, shutdown_tx)
    }

    /// Bind the listener, join the network through the configured
    /// bootstrap address (or found a new one), announce presence, and
    /// start the accept loop.
    pub async fn start(self: &Arc<Self>) -> Result<JoinOutcome, NetError> {
        let listener =
            TcpListener::bind(("0.0.0.0", self.config.listen_port)).await?;
        let port = listener.local_addr()?.port();
        let uri = format!("{}:{}", self.config.advertise_ip, port);
        info!(%uri, "taking connections");
        *self.local_uri.lock().unwrap() = uri.clone();

        let outcome = match &self.config.bootstrap {
            Some(addr) => self.join(addr.clone()).await?,
            None => JoinOutcome::Founding,
        };
        if outcome == JoinOutcome::Founding {
            info!("no bootstrap peer, founding a new network");
        }

        // make self visible: append to the list and flood the announcement
        self.add_peer_uri(&uri);
        self.gossip(&Message::Presence(uri));

        let overlay = Arc::clone(self);
        tokio::spawn(async move { overlay.accept_loop(listener).await });
        Ok(outcome)
    }

    /// Dial the bootstrap peer. Its first frame must be the peer list;
    /// afterwards up to `fanout` of the most recently announced peers are
    /// dialed as well, biasing connectivity toward recent joiners.
    async fn join(self: &Arc<Self>, addr: String) -> Result<JoinOutcome, NetError> {
        let stream = match TcpStream::connect(&addr).await {
            Ok(stream) => stream,
            Err(e) => {
                debug!(%addr, error = %e, "bootstrap dial failed");
                return Ok(JoinOutcome::Founding);
            }
        };
        let peer_addr = stream.peer_addr()?;
        let (mut read_half, write_half) = stream.into_split();
        let id = self.register_writer(write_half, peer_addr);

        let uris = match codec::read_message(&mut read_half).await? {
            Message::PeerList(uris) => uris,
            other => {
                self.peers.lock().unwrap().remove(&id);
                return Err(NetError::Protocol(format!(
                    "expected peer list from bootstrap, got {other:?}"
                )));
            }
        };
        info!(peers = uris.len(), %addr, "joined network");
        *self.peer_uris.lock().unwrap() = uris.clone();
        self.spawn_reader(read_half, id, peer_addr);
        let _ = self.event_tx.send(NetEvent::PeerConnected(peer_addr)).await;

        self.connect_recent(&uris, &addr).await;
        Ok(JoinOutcome::Joined)
    }

    /// Dial up to `fanout` entries from the tail of the received peer
    /// list, newest first, skipping the bootstrap address and self.
    async fn connect_recent(self: &Arc<Self>, uris: &[String], exclude: &str) {
        let own = self.local_uri();
        let targets: Vec<&String> = uris
            .iter()
            .rev()
            .filter(|uri| uri.as_str() != exclude && **uri != own)
            .take(self.config.fanout)
            .collect();
        for uri in targets {
            if let Err(e) = self.connect_peer(uri).await {
                debug!(%uri, error = %e, "secondary dial failed");
            }
        }
    }

    /// Dial one peer and wire it into the active set.
    pub async fn connect_peer(self: &Arc<Self>, uri: &str) -> Result<(), NetError> {
        let stream = TcpStream::connect(uri).await?;
        let peer_addr = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();
        let id = self.register_writer(write_half, peer_addr);
        self.spawn_reader(read_half, id, peer_addr);
        let _ = self.event_tx.send(NetEvent::PeerConnected(peer_addr)).await;
        Ok(())
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        let mut shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!(%addr, "connection accepted");
                        let (read_half, write_half) = stream.into_split();
                        let id = self.register_writer(write_half, addr);
                        // the newcomer may be brand new: hand it the list
                        self.send_to(id, Message::PeerList(self.peer_uris()));
                        self.spawn_reader(read_half, id, addr);
                        let _ = self.event_tx.send(NetEvent::PeerConnected(addr)).await;
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                    }
                },
            }
        }
        info!("accept loop stopped");
    }

    /// Install a writer task for the connection and return its peer id.
    fn register_writer(&self, mut write_half: OwnedWriteHalf, addr: SocketAddr) -> u64 {
        let id = self.next_peer_id.fetch_add(1, Ordering::Relaxed);
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        self.peers.lock().unwrap().insert(id, tx);

        let peers = Arc::clone(&self.peers);
        let mut shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    msg = rx.recv() => match msg {
                        Some(msg) => {
                            if let Err(e) = codec::write_message(&mut write_half, &msg).await {
                                warn!(%addr, error = %e, "write to lost connection, dropping");
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
            peers.lock().unwrap().remove(&id);
        });
        id
    }

    fn spawn_reader(self: &Arc<Self>, read_half: OwnedReadHalf, id: u64, addr: SocketAddr) {
        let overlay = Arc::clone(self);
        tokio::spawn(async move { overlay.reader_loop(read_half, id, addr).await });
    }

    async fn reader_loop(self: Arc<Self>, mut read_half: OwnedReadHalf, id: u64, addr: SocketAddr) {
        let mut shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                frame = codec::read_message(&mut read_half) => match frame {
                    Ok(msg) => self.handle_message(msg, addr).await,
                    Err(e) => {
                        debug!(%addr, error = %e, "lost connection to peer");
                        break;
                    }
                },
            }
        }
        self.peers.lock().unwrap().remove(&id);
        let _ = self.event_tx.send(NetEvent::PeerDisconnected(addr)).await;
    }

    async fn handle_message(&self, msg: Message, addr: SocketAddr) {
        match msg {
            Message::PeerList(uris) => {
                // only expected as the first frame of a bootstrap dial,
                // where it is consumed before this loop starts
                debug!(%addr, count = uris.len(), "ignoring unsolicited peer list");
            }
            Message::Presence(uri) => {
                if self.add_peer_uri(&uri) {
                    debug!(%uri, total = self.peer_uris.lock().unwrap().len(), "peer announced");
                    self.gossip(&Message::Presence(uri));
                }
            }
            Message::Tx(tx) => {
                // dedup and validation happen in the node; forward as-is
                let _ = self.event_tx.send(NetEvent::Tx(tx)).await;
            }
            Message::Genesis(genesis) => {
                if self.store.record_block(&genesis.gossip_hash()) {
                    self.gossip(&Message::Genesis(genesis.clone()));
                    let _ = self.event_tx.send(NetEvent::Genesis(genesis)).await;
                }
            }
            Message::Block(block) => {
                // re-flood exactly once, before verification; the engine
                // decides whether the block is a verified winner
                if self.store.record_block(&block.hash) {
                    self.gossip(&Message::Block(block.clone()));
                    let _ = self.event_tx.send(NetEvent::Block(block)).await;
                }
            }
        }
    }

    /// Queue a message on every active connection. Dead connections are
    /// reaped by their writer tasks.
    pub fn gossip(&self, msg: &Message) {
        let peers = self.peers.lock().unwrap();
        for sender in peers.values() {
            let _ = sender.send(msg.clone());
        }
    }

    fn send_to(&self, id: u64, msg: Message) {
        if let Some(sender) = self.peers.lock().unwrap().get(&id) {
            let _ = sender.send(msg);
        }
    }

    /// Append a URI if unseen. Returns true when it was new, which is the
    /// signal to keep flooding.
    fn add_peer_uri(&self, uri: &str) -> bool {
        let mut uris = self.peer_uris.lock().unwrap();
        if uris.iter().any(|u| u == uri) {
            return false;
        }
        uris.push(uri.to_string());
        true
    }

    pub fn peer_uris(&self) -> Vec<String> {
        self.peer_uris.lock().unwrap().clone()
    }

    pub fn connection_count(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    pub fn local_uri(&self) -> String {
        self.local_uri.lock().unwrap().clone()
    }
}
