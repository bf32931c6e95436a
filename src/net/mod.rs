//! Networking: framed wire codec and the gossip overlay.

pub mod codec;
pub mod overlay;

use std::net::SocketAddr;

pub use codec::{CodecError, Message, MAX_FRAME_SIZE, PROTOCOL_MAGIC};
pub use overlay::{JoinOutcome, NetError, Overlay};

use crate::types::{Block, GenesisBlock, SignedTransaction};

/// Default number of peers dialed from the received peer list.
pub const DEFAULT_FANOUT: usize = 10;

#[derive(Debug, Clone)]
pub struct NetConfig {
    /// Port to listen on; 0 picks an ephemeral port.
    pub listen_port: u16,
    /// Address other peers should dial, without the port.
    pub advertise_ip: String,
    /// Peer to join through. None founds a new network outright.
    pub bootstrap: Option<String>,
    /// Upper bound on secondary dials after joining.
    pub fanout: usize,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            listen_port: 0,
            advertise_ip: "127.0.0.1".to_string(),
            bootstrap: None,
            fanout: DEFAULT_FANOUT,
        }
    }
}

/// Decoded network input, delivered to the node's event loop.
#[derive(Debug)]
pub enum NetEvent {
    PeerConnected(SocketAddr),
    PeerDisconnected(SocketAddr),
    Tx(SignedTransaction),
    Genesis(GenesisBlock),
    Block(Block),
}
