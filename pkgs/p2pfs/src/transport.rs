//! Capabilities required from the transport substrate
//!
//! Discovery and transfer code never touch a swarm directly. They receive
//! the narrow capability they need (listing peers, opening streams, dialing)
//! through the traits below. [`crate::node::NodeHandle`] implements all of
//! them on top of libp2p; tests substitute in-memory versions.

use async_trait::async_trait;
use futures::{AsyncRead, AsyncWrite};
use libp2p::{Multiaddr, PeerId, StreamProtocol};
use std::hash::{Hash, Hasher};
use std::io;

use crate::error::TransferError;

/// Protocol for unsolicited file delivery (upload).
pub const PUSH_PROTOCOL: StreamProtocol = StreamProtocol::new("/p2p-file-sharing/1.0.0");

/// Protocol for requesting a file by name (download).
pub const FETCH_PROTOCOL: StreamProtocol = StreamProtocol::new("/p2p-file-sharing/fetch/1.0.0");

/// A peer identity together with the addresses it is known under
#[derive(Debug, Clone)]
pub struct PeerHandle {
    pub peer_id: PeerId,
    pub addresses: Vec<Multiaddr>,
}

impl PeerHandle {
    pub fn new(peer_id: PeerId, addresses: Vec<Multiaddr>) -> Self {
        Self { peer_id, addresses }
    }
}

impl From<PeerId> for PeerHandle {
    fn from(peer_id: PeerId) -> Self {
        Self::new(peer_id, Vec::new())
    }
}

impl PartialEq for PeerHandle {
    fn eq(&self, other: &Self) -> bool {
        self.peer_id == other.peer_id
    }
}

impl Eq for PeerHandle {}

impl Hash for PeerHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.peer_id.hash(state);
    }
}

/// Point-in-time view of the peers the substrate is connected to
pub trait PeerRegistry: Send + Sync + 'static {
    fn connected_peers(&self) -> Vec<PeerHandle>;
}

/// Opens outbound logical streams to a peer for a given protocol
#[async_trait]
pub trait StreamOpener: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn open_stream(&self, peer: PeerId, protocol: StreamProtocol)
        -> io::Result<Self::Stream>;
}

/// Best-effort connection requests
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    async fn connect(&self, peer: &PeerHandle) -> Result<(), TransferError>;
}
