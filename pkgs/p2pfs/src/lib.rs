//! p2pfs - serverless file sharing between peers on a local network
//!
//! This library provides:
//! - Peer discovery by polling the connected-peer set, with mDNS-driven dialing
//! - A newline-delimited frame codec for one file per stream
//! - Fetch/push executors that try candidate peers until one succeeds
//! - Inbound handlers that store pushed files and answer fetch requests
//! - A libp2p node implementing the transport capabilities

pub mod codec;
pub mod config;
pub mod discovery;
pub mod error;
pub mod executor;
pub mod files;
pub mod inbound;
pub mod node;
pub mod transport;

pub use codec::{FrameReader, TransferFrame, CHUNK_SIZE, MAX_HEADER_LEN};
pub use config::{Config, ConfigError, NodeConfig, TransferConfig};
pub use discovery::{Discovery, DiscoverySession, DEFAULT_POLL_INTERVAL, MIN_POLL_INTERVAL};
pub use error::TransferError;
pub use executor::{TransferExecutor, TransferOutcome};
pub use files::LocalFiles;
pub use inbound::{InboundHandler, InboundKind};
pub use node::{ConnectedPeers, Node, NodeEvent, NodeHandle};
pub use transport::{
    Dialer, PeerHandle, PeerRegistry, StreamOpener, FETCH_PROTOCOL, PUSH_PROTOCOL,
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Re-export commonly used libp2p types
pub use libp2p::{identity::Keypair, Multiaddr, PeerId};
