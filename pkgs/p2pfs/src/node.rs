//! libp2p-backed transport substrate
//!
//! [`Node`] owns the swarm and runs it on its own task. Everything else talks
//! to it through a cloneable [`NodeHandle`], which implements the capability
//! traits from [`crate::transport`]:
//!
//! - **PeerRegistry**: peers with at least one live connection
//! - **StreamOpener**: raw per-protocol streams via `libp2p-stream`
//! - **Dialer**: connection requests serviced by the swarm task

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::channel::mpsc as event_mpsc;
use libp2p::{
    identity::Keypair,
    mdns, noise, ping,
    swarm::{behaviour::toggle::Toggle, dial_opts::DialOpts, NetworkBehaviour, SwarmEvent},
    tcp, yamux, Multiaddr, PeerId, StreamProtocol, Swarm,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::NodeConfig;
use crate::error::TransferError;
use crate::inbound::{self, InboundHandler, InboundKind};
use crate::transport::{
    Dialer, PeerHandle, PeerRegistry, StreamOpener, FETCH_PROTOCOL, PUSH_PROTOCOL,
};

/// Network behaviour combining local discovery, raw streams and liveness
#[derive(NetworkBehaviour)]
pub struct NodeBehaviour {
    mdns: Toggle<mdns::tokio::Behaviour>,
    stream: libp2p_stream::Behaviour,
    ping: ping::Behaviour,
}

/// Notifications from the swarm task
#[derive(Debug, Clone)]
pub enum NodeEvent {
    ListeningOn { address: Multiaddr },
    /// Announced by mDNS; not necessarily connected yet
    PeerFound(PeerHandle),
    Connected { peer_id: PeerId },
    Disconnected { peer_id: PeerId },
}

/// Peers with at least one established connection
#[derive(Debug, Default)]
pub struct ConnectedPeers {
    peers: RwLock<HashMap<PeerId, Vec<Multiaddr>>>,
}

impl ConnectedPeers {
    pub fn insert(&self, peer_id: PeerId, address: Multiaddr) {
        let mut peers = self.peers.write();
        let addresses = peers.entry(peer_id).or_default();
        if !addresses.contains(&address) {
            addresses.push(address);
        }
    }

    pub fn remove(&self, peer_id: &PeerId) {
        self.peers.write().remove(peer_id);
    }

    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.peers.read().contains_key(peer_id)
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }
}

impl PeerRegistry for ConnectedPeers {
    fn connected_peers(&self) -> Vec<PeerHandle> {
        self.peers
            .read()
            .iter()
            .map(|(peer_id, addresses)| PeerHandle::new(*peer_id, addresses.clone()))
            .collect()
    }
}

enum Command {
    Dial {
        peer: PeerHandle,
        reply: oneshot::Sender<std::result::Result<(), String>>,
    },
}

/// Cloneable access to a running [`Node`]
#[derive(Clone)]
pub struct NodeHandle {
    local_peer_id: PeerId,
    control: libp2p_stream::Control,
    peers: Arc<ConnectedPeers>,
    listen_addrs: Arc<RwLock<Vec<Multiaddr>>>,
    commands: mpsc::UnboundedSender<Command>,
    shutdown: CancellationToken,
}

impl NodeHandle {
    pub fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    /// This node's identity with the addresses it currently listens on
    pub fn local_peer(&self) -> PeerHandle {
        PeerHandle::new(self.local_peer_id, self.listen_addrs())
    }

    pub fn listen_addrs(&self) -> Vec<Multiaddr> {
        self.listen_addrs.read().clone()
    }

    pub fn registry(&self) -> Arc<ConnectedPeers> {
        Arc::clone(&self.peers)
    }

    /// Inbound streams for `protocol`. Each protocol can be accepted once.
    pub fn accept(&self, protocol: StreamProtocol) -> Result<libp2p_stream::IncomingStreams> {
        self.control
            .clone()
            .accept(protocol.clone())
            .map_err(|_| anyhow!("Protocol {} already has a handler", protocol))
    }

    /// Register `handler` for both the push and the fetch protocol.
    pub fn serve_inbound(&self, handler: Arc<InboundHandler>) -> Result<Vec<JoinHandle<()>>> {
        let pushes = self.accept(PUSH_PROTOCOL)?;
        let fetches = self.accept(FETCH_PROTOCOL)?;
        Ok(vec![
            inbound::serve(Arc::clone(&handler), InboundKind::Push, pushes),
            inbound::serve(handler, InboundKind::Fetch, fetches),
        ])
    }

    /// Stop the swarm task.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl StreamOpener for NodeHandle {
    type Stream = libp2p::Stream;

    async fn open_stream(&self, peer: PeerId, protocol: StreamProtocol) -> io::Result<Self::Stream> {
        let mut control = self.control.clone();
        control
            .open_stream(peer, protocol)
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
    }
}

#[async_trait]
impl Dialer for NodeHandle {
    async fn connect(&self, peer: &PeerHandle) -> std::result::Result<(), TransferError> {
        let failed = |reason: &str| TransferError::Dial {
            peer: peer.peer_id,
            reason: reason.to_string(),
        };
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Dial {
                peer: peer.clone(),
                reply,
            })
            .map_err(|_| failed("node is not running"))?;
        response
            .await
            .map_err(|_| failed("node is not running"))?
            .map_err(|reason| failed(&reason))
    }
}

/// Owner of the swarm
pub struct Node {
    swarm: Swarm<NodeBehaviour>,
    commands: mpsc::UnboundedReceiver<Command>,
    event_sender: event_mpsc::UnboundedSender<NodeEvent>,
    peers: Arc<ConnectedPeers>,
    listen_addrs: Arc<RwLock<Vec<Multiaddr>>>,
    shutdown: CancellationToken,
}

impl Node {
    /// Build the swarm and start listening. Call [`Node::spawn`] to run it.
    #[instrument(skip(keypair))]
    pub fn new(
        keypair: Keypair,
        config: &NodeConfig,
    ) -> Result<(Self, NodeHandle, event_mpsc::UnboundedReceiver<NodeEvent>)> {
        let local_peer_id = keypair.public().to_peer_id();
        let listen_addr = config.listen_multiaddr()?;

        let mdns = if config.enable_mdns {
            Some(mdns::tokio::Behaviour::new(
                mdns::Config::default(),
                local_peer_id,
            )?)
        } else {
            None
        };
        let stream = libp2p_stream::Behaviour::new();
        let control = stream.new_control();

        let behaviour = NodeBehaviour {
            mdns: Toggle::from(mdns),
            stream,
            ping: ping::Behaviour::new(ping::Config::new()),
        };

        let idle_timeout = config.idle_connection_timeout();
        let mut swarm = libp2p::SwarmBuilder::with_existing_identity(keypair)
            .with_tokio()
            .with_tcp(
                tcp::Config::default(),
                noise::Config::new,
                yamux::Config::default,
            )?
            .with_behaviour(|_| behaviour)?
            .with_swarm_config(|c| c.with_idle_connection_timeout(idle_timeout))
            .build();

        swarm.listen_on(listen_addr)?;
        info!(peer_id = %local_peer_id, "Host created");

        let (command_sender, commands) = mpsc::unbounded_channel();
        let (event_sender, event_receiver) = event_mpsc::unbounded();
        let peers = Arc::new(ConnectedPeers::default());
        let listen_addrs = Arc::new(RwLock::new(Vec::new()));
        let shutdown = CancellationToken::new();

        let handle = NodeHandle {
            local_peer_id,
            control,
            peers: Arc::clone(&peers),
            listen_addrs: Arc::clone(&listen_addrs),
            commands: command_sender,
            shutdown: shutdown.clone(),
        };

        let node = Self {
            swarm,
            commands,
            event_sender,
            peers,
            listen_addrs,
            shutdown,
        };

        Ok((node, handle, event_receiver))
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Drive the swarm until the handle requests shutdown.
    pub async fn run(mut self) {
        use futures::StreamExt;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = self.swarm.select_next_some() => self.handle_swarm_event(event),
                Some(command) = self.commands.recv() => self.handle_command(command),
            }
        }
        info!("Node stopped");
    }

    fn send_event(&self, event: NodeEvent) {
        // Nobody listening is fine.
        let _ = self.event_sender.unbounded_send(event);
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Dial { peer, reply } => {
                let result = if self.peers.contains(&peer.peer_id) {
                    Ok(())
                } else {
                    let opts = DialOpts::peer_id(peer.peer_id)
                        .addresses(peer.addresses.clone())
                        .build();
                    self.swarm.dial(opts).map_err(|e| e.to_string())
                };
                match &result {
                    Ok(()) => debug!(peer = %peer.peer_id, "Dialing peer"),
                    Err(e) => warn!(peer = %peer.peer_id, error = %e, "Failed to dial peer"),
                }
                let _ = reply.send(result);
            }
        }
    }

    fn handle_swarm_event(&mut self, event: SwarmEvent<NodeBehaviourEvent>) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                info!("Listening on {}/p2p/{}", address, self.swarm.local_peer_id());
                self.listen_addrs.write().push(address.clone());
                self.send_event(NodeEvent::ListeningOn { address });
            }
            SwarmEvent::ConnectionEstablished {
                peer_id, endpoint, ..
            } => {
                info!(peer = %peer_id, "Connected to peer");
                self.peers
                    .insert(peer_id, endpoint.get_remote_address().clone());
                self.send_event(NodeEvent::Connected { peer_id });
            }
            SwarmEvent::ConnectionClosed {
                peer_id,
                num_established,
                cause,
                ..
            } => {
                if num_established == 0 {
                    info!(peer = %peer_id, ?cause, "Disconnected from peer");
                    self.peers.remove(&peer_id);
                    self.send_event(NodeEvent::Disconnected { peer_id });
                }
            }
            SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                warn!(peer = ?peer_id, error = %error, "Outgoing connection failed");
            }
            SwarmEvent::Behaviour(NodeBehaviourEvent::Mdns(event)) => self.handle_mdns_event(event),
            SwarmEvent::Behaviour(NodeBehaviourEvent::Ping(ping::Event { peer, result, .. })) => {
                match result {
                    Ok(rtt) => debug!(peer = %peer, ?rtt, "Ping"),
                    Err(e) => debug!(peer = %peer, error = %e, "Ping failed"),
                }
            }
            _ => {}
        }
    }

    fn handle_mdns_event(&mut self, event: mdns::Event) {
        match event {
            mdns::Event::Discovered(list) => {
                let local_peer_id = *self.swarm.local_peer_id();
                let mut found: HashMap<PeerId, Vec<Multiaddr>> = HashMap::new();
                for (peer_id, addr) in list {
                    if peer_id != local_peer_id {
                        found.entry(peer_id).or_default().push(addr);
                    }
                }
                for (peer_id, addresses) in found {
                    info!(peer = %peer_id, "mDNS discovered peer");
                    self.send_event(NodeEvent::PeerFound(PeerHandle::new(peer_id, addresses)));
                }
            }
            mdns::Event::Expired(list) => {
                for (peer_id, _) in list {
                    debug!(peer = %peer_id, "mDNS record expired");
                }
            }
        }
    }
}
