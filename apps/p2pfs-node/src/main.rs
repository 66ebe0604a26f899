mod commands;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use commands::{Command, Shell};
use futures::StreamExt;
use libp2p::multiaddr::Protocol;
use p2pfs::{
    Config, Discovery, InboundHandler, Keypair, LocalFiles, Multiaddr, Node, NodeEvent,
    PeerHandle, TransferExecutor,
};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Serverless file sharing between peers on the local network
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port for listening (0 for random available port)
    #[arg(short, long)]
    port: Option<u16>,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory whose files are offered to other peers
    #[arg(short, long)]
    shared: Option<PathBuf>,

    /// Directory for downloaded and received files
    #[arg(short, long)]
    downloads: Option<PathBuf>,

    /// How long a download or upload keeps looking for peers (e.g. "30s")
    #[arg(short, long, value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// How often the connected-peer set is resampled (e.g. "5s")
    #[arg(long, value_parser = humantime::parse_duration)]
    poll_interval: Option<Duration>,

    /// Disable mDNS discovery
    #[arg(long)]
    no_mdns: bool,

    /// Peer to connect to at startup, as a multiaddr ending in /p2p/<peer id>
    #[arg(long)]
    dial: Vec<Multiaddr>,
}

impl Args {
    fn into_config(self) -> Result<(Config, Vec<Multiaddr>)> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => Config::default(),
        };

        if let Some(port) = self.port {
            config.node.listen_addr = format!("/ip4/0.0.0.0/tcp/{}", port);
        }
        if let Some(shared) = self.shared {
            config.shared_dir = shared;
        }
        if let Some(downloads) = self.downloads {
            config.download_dir = downloads;
        }
        if let Some(timeout) = self.timeout {
            config.transfer.operation_timeout_ms = timeout.as_millis() as u64;
        }
        if let Some(interval) = self.poll_interval {
            config.transfer.poll_interval_ms = interval.as_millis() as u64;
        }
        if self.no_mdns {
            config.node.enable_mdns = false;
        }
        config.validate()?;
        Ok((config, self.dial))
    }
}

fn peer_from_multiaddr(addr: &Multiaddr) -> Result<PeerHandle> {
    match addr.iter().last() {
        Some(Protocol::P2p(peer_id)) => Ok(PeerHandle::new(peer_id, vec![addr.clone()])),
        _ => Err(anyhow!("{} does not end in /p2p/<peer id>", addr)),
    }
}

fn print_event(event: &NodeEvent) {
    match event {
        NodeEvent::ListeningOn { address } => println!("📡 Listening on {}", address),
        NodeEvent::PeerFound(peer) => println!("🔍 Discovered peer {}", peer.peer_id),
        NodeEvent::Connected { peer_id } => println!("🤝 Connected to {}", peer_id),
        NodeEvent::Disconnected { peer_id } => println!("👋 Disconnected from {}", peer_id),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let (config, dial) = Args::parse().into_config()?;

    let files = LocalFiles::new(config.shared_dir.clone(), config.download_dir.clone());
    files.ensure_dirs().await?;

    let (node, handle, mut events) = Node::new(Keypair::generate_ed25519(), &config.node)?;
    node.spawn();
    println!("🌐 Local Peer ID: {}", handle.local_peer_id());

    let handler = Arc::new(InboundHandler::new(files.clone(), &config.transfer));
    handle.serve_inbound(handler)?;

    let discovery = Discovery::new(
        handle.registry(),
        Arc::new(handle.clone()),
        config.transfer.poll_interval(),
    );

    // mDNS announcements are turned into connection requests
    let (found_sender, found_receiver) = futures::channel::mpsc::unbounded();
    discovery.watch(found_receiver);
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            print_event(&event);
            if let NodeEvent::PeerFound(peer) = event {
                if found_sender.unbounded_send(peer).is_err() {
                    break;
                }
            }
        }
        debug!("Node event stream ended");
    });

    for addr in &dial {
        match peer_from_multiaddr(addr) {
            Ok(peer) => discovery.handle_peer_found(peer).await,
            Err(e) => warn!(error = %e, "Skipping dial address"),
        }
    }

    let cancel = CancellationToken::new();
    let shell = Shell::new(
        files.clone(),
        handle.clone(),
        discovery,
        TransferExecutor::new(handle.clone(), &config.transfer),
        config.transfer.operation_timeout(),
        cancel.clone(),
    );

    println!(
        "📁 Sharing {} | saving to {}",
        files.shared_dir().display(),
        files.download_dir().display()
    );
    commands::show_help();

    let (stdin_sender, mut stdin_receiver) = tokio::sync::mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        use tokio::io::{AsyncBufReadExt, BufReader};
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if stdin_sender.send(line).is_err() {
                break;
            }
        }
    });

    info!(version = p2pfs::VERSION, "Starting main loop");
    loop {
        print!("> ");
        let _ = io::stdout().flush();

        tokio::select! {
            input = stdin_receiver.recv() => {
                let Some(input) = input else {
                    info!("Input closed");
                    break;
                };
                match Command::parse(&input) {
                    Ok(Some(command)) => {
                        if !shell.execute(command).await {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(message) => println!("❌ {}", message),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, initiating shutdown");
                break;
            }
        }
    }

    println!("\n👋 Goodbye!");
    cancel.cancel();
    handle.shutdown();
    Ok(())
}
