use anyhow::Result;
use p2pfs::{
    ConnectedPeers, Discovery, LocalFiles, NodeHandle, PeerRegistry, TransferExecutor,
    TransferOutcome,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

/// A parsed line of user input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List,
    Peers,
    Download(String),
    Upload(String),
    Help,
    Exit,
}

impl Command {
    /// Parse one input line. Blank lines parse to `None`.
    pub fn parse(input: &str) -> std::result::Result<Option<Command>, String> {
        let input = input.trim();
        let (verb, rest) = match input.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (input, ""),
        };

        let command = match verb {
            "" => return Ok(None),
            "list" | "ls" => Command::List,
            "peers" | "p" => Command::Peers,
            "download" | "get" => Command::Download(required(rest, "download <filename>")?),
            "upload" | "put" => Command::Upload(required(rest, "upload <filename>")?),
            "help" | "?" | "h" => Command::Help,
            "exit" | "quit" | "q" => Command::Exit,
            other => return Err(format!("Unknown command: {}", other)),
        };
        Ok(Some(command))
    }
}

fn required(arg: &str, usage: &str) -> std::result::Result<String, String> {
    if arg.is_empty() {
        Err(format!("Usage: {}", usage))
    } else {
        Ok(arg.to_string())
    }
}

pub fn show_help() {
    println!("\n📖 Available Commands:");
    println!("  list, ls                 List files in the shared directory");
    println!("  peers, p                 List connected peers");
    println!("  download <filename>      Fetch a file from the first peer that has it");
    println!("  upload <filename>        Push a shared file to the first reachable peer");
    println!("  help, ?, h               Show this help");
    println!("  exit, quit, q            Exit");
}

/// Everything a command needs, cheap to clone into a task
#[derive(Clone)]
pub struct Shell {
    files: LocalFiles,
    handle: NodeHandle,
    discovery: Discovery<ConnectedPeers, NodeHandle>,
    executor: Arc<TransferExecutor<NodeHandle>>,
    timeout: Duration,
    cancel: CancellationToken,
}

impl Shell {
    pub fn new(
        files: LocalFiles,
        handle: NodeHandle,
        discovery: Discovery<ConnectedPeers, NodeHandle>,
        executor: TransferExecutor<NodeHandle>,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            files,
            handle,
            discovery,
            executor: Arc::new(executor),
            timeout,
            cancel,
        }
    }

    /// Run `command`. Returns `false` when the shell should exit.
    pub async fn execute(&self, command: Command) -> bool {
        match command {
            Command::List => self.list().await,
            Command::Peers => self.peers(),
            Command::Download(name) => {
                let shell = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = shell.download(&name).await {
                        error!(name = %name, error = %e, "Download failed");
                        println!("❌ Download of {} failed: {}", name, e);
                    }
                });
            }
            Command::Upload(name) => {
                let shell = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = shell.upload(&name).await {
                        error!(name = %name, error = %e, "Upload failed");
                        println!("❌ Upload of {} failed: {}", name, e);
                    }
                });
            }
            Command::Help => show_help(),
            Command::Exit => return false,
        }
        true
    }

    async fn list(&self) {
        match self.files.list_files().await {
            Ok(files) if files.is_empty() => {
                println!("📂 No files in {}", self.files.shared_dir().display())
            }
            Ok(files) => {
                println!("\n📂 Shared files:");
                for (i, name) in files.iter().enumerate() {
                    println!("  {}. {}", i + 1, name);
                }
            }
            Err(e) => println!("❌ Failed to list files: {}", e),
        }
    }

    fn peers(&self) {
        let peers = self.handle.registry().connected_peers();
        if peers.is_empty() {
            println!("👥 No connected peers. Make sure others are on the same network.");
            return;
        }
        println!("\n👥 Connected Peers:");
        for (i, peer) in peers.iter().enumerate() {
            println!("  {}. {}", i + 1, peer.peer_id);
        }
    }

    #[instrument(skip(self))]
    async fn download(&self, name: &str) -> Result<()> {
        let deadline = Instant::now() + self.timeout;
        let session = self.discovery.discover(deadline, self.cancel.clone());
        println!("🔍 Looking for {} ...", name);

        if let TransferOutcome::Delivered { peer, frame } =
            self.executor.fetch(session, name, deadline).await?
        {
            let path = self.files.write_file(&frame.name, frame.body.clone()).await?;
            info!(peer = %peer, path = %path.display(), "Download complete");
            println!(
                "✅ Downloaded {} ({} bytes) from {} to {}",
                frame.name,
                frame.body.len(),
                peer,
                path.display()
            );
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn upload(&self, name: &str) -> Result<()> {
        let body = self.files.read_file(name).await?;
        let deadline = Instant::now() + self.timeout;
        let session = self.discovery.discover(deadline, self.cancel.clone());
        println!("📤 Uploading {} ({} bytes) ...", name, body.len());

        let outcome = self.executor.push(session, name, body, deadline).await?;
        info!(peer = %outcome.peer(), "Upload complete");
        println!("✅ Uploaded {} to {}", name, outcome.peer());
        Ok(())
    }
}
