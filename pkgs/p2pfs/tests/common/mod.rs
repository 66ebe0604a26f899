//! In-memory stand-ins for the transport substrate

#![allow(dead_code)]

use async_trait::async_trait;
use futures::{AsyncRead, AsyncWrite, AsyncWriteExt};
use libp2p::{PeerId, StreamProtocol};
use p2pfs::codec::{self, TransferFrame};
use p2pfs::{
    Dialer, InboundHandler, InboundKind, LocalFiles, PeerHandle, PeerRegistry, StreamOpener,
    TransferConfig, TransferError, FETCH_PROTOCOL,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tempfile::TempDir;
use tokio::io::DuplexStream;
use tokio::task::JoinHandle;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};

/// Counters shared by every stream a [`MemoryNetwork`] hands out
#[derive(Debug, Default)]
pub struct StreamStats {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub dropped: AtomicUsize,
}

impl StreamStats {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::SeqCst)
    }
}

/// Caller side of an in-memory stream that records close and drop
pub struct TrackedStream {
    inner: Compat<DuplexStream>,
    stats: Arc<StreamStats>,
}

impl AsyncRead for TrackedStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for TrackedStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let result = Pin::new(&mut self.inner).poll_close(cx);
        if result.is_ready() {
            self.stats.closed.fetch_add(1, Ordering::SeqCst);
        }
        result
    }
}

impl Drop for TrackedStream {
    fn drop(&mut self) {
        self.stats.dropped.fetch_add(1, Ordering::SeqCst);
    }
}

/// How a simulated peer behaves when a stream is opened to it
#[derive(Clone)]
pub enum Remote {
    /// Stream opening fails
    Unreachable,
    /// Runs the real inbound handler
    Serving(Arc<InboundHandler>),
    /// Answers every fetch with a frame for a different file
    WrongName(String),
    /// Reads the request and closes without replying
    Silent,
}

struct NetworkState {
    local_peer: PeerId,
    remotes: Mutex<HashMap<PeerId, Remote>>,
    attempts: Mutex<Vec<PeerId>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    stats: Arc<StreamStats>,
}

/// A set of simulated peers reachable through duplex pipes
#[derive(Clone)]
pub struct MemoryNetwork {
    state: Arc<NetworkState>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self {
            state: Arc::new(NetworkState {
                local_peer: PeerId::random(),
                remotes: Mutex::new(HashMap::new()),
                attempts: Mutex::new(Vec::new()),
                tasks: Mutex::new(Vec::new()),
                stats: Arc::new(StreamStats::default()),
            }),
        }
    }

    pub fn add(&self, remote: Remote) -> PeerHandle {
        let peer_id = PeerId::random();
        self.state.remotes.lock().insert(peer_id, remote);
        PeerHandle::from(peer_id)
    }

    pub fn attempts(&self) -> Vec<PeerId> {
        self.state.attempts.lock().clone()
    }

    pub fn stats(&self) -> Arc<StreamStats> {
        Arc::clone(&self.state.stats)
    }

    /// Wait for every simulated remote to finish its side of the exchange.
    pub async fn settle(&self) {
        let tasks: Vec<_> = self.state.tasks.lock().drain(..).collect();
        for task in tasks {
            task.await.expect("remote task panicked");
        }
    }
}

#[async_trait]
impl StreamOpener for MemoryNetwork {
    type Stream = TrackedStream;

    async fn open_stream(&self, peer: PeerId, protocol: StreamProtocol) -> io::Result<TrackedStream> {
        self.state.attempts.lock().push(peer);
        let remote = self.state.remotes.lock().get(&peer).cloned();
        let remote = match remote {
            None | Some(Remote::Unreachable) => {
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "unreachable"))
            }
            Some(remote) => remote,
        };

        let (local, far) = tokio::io::duplex(64 * 1024);
        let kind = if protocol == FETCH_PROTOCOL {
            InboundKind::Fetch
        } else {
            InboundKind::Push
        };
        let caller = self.state.local_peer;
        let task = tokio::spawn(async move {
            let mut far = far.compat();
            match remote {
                Remote::Serving(handler) => handler.handle(kind, caller, far).await,
                Remote::WrongName(other) => {
                    let _ = codec::read_frame(&mut far, Some(0)).await;
                    let frame = TransferFrame::new(other, "not what you asked for").unwrap();
                    let _ = codec::write_frame(&mut far, &frame).await;
                    let _ = far.close().await;
                }
                Remote::Silent => {
                    let _ = codec::read_frame(&mut far, None).await;
                    let _ = far.close().await;
                }
                Remote::Unreachable => unreachable!(),
            }
        });
        self.state.tasks.lock().push(task);

        self.state.stats.opened.fetch_add(1, Ordering::SeqCst);
        Ok(TrackedStream {
            inner: local.compat(),
            stats: Arc::clone(&self.state.stats),
        })
    }
}

/// A peer with its own shared and download directories
pub struct TestPeer {
    pub dir: TempDir,
    pub files: LocalFiles,
    pub handler: Arc<InboundHandler>,
}

impl TestPeer {
    pub fn new() -> Self {
        Self::with_config(&TransferConfig::default())
    }

    pub fn with_config(config: &TransferConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let files = LocalFiles::new(dir.path().join("shared"), dir.path().join("downloads"));
        std::fs::create_dir_all(files.shared_dir()).unwrap();
        std::fs::create_dir_all(files.download_dir()).unwrap();
        let handler = Arc::new(InboundHandler::new(files.clone(), config));
        Self {
            dir,
            files,
            handler,
        }
    }

    pub fn share(&self, name: &str, content: &[u8]) {
        let path = self.files.shared_dir().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    pub fn downloaded(&self, name: &str) -> Vec<u8> {
        std::fs::read(self.files.download_dir().join(name)).unwrap()
    }

    pub fn remote(&self) -> Remote {
        Remote::Serving(Arc::clone(&self.handler))
    }
}

/// Registry with a fixed, replaceable peer set that counts how often it is sampled
#[derive(Default)]
pub struct StaticRegistry {
    peers: Mutex<Vec<PeerHandle>>,
    polls: AtomicUsize,
}

impl StaticRegistry {
    pub fn with_peers(peers: Vec<PeerHandle>) -> Self {
        Self {
            peers: Mutex::new(peers),
            polls: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, peers: Vec<PeerHandle>) {
        *self.peers.lock() = peers;
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

impl PeerRegistry for StaticRegistry {
    fn connected_peers(&self) -> Vec<PeerHandle> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        self.peers.lock().clone()
    }
}

/// Dialer that records requests and optionally refuses them
#[derive(Default)]
pub struct RecordingDialer {
    pub refuse: bool,
    dialed: Mutex<Vec<PeerId>>,
}

impl RecordingDialer {
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            dialed: Mutex::new(Vec::new()),
        }
    }

    pub fn dialed(&self) -> Vec<PeerId> {
        self.dialed.lock().clone()
    }
}

#[async_trait]
impl Dialer for RecordingDialer {
    async fn connect(&self, peer: &PeerHandle) -> Result<(), TransferError> {
        self.dialed.lock().push(peer.peer_id);
        if self.refuse {
            return Err(TransferError::Dial {
                peer: peer.peer_id,
                reason: "connection refused".to_string(),
            });
        }
        Ok(())
    }
}
