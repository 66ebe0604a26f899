//! Peer discovery by polling the connected-peer registry
//!
//! A [`DiscoverySession`] resamples the whole connected set on every tick
//! and yields each peer again, so a long-lived peer is seen repeatedly. The
//! set itself grows through [`Discovery::handle_peer_found`], which asks the
//! substrate to connect to peers announced by mDNS.

use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::transport::{Dialer, PeerHandle, PeerRegistry};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Shorter intervals are raised to this
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Factory for discovery sessions plus the reconnect side effect
pub struct Discovery<R, D> {
    registry: Arc<R>,
    dialer: Arc<D>,
    poll_interval: Duration,
}

impl<R, D> Clone for Discovery<R, D> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            dialer: Arc::clone(&self.dialer),
            poll_interval: self.poll_interval,
        }
    }
}

impl<R, D> Discovery<R, D>
where
    R: PeerRegistry,
    D: Dialer,
{
    pub fn new(registry: Arc<R>, dialer: Arc<D>, poll_interval: Duration) -> Self {
        Self {
            registry,
            dialer,
            poll_interval: poll_interval.max(MIN_POLL_INTERVAL),
        }
    }

    /// Start a session that ends at `deadline` or when `cancel` fires.
    pub fn discover(&self, deadline: Instant, cancel: CancellationToken) -> DiscoverySession {
        // Capacity 1: a slow consumer holds the poller on a single push.
        let (tx, rx) = mpsc::channel(1);
        let cancel = cancel.child_token();
        let task = tokio::spawn(poll_connected_peers(
            Arc::clone(&self.registry),
            self.poll_interval,
            deadline,
            cancel.clone(),
            tx,
        ));

        DiscoverySession {
            receiver: rx,
            deadline,
            cancel,
            task,
        }
    }

    /// Connect to a peer announced by the discovery layer. Failures are only logged.
    #[instrument(skip(self, peer), fields(peer = %peer.peer_id))]
    pub async fn handle_peer_found(&self, peer: PeerHandle) {
        match self.dialer.connect(&peer).await {
            Ok(()) => debug!("Connection requested for discovered peer"),
            Err(e) => warn!(error = %e, "Error connecting to discovered peer"),
        }
    }

    /// Handle every peer announced on `found` until it ends.
    pub fn watch<S>(&self, found: S) -> JoinHandle<()>
    where
        S: Stream<Item = PeerHandle> + Send + 'static,
    {
        let discovery = self.clone();
        tokio::spawn(async move {
            futures::pin_mut!(found);
            while let Some(peer) = found.next().await {
                discovery.handle_peer_found(peer).await;
            }
        })
    }
}

async fn poll_connected_peers<R: PeerRegistry>(
    registry: Arc<R>,
    poll_interval: Duration,
    deadline: Instant,
    cancel: CancellationToken,
    tx: mpsc::Sender<PeerHandle>,
) {
    let mut ticker = time::interval_at(Instant::now() + poll_interval, poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let expiry = time::sleep_until(deadline);
    tokio::pin!(expiry);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = &mut expiry => break,
            _ = ticker.tick() => {}
        }

        let peers = registry.connected_peers();
        debug!(count = peers.len(), "Polled connected peers");
        for peer in peers {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = &mut expiry => return,
                sent = tx.send(peer) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
        }
    }
    info!("Discovery session finished");
}

/// Lazy sequence of connected peers bound to a deadline
///
/// Dropping the session stops its poll task.
pub struct DiscoverySession {
    receiver: mpsc::Receiver<PeerHandle>,
    deadline: Instant,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl DiscoverySession {
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn is_finished(&self) -> bool {
        self.cancel.is_cancelled() || Instant::now() >= self.deadline
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Stream for DiscoverySession {
    type Item = PeerHandle;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        // Anything still buffered after expiry is discarded.
        if this.is_finished() {
            this.receiver.close();
            return Poll::Ready(None);
        }
        this.receiver.poll_recv(cx)
    }
}

impl Drop for DiscoverySession {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.task.abort();
    }
}
