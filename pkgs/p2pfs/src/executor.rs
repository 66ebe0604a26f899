//! Drives one fetch or push across a sequence of candidate peers
//!
//! Candidates are tried strictly one at a time, in the order the sequence
//! yields them. A failed attempt is logged and the next candidate is tried;
//! only the aggregate outcome is returned. The deadline is checked between
//! candidates, so an attempt already in flight is allowed to finish.

use bytes::Bytes;
use futures::{AsyncWriteExt, Stream, StreamExt};
use libp2p::PeerId;
use tokio::time::{self, Instant};
use tracing::{debug, info, instrument, warn};

use crate::codec::{self, TransferFrame};
use crate::config::TransferConfig;
use crate::error::{Result, TransferError};
use crate::transport::{PeerHandle, StreamOpener, FETCH_PROTOCOL, PUSH_PROTOCOL};

/// Terminal result of a successful operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// A fetched frame and the peer that served it
    Delivered { peer: PeerId, frame: TransferFrame },
    /// The peer that accepted a pushed frame
    Sent { peer: PeerId },
}

impl TransferOutcome {
    pub fn peer(&self) -> PeerId {
        match self {
            TransferOutcome::Delivered { peer, .. } | TransferOutcome::Sent { peer } => *peer,
        }
    }
}

pub struct TransferExecutor<O> {
    opener: O,
    max_body_size: Option<u64>,
}

impl<O: StreamOpener> TransferExecutor<O> {
    pub fn new(opener: O, config: &TransferConfig) -> Self {
        Self {
            opener,
            max_body_size: config.max_body_size,
        }
    }

    /// Download `name` from the first candidate that serves it.
    #[instrument(skip(self, candidates))]
    pub async fn fetch<S>(&self, candidates: S, name: &str, deadline: Instant) -> Result<TransferOutcome>
    where
        S: Stream<Item = PeerHandle>,
    {
        codec::validate_name(name)?;
        futures::pin_mut!(candidates);

        while let Some(peer) = next_candidate(&mut candidates, deadline).await {
            match self.fetch_from(peer.peer_id, name).await {
                Ok(frame) => {
                    info!(peer = %peer.peer_id, size = frame.body.len(), "File downloaded");
                    return Ok(TransferOutcome::Delivered {
                        peer: peer.peer_id,
                        frame,
                    });
                }
                Err(e) => warn!(peer = %peer.peer_id, error = %e, "Fetch attempt failed"),
            }
        }

        info!("File not found on any peer");
        Err(TransferError::NotFound(name.to_string()))
    }

    /// One fetch attempt: send the request, half-close, decode the reply.
    pub async fn fetch_from(&self, peer: PeerId, name: &str) -> Result<TransferFrame> {
        let mut stream = self.opener.open_stream(peer, FETCH_PROTOCOL).await?;
        debug!(peer = %peer, "Stream opened");

        let sent = async {
            codec::write_header(&mut stream, name).await?;
            stream.flush().await?;
            Ok::<_, TransferError>(())
        }
        .await;
        let closed = stream.close().await;
        sent?;
        closed?;
        debug!(peer = %peer, "Request sent");

        let frame = codec::read_frame(&mut stream, self.max_body_size).await?;
        if frame.name != name {
            return Err(TransferError::NameMismatch {
                expected: name.to_string(),
                received: frame.name,
            });
        }
        Ok(frame)
    }

    /// Upload `name` with `body` to the first candidate that accepts it.
    #[instrument(skip(self, candidates, body), fields(size = body.len()))]
    pub async fn push<S>(
        &self,
        candidates: S,
        name: &str,
        body: Bytes,
        deadline: Instant,
    ) -> Result<TransferOutcome>
    where
        S: Stream<Item = PeerHandle>,
    {
        let frame = TransferFrame::new(name, body)?;
        futures::pin_mut!(candidates);

        while let Some(peer) = next_candidate(&mut candidates, deadline).await {
            match self.push_to(peer.peer_id, &frame).await {
                Ok(()) => {
                    info!(peer = %peer.peer_id, "File uploaded");
                    return Ok(TransferOutcome::Sent { peer: peer.peer_id });
                }
                Err(e) => warn!(peer = %peer.peer_id, error = %e, "Push attempt failed"),
            }
        }

        info!("No peers available to upload the file");
        Err(TransferError::NoPeersAvailable(name.to_string()))
    }

    /// One push attempt: write the whole frame and close.
    pub async fn push_to(&self, peer: PeerId, frame: &TransferFrame) -> Result<()> {
        let mut stream = self.opener.open_stream(peer, PUSH_PROTOCOL).await?;
        debug!(peer = %peer, "Stream opened");

        let written = codec::write_frame(&mut stream, frame).await;
        let closed = stream.close().await;
        written?;
        closed?;
        Ok(())
    }
}

/// Next candidate, or `None` once the sequence ends or the deadline passes.
async fn next_candidate<S>(candidates: &mut S, deadline: Instant) -> Option<PeerHandle>
where
    S: Stream<Item = PeerHandle> + Unpin,
{
    if Instant::now() >= deadline {
        return None;
    }
    tokio::select! {
        biased;
        _ = time::sleep_until(deadline) => None,
        peer = candidates.next() => peer,
    }
}
