//! Receiver side of both exchange kinds
//!
//! Push streams carry a delivered file; fetch streams carry a request whose
//! reply is written back on the same stream. Each accepted stream is decoded,
//! handled and closed by one task.

use futures::{AsyncRead, AsyncWrite, AsyncWriteExt, Stream, StreamExt};
use libp2p::PeerId;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::compat::TokioAsyncReadCompatExt;
use tracing::{debug, info, instrument, warn};

use crate::codec;
use crate::config::TransferConfig;
use crate::error::{Result, TransferError};
use crate::files::LocalFiles;

/// Which protocol an inbound stream arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundKind {
    Push,
    Fetch,
}

pub struct InboundHandler {
    files: LocalFiles,
    chunk_size: usize,
    max_body_size: Option<u64>,
}

impl InboundHandler {
    pub fn new(files: LocalFiles, config: &TransferConfig) -> Self {
        Self {
            files,
            chunk_size: config.chunk_size,
            max_body_size: config.max_body_size,
        }
    }

    pub fn files(&self) -> &LocalFiles {
        &self.files
    }

    /// Receive one pushed file and close the stream
    #[instrument(skip(self, stream), fields(peer = %peer))]
    pub async fn handle_push<S>(&self, peer: PeerId, mut stream: S) -> Result<PathBuf>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let result = self.receive(&mut stream).await;
        if let Err(e) = stream.close().await {
            debug!(error = %e, "Error closing push stream");
        }
        match &result {
            Ok(path) => info!(path = %path.display(), "Successfully received file"),
            Err(e) => warn!(error = %e, "Error receiving file"),
        }
        result
    }

    async fn receive<S>(&self, stream: &mut S) -> Result<PathBuf>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let frame = codec::read_header(stream).await?;
        let name = frame.name().to_string();
        debug!(name = %name, "Receiving file");
        self.files
            .store_stream(&name, frame.into_body(self.chunk_size), self.max_body_size)
            .await
    }

    /// Answer one fetch request and close the stream
    ///
    /// A request for a file that is not shared is answered by closing the
    /// stream without a reply.
    #[instrument(skip(self, stream), fields(peer = %peer))]
    pub async fn handle_fetch<S>(&self, peer: PeerId, mut stream: S) -> Result<u64>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let result = self.respond(&mut stream).await;
        if let Err(e) = stream.close().await {
            debug!(error = %e, "Error closing fetch stream");
        }
        match &result {
            Ok(size) => info!(size, "Served file"),
            Err(e) => warn!(error = %e, "Error serving file"),
        }
        result
    }

    async fn respond<S>(&self, stream: &mut S) -> Result<u64>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        // The request body is empty; anything else is not a request.
        let request = codec::read_frame(&mut *stream, Some(0)).await?;
        let (file, len) = self.files.open_shared(&request.name).await?;

        codec::write_header(&mut *stream, &request.name).await?;
        let copied = futures::io::copy(file.compat(), &mut *stream).await?;
        stream.flush().await?;
        if copied != len {
            return Err(TransferError::Transport(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("sent {} of {} bytes", copied, len),
            )));
        }
        Ok(copied)
    }

    pub async fn handle<S>(&self, kind: InboundKind, peer: PeerId, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        // Outcomes are logged by the handlers themselves.
        let _ = match kind {
            InboundKind::Push => self.handle_push(peer, stream).await.map(|_| ()),
            InboundKind::Fetch => self.handle_fetch(peer, stream).await.map(|_| ()),
        };
    }
}

/// Handle every stream yielded by `incoming` on its own task.
pub fn serve<I, S>(handler: Arc<InboundHandler>, kind: InboundKind, incoming: I) -> JoinHandle<()>
where
    I: Stream<Item = (PeerId, S)> + Send + 'static,
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        futures::pin_mut!(incoming);
        while let Some((peer, stream)) = incoming.next().await {
            debug!(peer = %peer, ?kind, "New stream opened");
            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                handler.handle(kind, peer, stream).await;
            });
        }
        debug!(?kind, "Inbound stream listener stopped");
    })
}
