//! Error types for discovery and file transfer operations

use libp2p::PeerId;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while exchanging files with peers
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),
    #[error("Malformed header: {0}")]
    MalformedHeader(String),
    #[error("Name mismatch: requested {expected}, received {received}")]
    NameMismatch { expected: String, received: String },
    #[error("Body exceeds limit of {limit} bytes")]
    BodyTooLarge { limit: u64 },
    #[error("Invalid file name: {0:?}")]
    InvalidName(String),
    #[error("File not found on any peer: {0}")]
    NotFound(String),
    #[error("No peers available to upload: {0}")]
    NoPeersAvailable(String),
    #[error("Failed to connect to peer {peer}: {reason}")]
    Dial { peer: PeerId, reason: String },
    #[error("Filesystem error at {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TransferError {
    /// Whether the executor may move on to the next candidate after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TransferError::Transport(_)
                | TransferError::MalformedHeader(_)
                | TransferError::NameMismatch { .. }
                | TransferError::BodyTooLarge { .. }
        )
    }

    pub(crate) fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TransferError::Filesystem {
            path: path.into(),
            source,
        }
    }
}

/// Result type for transfer operations
pub type Result<T> = std::result::Result<T, TransferError>;
