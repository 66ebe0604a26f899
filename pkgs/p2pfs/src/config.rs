//! Configuration for a file sharing node
//!
//! Every section has defaults, so a JSON file only needs the keys it wants to
//! override.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::codec::CHUNK_SIZE;

/// Errors raised while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Invalid listen address: {0}")]
    InvalidListenAddr(String),
    #[error("Invalid poll interval: {0} ms (must be at least 1 ms)")]
    InvalidPollInterval(u64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Files offered to other peers
    pub shared_dir: PathBuf,
    /// Where fetched and pushed files are stored
    pub download_dir: PathBuf,
    pub node: NodeConfig,
    pub transfer: TransferConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shared_dir: PathBuf::from("./shared"),
            download_dir: PathBuf::from("./downloads"),
            node: NodeConfig::default(),
            transfer: TransferConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the node cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.node.listen_multiaddr()?;
        if self.transfer.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidPollInterval(
                self.transfer.poll_interval_ms,
            ));
        }
        Ok(())
    }
}

/// Transport substrate settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub listen_addr: String,
    pub enable_mdns: bool,
    pub idle_connection_timeout_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: "/ip4/0.0.0.0/tcp/0".to_string(),
            enable_mdns: true,
            idle_connection_timeout_secs: 60,
        }
    }
}

impl NodeConfig {
    pub fn listen_multiaddr(&self) -> Result<libp2p::Multiaddr, ConfigError> {
        self.listen_addr
            .parse()
            .map_err(|_| ConfigError::InvalidListenAddr(self.listen_addr.clone()))
    }

    pub fn idle_connection_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_connection_timeout_secs)
    }
}

/// Discovery and transfer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub poll_interval_ms: u64,
    pub operation_timeout_ms: u64,
    pub chunk_size: usize,
    /// Upper bound on a body buffered in memory or written to disk
    pub max_body_size: Option<u64>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            operation_timeout_ms: 30_000,
            chunk_size: CHUNK_SIZE,
            max_body_size: None,
        }
    }
}

impl TransferConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}
