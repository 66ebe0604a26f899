//! Local shared and download directories
//!
//! Incoming files are written to a uniquely named temporary file and renamed
//! into place once complete, so concurrent transfers of different files never
//! interleave and a failed transfer never leaves a truncated file behind.

use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, TransferError};

#[derive(Debug, Clone)]
pub struct LocalFiles {
    shared_dir: PathBuf,
    download_dir: PathBuf,
}

impl LocalFiles {
    pub fn new(shared_dir: impl Into<PathBuf>, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            shared_dir: shared_dir.into(),
            download_dir: download_dir.into(),
        }
    }

    pub fn shared_dir(&self) -> &Path {
        &self.shared_dir
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Create both directories if they are missing
    pub async fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.shared_dir, &self.download_dir] {
            fs::create_dir_all(dir)
                .await
                .map_err(|e| TransferError::filesystem(dir, e))?;
        }
        Ok(())
    }

    /// All regular files under the shared directory, as sorted relative names
    pub async fn list_files(&self) -> Result<Vec<String>> {
        let mut files = Vec::new();
        let mut pending = vec![self.shared_dir.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir)
                .await
                .map_err(|e| TransferError::filesystem(&dir, e))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| TransferError::filesystem(&dir, e))?
            {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| TransferError::filesystem(&path, e))?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() {
                    if let Some(name) = self.relative_name(&path) {
                        files.push(name);
                    }
                }
            }
        }

        files.sort();
        Ok(files)
    }

    pub async fn read_file(&self, name: &str) -> Result<Bytes> {
        let path = resolve(&self.shared_dir, name)?;
        let data = fs::read(&path)
            .await
            .map_err(|e| TransferError::filesystem(&path, e))?;
        Ok(Bytes::from(data))
    }

    /// Open a shared regular file for streaming, returning it with its length
    pub async fn open_shared(&self, name: &str) -> Result<(fs::File, u64)> {
        let path = resolve(&self.shared_dir, name)?;
        let file = fs::File::open(&path)
            .await
            .map_err(|e| TransferError::filesystem(&path, e))?;
        let metadata = file
            .metadata()
            .await
            .map_err(|e| TransferError::filesystem(&path, e))?;
        if !metadata.is_file() {
            return Err(TransferError::filesystem(
                &path,
                io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
            ));
        }
        Ok((file, metadata.len()))
    }

    /// Store a complete file in the download directory
    pub async fn write_file(&self, name: &str, data: impl Into<Bytes>) -> Result<PathBuf> {
        let body = futures::stream::iter([Ok(data.into())]);
        self.store_stream(name, body, None).await
    }

    /// Store a body arriving as chunks in the download directory
    pub async fn store_stream<S>(&self, name: &str, body: S, limit: Option<u64>) -> Result<PathBuf>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        let path = resolve(&self.download_dir, name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| TransferError::filesystem(parent, e))?;
        }

        let temp_path = temp_path_for(&path);
        let written = write_chunks(&temp_path, body, limit).await;
        let size = match written {
            Ok(size) => size,
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&temp_path).await {
                    warn!(path = %temp_path.display(), error = %cleanup, "Failed to remove partial file");
                }
                return Err(e);
            }
        };

        fs::rename(&temp_path, &path)
            .await
            .map_err(|e| TransferError::filesystem(&path, e))?;
        info!(path = %path.display(), size, "Stored file");
        Ok(path)
    }

    fn relative_name(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.shared_dir).ok()?;
        let parts: Vec<&str> = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<_>>()?;
        Some(parts.join("/"))
    }
}

async fn write_chunks<S>(temp_path: &Path, body: S, limit: Option<u64>) -> Result<u64>
where
    S: Stream<Item = io::Result<Bytes>>,
{
    let mut file = fs::File::create(temp_path)
        .await
        .map_err(|e| TransferError::filesystem(temp_path, e))?;
    futures::pin_mut!(body);

    let mut size = 0u64;
    while let Some(chunk) = body.try_next().await? {
        size += chunk.len() as u64;
        if let Some(limit) = limit {
            if size > limit {
                return Err(TransferError::BodyTooLarge { limit });
            }
        }
        file.write_all(&chunk)
            .await
            .map_err(|e| TransferError::filesystem(temp_path, e))?;
    }
    file.flush()
        .await
        .map_err(|e| TransferError::filesystem(temp_path, e))?;
    debug!(path = %temp_path.display(), size, "Body written");
    Ok(size)
}

fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}.downloading", file_name, Uuid::new_v4()))
}

/// Join `name` onto `base`, refusing anything that could escape it
pub fn resolve(base: &Path, name: &str) -> Result<PathBuf> {
    let relative = Path::new(name);
    let only_normal = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if name.is_empty() || name.contains('\n') || !only_normal {
        return Err(TransferError::InvalidName(name.to_string()));
    }
    Ok(base.join(relative))
}
