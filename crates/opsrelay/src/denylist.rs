//! Persistent deny-lists keyed by address or identity
//!
//! A deny-list is consulted twice per handshake: once by peer address
//! before any frame is read, once by asserted identity after credential
//! validation. The file format is a single pipe-delimited line of entries.

use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Membership store consulted during the handshake
#[async_trait]
pub trait DenyStore: Send + Sync {
    /// Whether `value` is present in the list
    async fn contains(&self, value: &str) -> bool;
}

/// File-backed deny-list in the pipe-delimited format
///
/// A missing file is an empty list.
pub struct FileDenyList {
    path: PathBuf,
}

impl FileDenyList {
    /// Create a deny-list backed by `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Append an entry, creating the file if missing
    pub async fn add(&self, value: &str) -> io::Result<()> {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(format!("|{}", value).as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl DenyStore for FileDenyList {
    async fn contains(&self, value: &str) -> bool {
        match fs::read_to_string(&self.path).await {
            Ok(content) => content.split('|').any(|entry| entry == value),
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!(path = %self.path.display(), "deny-list read failed: {}", e);
                false
            }
        }
    }
}

/// Deny-list that never matches; used when no file is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyDenyList;

#[async_trait]
impl DenyStore for EmptyDenyList {
    async fn contains(&self, _value: &str) -> bool {
        false
    }
}
