//! Blob storage abstractions for the service layer.
//!
//! A collection lives in exactly one blob. Backends only know how to fetch a
//! whole blob (with its revision) and how to replace it under a [`WriteMode`]
//! precondition; everything JSON-shaped happens in `crate::collection`.

pub mod dropbox;
pub mod local;
pub mod memory;
pub mod retry;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use configs::{StorageBackend, StorageConfig};
use thiserror::Error;

pub use dropbox::DropboxBlobStore;
pub use local::LocalBlobStore;
pub use memory::MemoryBlobStore;
pub use retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("remote store unavailable: {0}")]
    Unavailable(String),
    #[error("transient remote failure: {0}")]
    Transient(String),
    #[error("revision conflict at {path}")]
    Conflict { path: String },
    #[error("invalid store configuration: {0}")]
    Config(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// Opaque version tag of a stored blob. Changes on every successful upload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Revision(String);

impl Revision {
    pub fn new(rev: impl Into<String>) -> Self {
        Self(rev.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Blob {
    pub bytes: Vec<u8>,
    pub revision: Revision,
}

/// Precondition applied by [`BlobStore::upload`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteMode {
    /// Replace whatever is there, unconditionally. The collection store
    /// always writes conditionally; this is for callers that own a blob outright.
    Overwrite,
    /// Create the blob; conflict if it already exists.
    Add,
    /// Replace the blob only if its current revision matches.
    Update(Revision),
}

/// Whole-blob remote storage.
/// Implementations can be HTTP-backed, file-backed or in-memory.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Short backend name for logs.
    fn backend(&self) -> &'static str;

    /// Fetch a blob. `Ok(None)` means the path does not exist.
    async fn download(&self, path: &str) -> Result<Option<Blob>, StoreError>;

    /// Store `bytes` at `path` honoring `mode`; returns the new revision.
    async fn upload(&self, path: &str, bytes: Vec<u8>, mode: WriteMode) -> Result<Revision, StoreError>;
}

/// Build the backend selected by `cfg.backend`.
pub fn build_blob_store(cfg: &StorageConfig) -> Result<Arc<dyn BlobStore>, StoreError> {
    let store: Arc<dyn BlobStore> = match cfg.backend {
        StorageBackend::Dropbox => {
            let retry = RetryPolicy::from_config(&cfg.retry);
            Arc::new(DropboxBlobStore::new(&cfg.dropbox, retry)?)
        }
        StorageBackend::Local => Arc::new(LocalBlobStore::new(&cfg.local_dir)),
        StorageBackend::Memory => Arc::new(MemoryBlobStore::new()),
    };
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_retry() {
        assert!(StoreError::Transient("503".into()).is_retryable());
        assert!(!StoreError::Unavailable("401".into()).is_retryable());
        assert!(!StoreError::Conflict { path: "/a.json".into() }.is_retryable());
    }

    #[test]
    fn builds_selected_backend() {
        let cfg = StorageConfig { backend: StorageBackend::Memory, ..Default::default() };
        assert_eq!(build_blob_store(&cfg).expect("memory").backend(), "memory");

        let mut cfg = StorageConfig::default();
        cfg.dropbox.access_token = "token".into();
        assert_eq!(build_blob_store(&cfg).expect("dropbox").backend(), "dropbox");
    }
}
