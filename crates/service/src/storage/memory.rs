use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Blob, BlobStore, Revision, StoreError, WriteMode};

/// In-process blob store.
///
/// Revisions come from a monotonically increasing counter. An optional
/// latency is applied before every call so tests can force overlapping
/// read-modify-write cycles; `set_fail_uploads` simulates an outage.
#[derive(Default)]
pub struct MemoryBlobStore {
    files: RwLock<HashMap<String, (Vec<u8>, Revision)>>,
    next_rev: AtomicU64,
    latency: Option<Duration>,
    fail_uploads: AtomicBool,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self { latency: Some(latency), ..Self::default() }
    }

    pub fn set_fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    /// Raw content at `path`, bypassing latency and failure injection.
    pub async fn get_raw(&self, path: &str) -> Option<Vec<u8>> {
        self.files.read().await.get(path).map(|(bytes, _)| bytes.clone())
    }

    /// Seed raw content at `path` without any precondition.
    pub async fn put_raw(&self, path: &str, bytes: Vec<u8>) -> Revision {
        let rev = self.mint_revision();
        self.files.write().await.insert(path.to_string(), (bytes, rev.clone()));
        rev
    }

    fn mint_revision(&self) -> Revision {
        let n = self.next_rev.fetch_add(1, Ordering::SeqCst) + 1;
        Revision::new(format!("{n:016x}"))
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn download(&self, path: &str) -> Result<Option<Blob>, StoreError> {
        self.simulate_latency().await;
        let files = self.files.read().await;
        Ok(files
            .get(path)
            .map(|(bytes, revision)| Blob { bytes: bytes.clone(), revision: revision.clone() }))
    }

    async fn upload(&self, path: &str, bytes: Vec<u8>, mode: WriteMode) -> Result<Revision, StoreError> {
        self.simulate_latency().await;
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("upload to {path} refused")));
        }
        let mut files = self.files.write().await;
        let current = files.get(path).map(|(_, rev)| rev);
        let allowed = match (&mode, current) {
            (WriteMode::Overwrite, _) => true,
            (WriteMode::Add, existing) => existing.is_none(),
            (WriteMode::Update(expected), Some(actual)) => expected == actual,
            (WriteMode::Update(_), None) => false,
        };
        if !allowed {
            return Err(StoreError::Conflict { path: path.to_string() });
        }
        let rev = self.mint_revision();
        files.insert(path.to_string(), (bytes, rev.clone()));
        Ok(rev)
    }
}
