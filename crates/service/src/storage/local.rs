use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::{fs, sync::Mutex};
use tracing::debug;
use uuid::Uuid;

use super::{Blob, BlobStore, Revision, StoreError, WriteMode};

/// Blob store backed by a local directory.
///
/// Remote-style paths (`/legal-case-data/cases.json`) are resolved under
/// `base_dir`. The revision is derived from the file content, and writes go
/// to a temp file that is renamed into place. Preconditions are checked under
/// a process-wide mutex, so only writers inside this process are serialized.
pub struct LocalBlobStore {
    base_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl LocalBlobStore {
    pub fn new<P: Into<PathBuf>>(base_dir: P) -> Self {
        Self { base_dir: base_dir.into(), write_lock: Mutex::new(()) }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StoreError> {
        let relative = path.trim_start_matches('/');
        if relative.is_empty() || relative.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
            return Err(StoreError::Unavailable(format!("invalid blob path `{path}`")));
        }
        Ok(self.base_dir.join(relative))
    }

    fn revision_of(bytes: &[u8]) -> Revision {
        let mut hasher = DefaultHasher::new();
        bytes.hash(&mut hasher);
        Revision::new(format!("{:016x}-{}", hasher.finish(), bytes.len()))
    }

    async fn read_file(file: &PathBuf) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(file).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Unavailable(format!("read {}: {e}", file.display()))),
        }
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    fn backend(&self) -> &'static str {
        "local"
    }

    async fn download(&self, path: &str) -> Result<Option<Blob>, StoreError> {
        let file = self.resolve(path)?;
        Ok(Self::read_file(&file).await?.map(|bytes| {
            let revision = Self::revision_of(&bytes);
            Blob { bytes, revision }
        }))
    }

    async fn upload(&self, path: &str, bytes: Vec<u8>, mode: WriteMode) -> Result<Revision, StoreError> {
        let file = self.resolve(path)?;
        let _guard = self.write_lock.lock().await;

        let current = Self::read_file(&file).await?.map(|b| Self::revision_of(&b));
        let allowed = match (&mode, current.as_ref()) {
            (WriteMode::Overwrite, _) => true,
            (WriteMode::Add, existing) => existing.is_none(),
            (WriteMode::Update(expected), Some(actual)) => expected == actual,
            (WriteMode::Update(_), None) => false,
        };
        if !allowed {
            return Err(StoreError::Conflict { path: path.to_string() });
        }

        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Unavailable(format!("create {}: {e}", parent.display())))?;
        }
        let tmp = file.with_extension(format!("tmp-{}", Uuid::new_v4()));
        let revision = Self::revision_of(&bytes);
        fs::write(&tmp, &bytes)
            .await
            .map_err(|e| StoreError::Unavailable(format!("write {}: {e}", tmp.display())))?;
        if let Err(e) = fs::rename(&tmp, &file).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(StoreError::Unavailable(format!("rename into {}: {e}", file.display())));
        }
        debug!(path, bytes = bytes.len(), %revision, "local blob written");
        Ok(revision)
    }
}
