use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use configs::StorageConfig;
use dashmap::DashMap;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{CollectionName, Item};
use crate::errors::ServiceError;
use crate::storage::{build_blob_store, BlobStore, Revision, StoreError, WriteMode};

const DEFAULT_ROOT: &str = "/legal-case-data";
const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 5;

/// Current content of a collection plus the revision it was read at
/// (`None` when the backing file does not exist yet).
struct Snapshot {
    items: Vec<Item>,
    revision: Option<Revision>,
}

/// JSON collections on top of whole-file blobs.
///
/// Every mutation is a read-modify-write of the full collection file. Writers
/// in this process are serialized per collection; writers elsewhere are
/// caught by the revision precondition on upload, and the cycle is replayed
/// up to `max_conflict_retries` times before giving up with `Conflict`.
pub struct CollectionStore {
    blobs: Arc<dyn BlobStore>,
    root: String,
    locks: DashMap<String, Arc<Mutex<()>>>,
    max_conflict_retries: u32,
}

impl CollectionStore {
    pub fn new(blobs: Arc<dyn BlobStore>, root: impl Into<String>) -> Self {
        Self {
            blobs,
            root: root.into(),
            locks: DashMap::new(),
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
        }
    }

    /// Store over `blobs` rooted at `/legal-case-data`.
    pub fn with_default_root(blobs: Arc<dyn BlobStore>) -> Self {
        Self::new(blobs, DEFAULT_ROOT)
    }

    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    pub fn from_config(cfg: &StorageConfig) -> Result<Self, ServiceError> {
        let blobs = build_blob_store(cfg)?;
        info!(backend = blobs.backend(), root = %cfg.root, "collection store ready");
        Ok(Self::new(blobs, cfg.root.clone()).with_max_conflict_retries(cfg.max_conflict_retries))
    }

    /// All items of `collection`; a collection with no backing file is empty.
    pub async fn read(&self, collection: &str) -> Result<Vec<Item>, ServiceError> {
        let name = CollectionName::parse(collection)?;
        let snapshot = self.load(&name).await?;
        debug!(collection = %name, items = snapshot.items.len(), "collection read");
        Ok(snapshot.items)
    }

    /// Upsert by id and return the full updated collection.
    ///
    /// A matching `id` merges `data` over the existing item; an unmatched or
    /// missing `id` appends a new item (a UUIDv4 is generated when missing).
    pub async fn write(
        &self,
        collection: &str,
        data: Map<String, Value>,
        id: Option<String>,
    ) -> Result<Vec<Item>, ServiceError> {
        let name = CollectionName::parse(collection)?;
        // Chosen once so a replayed cycle cannot mint a second id.
        let target = id.filter(|id| !id.is_empty()).unwrap_or_else(|| Uuid::new_v4().to_string());

        self.mutate(&name, |items, now| match items.iter_mut().find(|item| item.id == target) {
            Some(existing) => existing.merge(data.clone(), now),
            None => items.push(Item::new(target.clone(), data.clone(), now)),
        })
        .await
    }

    /// Remove the item with `id` (absent id is a no-op) and return the collection.
    pub async fn delete(&self, collection: &str, id: &str) -> Result<Vec<Item>, ServiceError> {
        let name = CollectionName::parse(collection)?;
        self.mutate(&name, |items, _| items.retain(|item| item.id != id)).await
    }

    fn lock_for(&self, name: &CollectionName) -> Arc<Mutex<()>> {
        self.locks.entry(name.as_str().to_string()).or_default().clone()
    }

    async fn load(&self, name: &CollectionName) -> Result<Snapshot, ServiceError> {
        let path = name.file_path(&self.root);
        let Some(blob) = self.blobs.download(&path).await? else {
            return Ok(Snapshot { items: Vec::new(), revision: None });
        };
        let items: Vec<Item> = serde_json::from_slice(&blob.bytes)
            .map_err(|e| ServiceError::Corrupt(format!("{path}: {e}")))?;
        let mut seen = HashSet::with_capacity(items.len());
        if let Some(dup) = items.iter().find(|item| !seen.insert(item.id.as_str())) {
            return Err(ServiceError::Corrupt(format!("{path}: duplicate id `{}`", dup.id)));
        }
        Ok(Snapshot { items, revision: Some(blob.revision) })
    }

    async fn mutate<F>(&self, name: &CollectionName, mut apply: F) -> Result<Vec<Item>, ServiceError>
    where
        F: FnMut(&mut Vec<Item>, DateTime<Utc>),
    {
        let path = name.file_path(&self.root);
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;

        let mut replays = 0;
        loop {
            let Snapshot { mut items, revision } = self.load(name).await?;
            apply(&mut items, Utc::now());

            let body = serde_json::to_vec_pretty(&items)
                .map_err(|e| ServiceError::Internal(format!("encode {path}: {e}")))?;
            let mode = match revision {
                Some(rev) => WriteMode::Update(rev),
                None => WriteMode::Add,
            };

            match self.blobs.upload(&path, body, mode).await {
                Ok(rev) => {
                    debug!(collection = %name, items = items.len(), %rev, replays, "collection written");
                    return Ok(items);
                }
                Err(StoreError::Conflict { .. }) if replays < self.max_conflict_retries => {
                    replays += 1;
                    warn!(collection = %name, attempt = replays, "concurrent modification, replaying write");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBlobStore;
    use serde_json::json;
    use std::time::Duration;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().expect("object")
    }

    fn store() -> (CollectionStore, Arc<MemoryBlobStore>) {
        let blobs = Arc::new(MemoryBlobStore::new());
        (CollectionStore::with_default_root(blobs.clone()), blobs)
    }

    #[tokio::test]
    async fn missing_collection_reads_empty() -> Result<(), anyhow::Error> {
        let (store, _) = store();
        assert!(store.read("cases").await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn create_without_id_generates_uuid() -> Result<(), anyhow::Error> {
        let (store, _) = store();
        let items = store.write("cases", obj(json!({"name": "Case A", "court": "District"})), None).await?;
        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert!(Uuid::parse_str(&item.id).is_ok());
        assert_eq!(item.created_at, item.updated_at);
        assert_eq!(item.fields["name"], "Case A");
        assert_eq!(item.fields["court"], "District");

        let more = store.write("cases", obj(json!({"name": "Case B"})), None).await?;
        assert_eq!(more.len(), 2);
        assert_ne!(more[0].id, more[1].id);
        assert_eq!(more[1].fields["name"], "Case B");
        Ok(())
    }

    #[tokio::test]
    async fn update_merges_and_keeps_created_at() -> Result<(), anyhow::Error> {
        let (store, _) = store();
        let created = store.write("cases", obj(json!({"name": "Case A", "status": "open"})), None).await?;
        let before = created[0].clone();

        let updated = store
            .write("cases", obj(json!({"status": "closed", "createdAt": "2000-01-01T00:00:00Z"})), Some(before.id.clone()))
            .await?;
        assert_eq!(updated.len(), 1);
        let after = &updated[0];
        assert_eq!(after.id, before.id);
        assert_eq!(after.created_at, before.created_at);
        assert!(after.updated_at > before.updated_at);
        assert_eq!(after.fields["name"], "Case A");
        assert_eq!(after.fields["status"], "closed");
        Ok(())
    }

    #[tokio::test]
    async fn unmatched_id_creates_item_with_that_id() -> Result<(), anyhow::Error> {
        let (store, _) = store();
        let items = store.write("counsel", obj(json!({"name": "J. Doe"})), Some("counsel-7".into())).await?;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "counsel-7");
        assert_eq!(items[0].created_at, items[0].updated_at);
        Ok(())
    }

    #[tokio::test]
    async fn empty_id_is_treated_as_missing() -> Result<(), anyhow::Error> {
        let (store, _) = store();
        let items = store.write("cases", obj(json!({"name": "A"})), Some(String::new())).await?;
        assert!(Uuid::parse_str(&items[0].id).is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn delete_present_and_absent() -> Result<(), anyhow::Error> {
        let (store, _) = store();
        store.write("cases", obj(json!({"name": "A"})), Some("a".into())).await?;
        let both = store.write("cases", obj(json!({"name": "B"})), Some("b".into())).await?;
        assert_eq!(both.len(), 2);

        let remaining = store.delete("cases", "a").await?;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "b");

        let unchanged = store.delete("cases", "a").await?;
        assert_eq!(unchanged, remaining);
        Ok(())
    }

    #[tokio::test]
    async fn write_then_read_roundtrips() -> Result<(), anyhow::Error> {
        let (store, blobs) = store();
        store.write("transactions", obj(json!({"amount": 10, "kind": "fee"})), None).await?;
        let written = store.write("transactions", obj(json!({"amount": -3.5, "memo": null})), None).await?;
        let read = store.read("transactions").await?;
        assert_eq!(read, written);

        let raw = blobs.get_raw("/legal-case-data/transactions.json").await.expect("file");
        let text = String::from_utf8(raw)?;
        assert!(text.starts_with("[\n  {"), "pretty printed: {text}");
        Ok(())
    }

    #[tokio::test]
    async fn malformed_file_fails_closed() -> Result<(), anyhow::Error> {
        let (store, blobs) = store();
        blobs.put_raw("/legal-case-data/cases.json", b"{not json".to_vec()).await;
        assert!(matches!(store.read("cases").await, Err(ServiceError::Corrupt(_))));
        assert!(matches!(
            store.write("cases", obj(json!({"name": "A"})), None).await,
            Err(ServiceError::Corrupt(_))
        ));
        // untouched
        assert_eq!(blobs.get_raw("/legal-case-data/cases.json").await.unwrap(), b"{not json");

        let dup = json!([
            {"id": "x", "createdAt": "2024-01-01T00:00:00Z", "updatedAt": "2024-01-01T00:00:00Z"},
            {"id": "x", "createdAt": "2024-01-01T00:00:00Z", "updatedAt": "2024-01-01T00:00:00Z"}
        ]);
        blobs.put_raw("/legal-case-data/dups.json", serde_json::to_vec(&dup)?).await;
        assert!(matches!(store.read("dups").await, Err(ServiceError::Corrupt(_))));
        Ok(())
    }

    #[tokio::test]
    async fn loosely_typed_items_are_corrupt() -> Result<(), anyhow::Error> {
        let (store, blobs) = store();
        let naive = json!([{"id": "a", "createdAt": "2024-01-02T03:04:05", "updatedAt": "2024-01-02T03:04:05Z"}]);
        blobs.put_raw("/legal-case-data/naive.json", serde_json::to_vec(&naive)?).await;
        assert!(matches!(store.read("naive").await, Err(ServiceError::Corrupt(_))));

        let numeric = json!([{"id": 7, "createdAt": "2024-01-02T03:04:05Z", "updatedAt": "2024-01-02T03:04:05Z"}]);
        let raw = serde_json::to_vec(&numeric)?;
        blobs.put_raw("/legal-case-data/numeric.json", raw.clone()).await;
        assert!(matches!(
            store.write("numeric", obj(json!({"name": "B"})), None).await,
            Err(ServiceError::Corrupt(_))
        ));
        assert_eq!(blobs.get_raw("/legal-case-data/numeric.json").await.unwrap(), raw);
        Ok(())
    }

    #[tokio::test]
    async fn failed_upload_is_reported() -> Result<(), anyhow::Error> {
        let (store, blobs) = store();
        store.write("cases", obj(json!({"name": "A"})), Some("a".into())).await?;
        blobs.set_fail_uploads(true);

        let res = store.write("cases", obj(json!({"name": "B"})), None).await;
        assert!(matches!(res, Err(ServiceError::Unavailable(_))));
        let res = store.delete("cases", "a").await;
        assert!(matches!(res, Err(ServiceError::Unavailable(_))));

        blobs.set_fail_uploads(false);
        let items = store.read("cases").await?;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "a");
        Ok(())
    }

    #[tokio::test]
    async fn invalid_collection_name_is_validation_error() {
        let (store, _) = store();
        assert!(matches!(store.read("../etc").await, Err(ServiceError::Validation(_))));
        assert!(matches!(store.delete("", "x").await, Err(ServiceError::Validation(_))));
    }

    #[tokio::test]
    async fn concurrent_writes_in_one_process_keep_both_items() -> Result<(), anyhow::Error> {
        let blobs = Arc::new(MemoryBlobStore::with_latency(Duration::from_millis(20)));
        let store = CollectionStore::with_default_root(blobs);

        let (a, b) = tokio::join!(
            store.write("cases", obj(json!({"name": "A"})), None),
            store.write("cases", obj(json!({"name": "B"})), None),
        );
        a?;
        b?;
        let items = store.read("cases").await?;
        assert_eq!(items.len(), 2, "no lost update");
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_writes_across_instances_are_replayed() -> Result<(), anyhow::Error> {
        // Two stores sharing one backend behave like two server instances:
        // only the revision precondition stands between them.
        let blobs = Arc::new(MemoryBlobStore::with_latency(Duration::from_millis(20)));
        let first = CollectionStore::with_default_root(blobs.clone());
        let second = CollectionStore::with_default_root(blobs.clone());

        let (a, b) = tokio::join!(
            first.write("cases", obj(json!({"name": "A"})), None),
            second.write("cases", obj(json!({"name": "B"})), None),
        );
        a?;
        b?;
        let names: HashSet<String> = first
            .read("cases")
            .await?
            .into_iter()
            .filter_map(|item| item.fields.get("name").and_then(Value::as_str).map(str::to_string))
            .collect();
        assert_eq!(names, HashSet::from(["A".to_string(), "B".to_string()]));
        Ok(())
    }

    #[tokio::test]
    async fn conflict_retries_exhausted() -> Result<(), anyhow::Error> {
        let blobs = Arc::new(MemoryBlobStore::with_latency(Duration::from_millis(20)));
        let first = CollectionStore::with_default_root(blobs.clone()).with_max_conflict_retries(0);
        let second = CollectionStore::with_default_root(blobs.clone()).with_max_conflict_retries(0);

        let (a, b) = tokio::join!(
            first.write("cases", obj(json!({"name": "A"})), None),
            second.write("cases", obj(json!({"name": "B"})), None),
        );
        let conflicts = [&a, &b].iter().filter(|r| matches!(r, Err(ServiceError::Conflict(_)))).count();
        assert_eq!(conflicts, 1);
        assert_eq!(first.read("cases").await?.len(), 1);
        Ok(())
    }
}
