use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Keys the store owns; caller data never overrides them.
pub const RESERVED_FIELDS: [&str; 3] = ["id", "createdAt", "updatedAt"];

/// One record of a collection: caller fields plus the store-managed
/// `id`/`createdAt`/`updatedAt`.
///
/// Serializes flat, caller fields first, matching the stored file layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Item {
    pub fn new(id: String, data: Map<String, Value>, now: DateTime<Utc>) -> Self {
        Self { fields: without_reserved(data), id, created_at: now, updated_at: now }
    }

    /// Shallow merge of `patch` over the current fields; refreshes `updatedAt`.
    pub fn merge(&mut self, patch: Map<String, Value>, now: DateTime<Utc>) {
        for (key, value) in without_reserved(patch) {
            self.fields.insert(key, value);
        }
        self.updated_at = advance(self.updated_at, now);
    }
}

/// Drop reserved keys from caller-supplied data.
pub fn without_reserved(mut data: Map<String, Value>) -> Map<String, Value> {
    for key in RESERVED_FIELDS {
        data.shift_remove(key);
    }
    data
}

// updatedAt must move forward even if the clock did not.
fn advance(previous: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    if now > previous {
        now
    } else {
        previous + Duration::microseconds(1)
    }
}
