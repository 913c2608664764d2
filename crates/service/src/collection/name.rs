use std::fmt;

use crate::errors::ServiceError;

const MAX_LEN: usize = 128;

/// Validated collection name: 1..=128 chars of `[A-Za-z0-9_-]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionName(String);

impl CollectionName {
    pub fn parse(raw: &str) -> Result<Self, ServiceError> {
        let name = raw.trim();
        if name.is_empty() {
            return Err(ServiceError::validation("collection name is required"));
        }
        if name.len() > MAX_LEN {
            return Err(ServiceError::validation(format!("collection name longer than {MAX_LEN} characters")));
        }
        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return Err(ServiceError::validation(format!(
                "collection name `{name}` may only contain letters, digits, '_' and '-'"
            )));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Backing blob path: `<root>/<name>.json`.
    pub fn file_path(&self, root: &str) -> String {
        format!("{}/{}.json", root.trim_end_matches('/'), self.0)
    }
}

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
