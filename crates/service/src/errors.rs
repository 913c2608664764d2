use thiserror::Error;

use crate::storage::StoreError;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("unsupported action: {0}")]
    UnsupportedAction(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("collection is corrupt: {0}")]
    Corrupt(String),
    #[error("write conflict: {0}")]
    Conflict(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn validation(msg: impl Into<String>) -> Self { Self::Validation(msg.into()) }

    /// Stable numeric code for external mapping/logging
    pub fn code(&self) -> u16 {
        match self {
            ServiceError::Validation(_) => 1001,
            ServiceError::UnsupportedAction(_) => 1002,
            ServiceError::Unavailable(_) => 1101,
            ServiceError::Corrupt(_) => 1102,
            ServiceError::Conflict(_) => 1103,
            ServiceError::Internal(_) => 1200,
        }
    }

    /// Stable string form of the error class, used in response bodies and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "validation",
            ServiceError::UnsupportedAction(_) => "unsupported_action",
            ServiceError::Unavailable(_) => "store_unavailable",
            ServiceError::Corrupt(_) => "store_corrupt",
            ServiceError::Conflict(_) => "conflict",
            ServiceError::Internal(_) => "internal",
        }
    }

    /// True when the request itself was wrong; retrying it unchanged cannot succeed.
    pub fn is_caller_error(&self) -> bool {
        matches!(self, ServiceError::Validation(_) | ServiceError::UnsupportedAction(_))
    }
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(_) | StoreError::Transient(_) => Self::Unavailable(e.to_string()),
            StoreError::Conflict { .. } => Self::Conflict(e.to_string()),
            StoreError::Config(msg) => Self::Internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_service_kinds() {
        let e: ServiceError = StoreError::Transient("timeout".into()).into();
        assert_eq!(e.kind(), "store_unavailable");
        let e: ServiceError = StoreError::Conflict { path: "/x.json".into() }.into();
        assert_eq!(e.code(), 1103);
        assert!(!e.is_caller_error());
        assert!(ServiceError::UnsupportedAction("list".into()).is_caller_error());
    }
}
