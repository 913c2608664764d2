use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use service::errors::ServiceError;
use service::router::ErrorPayload;
use tracing::{error, warn};

use crate::observability;

/// HTTP face of a [`ServiceError`]. The body is always `{error, code, data: []}`.
#[derive(Debug)]
pub struct ApiError(pub ServiceError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            ServiceError::Validation(_) | ServiceError::UnsupportedAction(_) => StatusCode::BAD_REQUEST,
            ServiceError::Conflict(_) => StatusCode::CONFLICT,
            ServiceError::Unavailable(_) => StatusCode::BAD_GATEWAY,
            ServiceError::Corrupt(_) | ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let err = &self.0;
        observability::FAILURES_TOTAL.with_label_values(&[err.kind()]).inc();
        if err.is_caller_error() {
            warn!(code = err.code(), kind = err.kind(), error = %err, "rejected request");
        } else {
            error!(code = err.code(), kind = err.kind(), error = %err, "request failed");
        }
        (status, Json(ErrorPayload::from(err))).into_response()
    }
}
