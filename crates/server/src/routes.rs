use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use common::types::Health;
use service::collection::{CollectionStore, Item};
use service::router::{Action, ErrorPayload, RequestRouter};

use crate::errors::ApiError;
use crate::observability;

#[derive(Clone)]
pub struct AppState {
    pub router: RequestRouter,
}

impl AppState {
    pub fn new(store: CollectionStore) -> Self {
        Self { router: RequestRouter::new(Arc::new(store)) }
    }
}

pub async fn health() -> Json<Health> {
    Json(Health::ok())
}

async fn metrics() -> (StatusCode, String) {
    observability::encode_metrics()
}

/// `POST /database`: `{action, collection, data?, id?}` in, full collection out.
async fn database(State(state): State<AppState>, body: Bytes) -> Result<Json<Vec<Item>>, ApiError> {
    let started = Instant::now();
    let handled = state.router.handle_body(&body).await;
    // unparsable bodies and unknown actions share one label to keep cardinality bounded
    let label = handled.action.map(Action::as_str).unwrap_or("invalid");
    observability::REQUESTS_TOTAL.with_label_values(&[label]).inc();
    observability::REQUEST_DURATION
        .with_label_values(&[label])
        .observe(started.elapsed().as_secs_f64());
    Ok(Json(handled.result?))
}

/// Any other method on `/database` still gets the `{error, code, data: []}` body.
async fn database_method_not_allowed(method: Method) -> Response {
    observability::FAILURES_TOTAL.with_label_values(&["method_not_allowed"]).inc();
    let payload = ErrorPayload {
        error: format!("method {method} is not allowed, use POST"),
        code: "method_not_allowed",
        data: Vec::new(),
    };
    (StatusCode::METHOD_NOT_ALLOWED, [(header::ALLOW, "POST")], Json(payload)).into_response()
}

/// Build the full application router
pub fn build_router(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/database", post(database).fallback(database_method_not_allowed))
        .with_state(state)
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO).include_headers(false))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO).include_headers(false))
                // 5xx 以 ERROR 记录
                .on_failure(DefaultOnFailure::new().level(Level::ERROR)),
        )
}
