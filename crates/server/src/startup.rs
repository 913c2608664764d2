use std::net::SocketAddr;

use anyhow::Context;
use axum::Router;
use configs::{AppConfig, ServerConfig, StorageBackend};
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::routes::{self, AppState};
use service::collection::CollectionStore;

// The browser app calls the store cross-origin.
fn build_cors() -> CorsLayer {
    CorsLayer::very_permissive()
}

fn bind_addr(server: &ServerConfig) -> anyhow::Result<SocketAddr> {
    Ok(format!("{}:{}", server.host, server.port).parse()?)
}

/// Build the application for an already validated config.
pub async fn build_app(cfg: &AppConfig) -> anyhow::Result<Router> {
    if cfg.storage.backend == StorageBackend::Local {
        common::env::ensure_dir(&cfg.storage.local_dir).await?;
    }
    let store = CollectionStore::from_config(&cfg.storage).context("invalid storage configuration")?;
    Ok(routes::build_router(AppState::new(store), build_cors()))
}

/// Public entry: build the app and run the HTTP server
pub async fn run(cfg: AppConfig) -> anyhow::Result<()> {
    let app = build_app(&cfg).await?;

    let addr = bind_addr(&cfg.server)?;
    info!(%addr, backend = ?cfg.storage.backend, root = %cfg.storage.root, "starting case store server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
