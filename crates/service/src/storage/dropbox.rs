//! Dropbox content API client.
//!
//! Only the two whole-file endpoints are used: `files/download` and
//! `files/upload`. Upload preconditions map onto Dropbox write modes
//! (`overwrite`, `add`, `update` with a rev).

use async_trait::async_trait;
use configs::DropboxConfig;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::retry::{retry_with_policy, RetryPolicy};
use super::{Blob, BlobStore, Revision, StoreError, WriteMode};

const API_ARG_HEADER: &str = "Dropbox-API-Arg";
const API_RESULT_HEADER: &str = "dropbox-api-result";

#[derive(Debug, Deserialize)]
struct FileMetadata {
    rev: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error_summary: String,
}

pub struct DropboxBlobStore {
    client: Client,
    content_url: String,
    access_token: String,
    retry: RetryPolicy,
}

impl DropboxBlobStore {
    pub fn new(cfg: &DropboxConfig, retry: RetryPolicy) -> Result<Self, StoreError> {
        if cfg.access_token.trim().is_empty() {
            return Err(StoreError::Config("dropbox access token is empty".into()));
        }
        let client = Client::builder()
            .connect_timeout(cfg.connect_timeout())
            .timeout(cfg.request_timeout())
            .build()
            .map_err(|e| StoreError::Config(format!("http client: {e}")))?;
        Ok(Self {
            client,
            content_url: cfg.content_url.trim_end_matches('/').to_string(),
            access_token: cfg.access_token.clone(),
            retry,
        })
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}/2/files/{name}", self.content_url)
    }

    async fn download_once(&self, path: &str) -> Result<Option<Blob>, StoreError> {
        let resp = self
            .client
            .post(self.endpoint("download"))
            .bearer_auth(&self.access_token)
            .header(API_ARG_HEADER, json!({ "path": path }).to_string())
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if status.is_success() {
            let rev = resp
                .headers()
                .get(API_RESULT_HEADER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| serde_json::from_str::<FileMetadata>(s).ok())
                .map(|m| m.rev)
                .ok_or_else(|| StoreError::Unavailable(format!("download {path}: missing {API_RESULT_HEADER} header")))?;
            let bytes = resp.bytes().await.map_err(transport_error)?;
            debug!(path, bytes = bytes.len(), rev = %rev, "dropbox download");
            return Ok(Some(Blob { bytes: bytes.to_vec(), revision: Revision::new(rev) }));
        }

        let body = resp.text().await.unwrap_or_default();
        if status == StatusCode::CONFLICT {
            let summary = error_summary(&body);
            if summary.starts_with("path/not_found") {
                debug!(path, "dropbox file not found");
                return Ok(None);
            }
            return Err(StoreError::Unavailable(format!("download {path}: {summary}")));
        }
        Err(status_error(status, &body, "download", path))
    }

    async fn upload_once(&self, path: &str, bytes: &[u8], mode: &WriteMode) -> Result<Revision, StoreError> {
        let arg = json!({
            "path": path,
            "mode": mode_arg(mode),
            "autorename": false,
            "mute": true,
        });
        let resp = self
            .client
            .post(self.endpoint("upload"))
            .bearer_auth(&self.access_token)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(API_ARG_HEADER, arg.to_string())
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if status.is_success() {
            let meta: FileMetadata = resp
                .json()
                .await
                .map_err(|e| StoreError::Unavailable(format!("upload {path}: unreadable metadata: {e}")))?;
            debug!(path, bytes = bytes.len(), rev = %meta.rev, "dropbox upload");
            return Ok(Revision::new(meta.rev));
        }

        let body = resp.text().await.unwrap_or_default();
        if status == StatusCode::CONFLICT {
            let summary = error_summary(&body);
            if summary.contains("conflict") {
                return Err(StoreError::Conflict { path: path.to_string() });
            }
            return Err(StoreError::Unavailable(format!("upload {path}: {summary}")));
        }
        Err(status_error(status, &body, "upload", path))
    }
}

#[async_trait]
impl BlobStore for DropboxBlobStore {
    fn backend(&self) -> &'static str {
        "dropbox"
    }

    async fn download(&self, path: &str) -> Result<Option<Blob>, StoreError> {
        retry_with_policy(&self.retry, "dropbox.download", || self.download_once(path)).await
    }

    async fn upload(&self, path: &str, bytes: Vec<u8>, mode: WriteMode) -> Result<Revision, StoreError> {
        retry_with_policy(&self.retry, "dropbox.upload", || self.upload_once(path, &bytes, &mode)).await
    }
}

fn mode_arg(mode: &WriteMode) -> Value {
    match mode {
        WriteMode::Overwrite => json!("overwrite"),
        WriteMode::Add => json!("add"),
        WriteMode::Update(rev) => json!({ ".tag": "update", "update": rev.as_str() }),
    }
}

fn error_summary(body: &str) -> String {
    serde_json::from_str::<ApiErrorBody>(body)
        .map(|b| b.error_summary)
        .unwrap_or_else(|_| body.trim().to_string())
}

fn transport_error(e: reqwest::Error) -> StoreError {
    if e.is_timeout() || e.is_connect() || e.is_body() {
        StoreError::Transient(e.to_string())
    } else {
        StoreError::Unavailable(e.to_string())
    }
}

fn status_error(status: StatusCode, body: &str, op: &str, path: &str) -> StoreError {
    let summary = error_summary(body);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            StoreError::Unavailable(format!("{op} {path}: authorization rejected ({status}): {summary}"))
        }
        StatusCode::TOO_MANY_REQUESTS => StoreError::Transient(format!("{op} {path}: rate limited: {summary}")),
        s if s.is_server_error() => StoreError::Transient(format!("{op} {path}: {status}: {summary}")),
        _ => StoreError::Unavailable(format!("{op} {path}: {status}: {summary}")),
    }
}
