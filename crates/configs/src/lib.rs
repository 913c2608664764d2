use std::time::Duration;

use anyhow::anyhow;
use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub worker_threads: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "127.0.0.1".into(), port: 8080, worker_threads: Some(4) }
    }
}

/// Which blob backend holds the collection files.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Dropbox,
    Local,
    Memory,
}

impl std::str::FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dropbox" => Ok(Self::Dropbox),
            "local" => Ok(Self::Local),
            "memory" => Ok(Self::Memory),
            other => Err(anyhow!("unknown storage backend `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_root")]
    pub root: String,
    #[serde(default = "default_local_dir")]
    pub local_dir: String,
    #[serde(default = "default_max_conflict_retries")]
    pub max_conflict_retries: u32,
    #[serde(default)]
    pub dropbox: DropboxConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            root: default_root(),
            local_dir: default_local_dir(),
            max_conflict_retries: default_max_conflict_retries(),
            dropbox: DropboxConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DropboxConfig {
    #[serde(default = "default_content_url")]
    pub content_url: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for DropboxConfig {
    fn default() -> Self {
        Self {
            content_url: default_content_url(),
            access_token: String::new(),
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base(),
            backoff_max_ms: default_backoff_max(),
        }
    }
}

fn default_root() -> String { "/legal-case-data".into() }
fn default_local_dir() -> String { "data".into() }
fn default_max_conflict_retries() -> u32 { 5 }
fn default_content_url() -> String { "https://content.dropboxapi.com".into() }
fn default_connect_timeout() -> u64 { 5 }
fn default_request_timeout() -> u64 { 30 }
fn default_true() -> bool { true }
fn default_max_attempts() -> u32 { 3 }
fn default_backoff_base() -> u64 { 100 }
fn default_backoff_max() -> u64 { 2000 }

/// `CONFIG_PATH`, or `config.toml` in the working directory.
pub fn default_path() -> String {
    std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string())
}

pub fn load_from_file(path: &str) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    parse(&content)
}

pub fn parse(content: &str) -> Result<AppConfig> {
    let cfg: AppConfig = toml::from_str(content)?;
    Ok(cfg)
}

impl AppConfig {
    /// Load `config.toml` (or `CONFIG_PATH`), falling back to environment
    /// variables when no file is present, then normalize and validate.
    pub fn load_and_validate() -> Result<Self> {
        let path = default_path();
        let mut cfg = if std::path::Path::new(&path).exists() {
            load_from_file(&path)?
        } else {
            Self::from_env()?
        };
        cfg.normalize_and_validate()?;
        Ok(cfg)
    }

    /// Build a config purely from `SERVER_HOST`, `SERVER_PORT`, `STORAGE_BACKEND`,
    /// `STORAGE_ROOT` and `DROPBOX_ACCESS_TOKEN`.
    pub fn from_env() -> Result<Self> {
        let mut cfg = AppConfig::default();
        if let Ok(host) = std::env::var("SERVER_HOST") {
            cfg.server.host = host;
        }
        if let Some(port) = std::env::var("SERVER_PORT").ok().and_then(|p| p.parse::<u16>().ok()) {
            cfg.server.port = port;
        }
        if let Ok(backend) = std::env::var("STORAGE_BACKEND") {
            cfg.storage.backend = backend.parse()?;
        }
        if let Ok(root) = std::env::var("STORAGE_ROOT") {
            cfg.storage.root = root;
        }
        Ok(cfg)
    }

    pub fn normalize_and_validate(&mut self) -> Result<()> {
        self.server.normalize()?;
        // token 可以只放在环境变量里，不写进 TOML
        self.storage.dropbox.normalize_from_env();
        self.storage.normalize();
        self.storage.validate()?;
        Ok(())
    }
}

impl ServerConfig {
    fn normalize(&mut self) -> Result<()> {
        if self.host.trim().is_empty() {
            self.host = "127.0.0.1".to_string();
        }
        if self.port == 0 {
            return Err(anyhow!("server.port must be within 1..=65535"));
        }
        match self.worker_threads {
            Some(w) if w > 0 => {}
            _ => self.worker_threads = Some(4),
        }
        Ok(())
    }
}

impl StorageConfig {
    fn normalize(&mut self) {
        let trimmed = self.root.trim().trim_end_matches('/');
        self.root = if trimmed.starts_with('/') { trimmed.to_string() } else { format!("/{trimmed}") };
    }

    pub fn validate(&self) -> Result<()> {
        if self.root == "/" {
            return Err(anyhow!("storage.root must name a folder, not the store root"));
        }
        if self.backend == StorageBackend::Dropbox && self.dropbox.access_token.trim().is_empty() {
            return Err(anyhow!(
                "storage.dropbox.access_token is empty; set it in config.toml or DROPBOX_ACCESS_TOKEN"
            ));
        }
        if self.backend == StorageBackend::Local && self.local_dir.trim().is_empty() {
            return Err(anyhow!("storage.local_dir must not be empty for the local backend"));
        }
        if self.retry.max_attempts == 0 {
            return Err(anyhow!("storage.retry.max_attempts must be >= 1"));
        }
        if self.dropbox.connect_timeout_secs == 0 || self.dropbox.request_timeout_secs == 0 {
            return Err(anyhow!("storage.dropbox timeouts must be positive seconds"));
        }
        Ok(())
    }
}

impl DropboxConfig {
    pub fn normalize_from_env(&mut self) {
        if self.access_token.trim().is_empty() {
            if let Ok(token) = std::env::var("DROPBOX_ACCESS_TOKEN") {
                self.access_token = token;
            }
        }
        let trimmed = self.content_url.trim_end_matches('/').to_string();
        self.content_url = trimmed;
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl RetryConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}
