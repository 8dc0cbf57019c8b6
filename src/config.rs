//! Centralized configuration for the QuiverMarks server.
//!
//! Sources, lowest to highest precedence:
//! - defaults (ServerConfig::default)
//! - JSON config file (ServerConfig::apply_file), `.json` only
//! - environment QM_* (ServerConfig::apply_env)
//! - CLI flags (applied by cli.rs through the with_* setters)
//!
//! validate() runs before the Store or the scheduler is constructed.
//! Durations are strings: "500ms", "1s", "5m", "1m30s".

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::util::{format_duration, parse_duration};

pub const LOG_LEVELS: &[&str] = &["debug", "info", "warn", "error"];

#[derive(Clone, Debug, PartialEq)]
pub struct ServerConfig {
    /// Env: QM_HOST (default "localhost")
    pub host: String,

    /// Env: QM_PORT (default "8080"). "0" picks a free port.
    pub port: String,

    /// Backing file for snapshots.
    /// Env: QM_STORE_FILE (default "./data/bookmarks.json")
    pub store_file: PathBuf,

    /// Basic-auth password; None disables auth.
    /// Env: QM_AUTH_PASSWORD
    pub auth_password: Option<String>,

    /// debug | info | warn | error. RUST_LOG still wins when set.
    /// Env: QM_LOG_LEVEL (default "info")
    pub log_level: String,

    /// One JSON object per log line.
    /// Env: QM_LOG_JSON = 0|1|true|false (default false)
    pub log_json: bool,

    /// Period of the background snapshot; must be > 0.
    /// Env: QM_SNAPSHOT_INTERVAL (default "1s")
    pub snapshot_interval: Duration,

    /// Drain window for in-flight requests on shutdown.
    /// Env: QM_SHUTDOWN_TIMEOUT (default "30s")
    pub shutdown_timeout: Duration,

    /// HTTP worker threads.
    /// Env: QM_WORKERS (default 8)
    pub workers: usize,

    /// CORS origins; ["*"] allows any.
    /// Env: QM_CORS_ORIGINS = "https://a.example,https://b.example"
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: "8080".to_string(),
            store_file: PathBuf::from("./data/bookmarks.json"),
            auth_password: None,
            log_level: "info".to_string(),
            log_json: false,
            snapshot_interval: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(30),
            workers: 8,
            cors_origins: vec!["*".to_string()],
        }
    }
}

/// Shape of the JSON config file; every key optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    host: Option<String>,
    port: Option<String>,
    store_file: Option<PathBuf>,
    auth_password: Option<String>,
    log_level: Option<String>,
    log_json: Option<bool>,
    snapshot_interval: Option<String>,
    shutdown_timeout: Option<String>,
    workers: Option<usize>,
    cors_origins: Option<Vec<String>>,
}

fn parse_bool(v: &str) -> bool {
    let s = v.trim().to_ascii_lowercase();
    s == "1" || s == "true" || s == "yes" || s == "on"
}

impl ServerConfig {
    /// Defaults overlaid with QM_* environment variables.
    pub fn from_env() -> Result<Self> {
        Self::default().apply_env()
    }

    /// Overlay QM_* environment variables onto `self`.
    pub fn apply_env(self) -> Result<Self> {
        self.apply_vars(|k| std::env::var(k).ok())
    }

    /// Same as apply_env, but with an explicit variable source (tests use this).
    pub fn apply_vars<F>(mut self, get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |k: &str| get(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = non_empty("QM_HOST") {
            self.host = v;
        }
        if let Some(v) = non_empty("QM_PORT") {
            self.port = v;
        }
        if let Some(v) = non_empty("QM_STORE_FILE") {
            self.store_file = PathBuf::from(v);
        }
        if let Some(v) = non_empty("QM_AUTH_PASSWORD") {
            self.auth_password = Some(v);
        }
        if let Some(v) = non_empty("QM_LOG_LEVEL") {
            self.log_level = v.to_ascii_lowercase();
        }
        if let Some(v) = non_empty("QM_LOG_JSON") {
            self.log_json = parse_bool(&v);
        }
        if let Some(v) = non_empty("QM_SNAPSHOT_INTERVAL") {
            self.snapshot_interval =
                parse_duration(&v).map_err(|e| anyhow!("QM_SNAPSHOT_INTERVAL: {}", e))?;
        }
        if let Some(v) = non_empty("QM_SHUTDOWN_TIMEOUT") {
            self.shutdown_timeout =
                parse_duration(&v).map_err(|e| anyhow!("QM_SHUTDOWN_TIMEOUT: {}", e))?;
        }
        if let Some(v) = non_empty("QM_WORKERS") {
            self.workers = v
                .parse::<usize>()
                .with_context(|| format!("QM_WORKERS: bad number {:?}", v))?;
        }
        if let Some(v) = non_empty("QM_CORS_ORIGINS") {
            self.cors_origins = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        Ok(self)
    }

    /// Overlay the keys present in a JSON config file.
    pub fn apply_file(mut self, path: &Path) -> Result<Self> {
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            bail!(
                "unsupported config file format: {} (use .json)",
                path.display()
            );
        }
        let bytes =
            std::fs::read(path).with_context(|| format!("read config {}", path.display()))?;
        let fc: FileConfig = serde_json::from_slice(&bytes)
            .with_context(|| format!("parse config {}", path.display()))?;

        if let Some(v) = fc.host {
            self.host = v;
        }
        if let Some(v) = fc.port {
            self.port = v;
        }
        if let Some(v) = fc.store_file {
            self.store_file = v;
        }
        if let Some(v) = fc.auth_password {
            self.auth_password = Some(v).filter(|p| !p.is_empty());
        }
        if let Some(v) = fc.log_level {
            self.log_level = v.to_ascii_lowercase();
        }
        if let Some(v) = fc.log_json {
            self.log_json = v;
        }
        if let Some(v) = fc.snapshot_interval {
            self.snapshot_interval =
                parse_duration(&v).map_err(|e| anyhow!("snapshot_interval: {}", e))?;
        }
        if let Some(v) = fc.shutdown_timeout {
            self.shutdown_timeout =
                parse_duration(&v).map_err(|e| anyhow!("shutdown_timeout: {}", e))?;
        }
        if let Some(v) = fc.workers {
            self.workers = v;
        }
        if let Some(v) = fc.cors_origins {
            self.cors_origins = v;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            bail!("host cannot be empty");
        }
        if self.port.trim().is_empty() {
            bail!("port cannot be empty");
        }
        self.port
            .trim()
            .parse::<u16>()
            .map_err(|_| anyhow!("invalid port: {:?}", self.port))?;
        if self.store_file.as_os_str().is_empty() {
            bail!("store file name cannot be empty");
        }
        if self.snapshot_interval.is_zero() {
            bail!("snapshot interval must be positive");
        }
        if self.shutdown_timeout.is_zero() {
            bail!("shutdown timeout must be positive");
        }
        if self.workers == 0 {
            bail!("workers must be at least 1");
        }
        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            bail!(
                "invalid log level: {} (must be debug, info, warn, or error)",
                self.log_level
            );
        }
        Ok(())
    }

    /// "host:port" for binding.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host.trim(), self.port.trim())
    }

    pub fn auth_enabled(&self) -> bool {
        self.auth_password.as_deref().is_some_and(|p| !p.is_empty())
    }

    /// Fluent setters (builder-style) to override specific fields.

    pub fn with_host<S: Into<String>>(mut self, host: S) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port<S: Into<String>>(mut self, port: S) -> Self {
        self.port = port.into();
        self
    }

    pub fn with_store_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.store_file = path.into();
        self
    }

    pub fn with_auth_password<S: Into<String>>(mut self, password: Option<S>) -> Self {
        self.auth_password = password.map(Into::into).filter(|p| !p.is_empty());
        self
    }

    pub fn with_log_level<S: Into<String>>(mut self, level: S) -> Self {
        self.log_level = level.into().to_ascii_lowercase();
        self
    }

    pub fn with_log_json(mut self, on: bool) -> Self {
        self.log_json = on;
        self
    }

    pub fn with_snapshot_interval(mut self, d: Duration) -> Self {
        self.snapshot_interval = d;
        self
    }

    pub fn with_shutdown_timeout(mut self, d: Duration) -> Self {
        self.shutdown_timeout = d;
        self
    }

    pub fn with_workers(mut self, n: usize) -> Self {
        self.workers = n;
        self
    }

    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = origins;
        self
    }
}

impl fmt::Display for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ServerConfig {{ \
             addr: {}, \
             store_file: {}, \
             auth: {}, \
             log_level: {}, \
             log_json: {}, \
             snapshot_interval: {}, \
             shutdown_timeout: {}, \
             workers: {}, \
             cors_origins: [{}] \
             }}",
            self.addr(),
            self.store_file.display(),
            if self.auth_enabled() { "enabled(***)" } else { "disabled" },
            self.log_level,
            self.log_json,
            format_duration(self.snapshot_interval),
            format_duration(self.shutdown_timeout),
            self.workers,
            self.cors_origins.join(", "),
        )
    }
}
