//! TOML configuration for the ingestion backend.
//!
//! Layered: an explicit path, else the `SENTINEL_CONFIG` environment variable,
//! else `/etc/sentinel/sentinel.toml`, else compiled-in defaults. Upstream
//! credentials can then be overridden from the environment so the secret
//! never has to live in the file.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::normalize::IdFallback;

const SYSTEM_CONFIG_PATH: &str = "/etc/sentinel/sentinel.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Resolve the config file, apply environment overrides and validate.
    ///
    /// An explicitly requested file must load; the environment and system
    /// locations fall through to defaults. Fallback warnings are returned
    /// rather than logged, since tracing is configured from the result.
    pub fn resolve(explicit: Option<&Path>) -> Result<(Self, Vec<String>)> {
        let (mut config, warnings) = match explicit {
            Some(path) => (Self::load(path)?, Vec::new()),
            None => Self::load_or_default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok((config, warnings))
    }

    pub fn load_or_default() -> (Self, Vec<String>) {
        Self::load_or_default_from(
            std::env::var("SENTINEL_CONFIG").ok().as_deref(),
            Path::new(SYSTEM_CONFIG_PATH),
        )
    }

    fn load_or_default_from(env_path: Option<&str>, system_path: &Path) -> (Self, Vec<String>) {
        let mut warnings = Vec::new();

        if let Some(env_path) = env_path {
            let path = Path::new(env_path);
            match Self::load(path) {
                Ok(cfg) => return (cfg, warnings),
                Err(e) => warnings.push(format!(
                    "SENTINEL_CONFIG set but {} could not be loaded, trying fallback: {e:#}",
                    path.display()
                )),
            }
        }

        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return (cfg, warnings),
                Err(e) => warnings.push(format!(
                    "system config {} could not be loaded, using defaults: {e:#}",
                    system_path.display()
                )),
            }
        }

        debug!("no config file found, using compiled-in defaults");
        (Self::default(), warnings)
    }

    /// Apply `CROWDSEC_API_URL`, `CROWDSEC_LOGIN` and `CROWDSEC_PASSWORD`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_empty("CROWDSEC_API_URL") {
            self.upstream.base_url = url;
        }
        if let Some(login) = non_empty("CROWDSEC_LOGIN") {
            self.upstream.machine_id = login;
        }
        if let Some(password) = non_empty("CROWDSEC_PASSWORD") {
            self.upstream.password = password;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.sync.interval_secs == 0 {
            bail!("sync.interval_secs must be greater than zero");
        }
        if self.upstream.timeout_secs == 0 {
            bail!("upstream.timeout_secs must be greater than zero");
        }
        let url = self.upstream.base_url.as_str();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            bail!("upstream.base_url must be an http(s) URL, got '{url}'");
        }
        if self.storage.db_path.trim().is_empty() {
            bail!("storage.db_path must not be empty");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Upstream
// ---------------------------------------------------------------------------

/// Agent API endpoint and watcher credentials.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub machine_id: String,
    pub password: String,
    /// Per-request timeout for login and alert listing.
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            machine_id: "backend".to_string(),
            password: String::new(),
            timeout_secs: 10,
        }
    }
}

impl fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("base_url", &self.base_url)
            .field("machine_id", &self.machine_id)
            .field("password", &"<redacted>")
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Sync
// ---------------------------------------------------------------------------

/// Pull-mode polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub id_fallback: IdFallback,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 10,
            id_fallback: IdFallback::Random,
        }
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

// ---------------------------------------------------------------------------
// Storage / server / logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: "data/sentinel.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Text,
    Json,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
