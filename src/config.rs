//! Configuration file parser for ~/.config/streamshelf/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are accepted but logged, since they are usually typos.
//! Credentials can also come from the environment, which wins over the file.
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::catalog::DEFAULT_BASE_URL;

/// Environment variable holding the catalog API key.
pub const ENV_CATALOG_KEY: &str = "STREAMSHELF_CATALOG_KEY";
/// Environment variable holding the hosted backend project URL.
pub const ENV_BACKEND_URL: &str = "STREAMSHELF_BACKEND_URL";
/// Environment variable holding the hosted backend anonymous key.
pub const ENV_ANON_KEY: &str = "STREAMSHELF_ANON_KEY";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Where user collections (favourites, history, playlists, profile) are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// The hosted backend-as-a-service, over its REST interface.
    Rest,
    /// A local SQLite file.
    Sqlite,
}

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// The Debug impl masks both keys.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the video catalog API.
    pub catalog_base_url: String,

    /// Catalog API key (alternative to STREAMSHELF_CATALOG_KEY).
    pub catalog_api_key: Option<SecretString>,

    /// Collection backend.
    pub backend: BackendKind,

    /// Project URL of the hosted backend; auth always goes through it.
    pub backend_url: Option<String>,

    /// Anonymous (public) key of the hosted backend.
    pub anon_key: Option<SecretString>,

    /// SQLite file for `backend = "sqlite"`. Defaults to the config directory.
    pub sqlite_path: Option<PathBuf>,

    /// Per-request timeout for every remote call, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            catalog_base_url: DEFAULT_BASE_URL.to_string(),
            catalog_api_key: None,
            backend: BackendKind::Rest,
            backend_url: None,
            anon_key: None,
            sqlite_path: None,
            request_timeout_secs: 20,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("catalog_base_url", &self.catalog_base_url)
            .field(
                "catalog_api_key",
                &self.catalog_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("backend", &self.backend)
            .field("backend_url", &self.backend_url)
            .field("anon_key", &self.anon_key.as_ref().map(|_| "[REDACTED]"))
            .field("sqlite_path", &self.sqlite_path)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 7] = [
        "catalog_base_url",
        "catalog_api_key",
        "backend",
        "backend_url",
        "anon_key",
        "sqlite_path",
        "request_timeout_secs",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            backend = ?config.backend,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Apply environment overrides from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`; non-empty values take precedence over
    /// the file.
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(key) = get(ENV_CATALOG_KEY) {
            self.catalog_api_key = Some(SecretString::from(key));
        }
        if let Some(url) = get(ENV_BACKEND_URL) {
            self.backend_url = Some(url);
        }
        if let Some(key) = get(ENV_ANON_KEY) {
            self.anon_key = Some(SecretString::from(key));
        }
        self
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

// ============================================================================
// Tests
// ============================================================================
