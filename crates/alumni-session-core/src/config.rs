//! Session configuration management.
//!
//! This module handles loading the client configuration: where the auth
//! service lives, how long accepted tokens stay valid, how often they are
//! refreshed, and which backend persists the session.
//!
//! Configuration is stored at `~/.config/alumni-session/config.json`; every
//! field is optional and environment variables override the file.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::AUTH_KEY;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "alumni-session";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Accepted access tokens are treated as valid for one hour.
const DEFAULT_VALIDITY_WINDOW_SECS: u64 = 60 * 60;

/// Refresh five minutes before the validity window closes.
const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 55 * 60;

const DEFAULT_API_BASE_URL: &str = "http://localhost:5000";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;

pub const ENV_API_URL: &str = "ALUMNI_API_URL";
pub const ENV_STORE: &str = "ALUMNI_SESSION_STORE";
pub const ENV_JWT_SECRET: &str = "ALUMNI_JWT_SECRET";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("refresh interval must be greater than zero")]
    ZeroRefreshInterval,

    #[error("refresh interval ({refresh}s) must be shorter than the validity window ({window}s)")]
    RefreshNotBeforeExpiry { refresh: u64, window: u64 },

    #[error("storage key must not be empty")]
    EmptyStorageKey,

    #[error("unknown store backend: {0}")]
    UnknownStore(String),
}

/// Where the session bundle is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    File,
    #[serde(alias = "keyring")]
    Keychain,
}

impl std::str::FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(StoreBackend::File),
            "keychain" | "keyring" => Ok(StoreBackend::Keychain),
            other => Err(ConfigError::UnknownStore(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    pub api_base_url: String,
    pub validity_window_secs: u64,
    pub refresh_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub poll_interval_secs: u64,
    pub storage_key: String,
    pub store: StoreBackend,
    /// Shared secret for verifying handshake tokens; server-side only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwt_secret: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            validity_window_secs: DEFAULT_VALIDITY_WINDOW_SECS,
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            storage_key: AUTH_KEY.to_string(),
            store: StoreBackend::File,
            jwt_secret: None,
        }
    }
}

impl SessionConfig {
    /// Load the config file (defaults if absent) and apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_API_URL).filter(|v| !v.trim().is_empty()) {
            self.api_base_url = url.trim().to_string();
        }
        if let Some(store) = lookup(ENV_STORE).filter(|v| !v.trim().is_empty()) {
            self.store = store.parse()?;
        }
        if let Some(secret) = lookup(ENV_JWT_SECRET).filter(|v| !v.is_empty()) {
            self.jwt_secret = Some(secret);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.refresh_interval_secs == 0 {
            return Err(ConfigError::ZeroRefreshInterval);
        }
        if self.refresh_interval_secs >= self.validity_window_secs {
            return Err(ConfigError::RefreshNotBeforeExpiry {
                refresh: self.refresh_interval_secs,
                window: self.validity_window_secs,
            });
        }
        if self.storage_key.trim().is_empty() {
            return Err(ConfigError::EmptyStorageKey);
        }
        Ok(())
    }

    pub fn validity_window(&self) -> Duration {
        Duration::from_secs(self.validity_window_secs)
    }

    pub fn validity_window_millis(&self) -> i64 {
        i64::try_from(self.validity_window_secs.saturating_mul(1000)).unwrap_or(i64::MAX)
    }

    /// Never zero, even for a config that skipped `validate()`.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory holding the file-backed session store.
    pub fn storage_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }
}
