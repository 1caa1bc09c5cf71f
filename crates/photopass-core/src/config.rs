//! Application configuration management.
//!
//! This module handles loading and saving the client configuration: backend
//! base URL, endpoint paths, timeouts, the session storage backend and the
//! last email used to sign in.
//!
//! Configuration is stored at `~/.config/photopass/config.json`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::storage::{FileStore, KeyringStore, MemoryStore, SessionStore};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "photopass";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding `api_base_url`
pub const API_URL_ENV: &str = "PHOTOPASS_API_URL";

const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Refresh exchange timeout in seconds. Shorter than the request timeout so
/// queued requests are released before their own timeouts fire.
const DEFAULT_REFRESH_TIMEOUT_SECS: u64 = 15;

/// Where the session tokens and user snapshot are persisted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    File,
    Keyring,
    Memory,
}

/// Backend endpoint paths, relative to `api_base_url`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Endpoints {
    pub sign_in: String,
    pub refresh: String,
    pub current_user: String,
    pub register: String,
    /// `{provider}` is replaced with the OAuth provider name
    pub oauth_exchange: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            sign_in: "/api/auth/token/".to_string(),
            refresh: "/api/auth/token/refresh/".to_string(),
            current_user: "/api/auth/me/".to_string(),
            register: "/api/auth/register/".to_string(),
            oauth_exchange: "/api/auth/oauth/{provider}/".to_string(),
        }
    }
}

impl Endpoints {
    pub fn oauth_exchange_for(&self, provider: &str) -> String {
        self.oauth_exchange.replace("{provider}", provider)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    pub refresh_timeout_secs: u64,
    pub storage: StorageKind,
    pub last_email: Option<String>,
    pub endpoints: Endpoints,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            refresh_timeout_secs: DEFAULT_REFRESH_TIMEOUT_SECS,
            storage: StorageKind::default(),
            last_email: None,
            endpoints: Endpoints::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.trim().is_empty() {
                self.api_base_url = url.trim().to_string();
            }
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Never zero; a zero timeout would fail every refresh immediately.
    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs.max(1))
    }

    /// Join an endpoint path onto the base URL.
    pub fn url(&self, path: &str) -> String {
        join_url(&self.api_base_url, path)
    }

    /// Open the configured session store.
    pub fn open_store(&self) -> Result<Arc<dyn SessionStore>> {
        Ok(match self.storage {
            StorageKind::File => Arc::new(FileStore::open(&self.cache_dir()?)?),
            StorageKind::Keyring => Arc::new(KeyringStore::new()),
            StorageKind::Memory => Arc::new(MemoryStore::new()),
        })
    }
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
