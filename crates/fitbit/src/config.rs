//! Configuration loading for sync services
//!
//! Supports loading OAuth client credentials from (in order of priority):
//! 1. Compile-time embedded credentials (for production builds)
//! 2. JSON file in the fitsync config directory
//! 3. Runtime environment variables (fallback)
//!
//! Sync settings (API base, timeout, quotas, realm store) come from
//! `sync-settings.json` with every field optional.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::api::FitbitClient;
use crate::models::RateQuota;
use crate::rate::{InMemoryRealmStore, RealmStore, SqliteRealmStore};

/// Credentials filename in the fitsync config directory
const CREDENTIALS_FILE: &str = "fitbit-credentials.json";

/// Sync settings filename in the fitsync config directory
const SETTINGS_FILE: &str = "sync-settings.json";

/// Environment variable pointing at a shared rate-limit database
const RATE_DB_ENV: &str = "FITSYNC_RATE_DB";

/// OAuth client credentials for the Fitbit Web API
#[derive(Debug, Clone, Deserialize)]
pub struct FitbitCredentials {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub redirect_uri: Option<String>,
}

impl FitbitCredentials {
    /// Load credentials using the following priority:
    /// 1. Compile-time embedded credentials (for production builds)
    /// 2. JSON file (~/.config/fitsync/fitbit-credentials.json)
    /// 3. Runtime environment variables
    pub fn load() -> Result<Self> {
        if let Some(creds) = Self::from_compile_time() {
            return Ok(creds);
        }

        if config::config_exists(CREDENTIALS_FILE) {
            return config::load_json(CREDENTIALS_FILE);
        }

        Self::from_env()
    }

    /// Load credentials embedded at compile time via environment variables.
    /// Build with: FITBIT_CLIENT_ID=xxx FITBIT_CLIENT_SECRET=yyy cargo build --release
    pub fn from_compile_time() -> Option<Self> {
        let client_id = option_env!("FITBIT_CLIENT_ID")?;
        let client_secret = option_env!("FITBIT_CLIENT_SECRET")?;

        if client_id.is_empty() || client_secret.is_empty() {
            return None;
        }

        Some(Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            redirect_uri: option_env!("FITBIT_REDIRECT_URI").map(str::to_string),
        })
    }

    /// Load credentials from a specific JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        config::load_json_file(path)
    }

    /// Parse credentials from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse credentials JSON")
    }

    /// Load credentials from environment variables
    pub fn from_env() -> Result<Self> {
        let client_id = std::env::var("FITBIT_CLIENT_ID")
            .context("FITBIT_CLIENT_ID environment variable not set")?;
        let client_secret = std::env::var("FITBIT_CLIENT_SECRET")
            .context("FITBIT_CLIENT_SECRET environment variable not set")?;

        Ok(Self {
            client_id,
            client_secret,
            redirect_uri: std::env::var("FITBIT_REDIRECT_URI").ok(),
        })
    }

    /// Get the default credentials file path (~/.config/fitsync/fitbit-credentials.json)
    pub fn default_credentials_path() -> Option<PathBuf> {
        config::config_path(CREDENTIALS_FILE)
    }

    /// Check if credentials are available (compile-time, file, or env vars)
    pub fn is_available() -> bool {
        if Self::from_compile_time().is_some() {
            return true;
        }
        if config::config_exists(CREDENTIALS_FILE) {
            return true;
        }
        std::env::var("FITBIT_CLIENT_ID").is_ok() && std::env::var("FITBIT_CLIENT_SECRET").is_ok()
    }
}

/// Where rate realm counters live
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RealmStoreSettings {
    /// Process-local counters
    Memory,
    /// Counters in a SQLite database shared by every process using the path
    Sqlite { path: PathBuf },
}

impl Default for RealmStoreSettings {
    fn default() -> Self {
        Self::Memory
    }
}

impl RealmStoreSettings {
    /// Open the configured store
    pub fn open(&self) -> Result<Arc<dyn RealmStore>> {
        Ok(match self {
            Self::Memory => Arc::new(InMemoryRealmStore::new()),
            Self::Sqlite { path } => Arc::new(SqliteRealmStore::open(path)?),
        })
    }
}

/// Tunables for a sync deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Base of the user API; endpoint paths are appended to it
    pub api_base_url: String,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
    /// Budget shared by every account
    pub global_quota: RateQuota,
    /// Budget for each account
    pub account_quota: RateQuota,
    /// Requests held back from each budget
    pub safety_threshold: u32,
    pub realm_store: RealmStoreSettings,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            api_base_url: FitbitClient::BASE_URL.to_string(),
            request_timeout_secs: FitbitClient::DEFAULT_TIMEOUT.as_secs(),
            global_quota: RateQuota::global_default(),
            account_quota: RateQuota::account_default(),
            safety_threshold: 0,
            realm_store: RealmStoreSettings::default(),
        }
    }
}

impl SyncSettings {
    /// Load settings from the config directory, falling back to defaults
    ///
    /// `FITSYNC_RATE_DB` overrides the realm store with a SQLite path.
    pub fn load() -> Result<Self> {
        let settings = if config::config_exists(SETTINGS_FILE) {
            config::load_json(SETTINGS_FILE)?
        } else {
            Self::default()
        };
        settings.with_env_overrides().validated()
    }

    /// Load settings from a specific JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let settings: Self = config::load_json_file(path)?;
        settings.validated()
    }

    /// Parse settings from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json).context("Failed to parse sync settings")?;
        settings.validated()
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(path) = std::env::var(RATE_DB_ENV)
            && !path.is_empty()
        {
            self.realm_store = RealmStoreSettings::Sqlite { path: path.into() };
        }
        self
    }

    fn validated(self) -> Result<Self> {
        let url = url::Url::parse(&self.api_base_url)
            .with_context(|| format!("Invalid api_base_url: {}", self.api_base_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("api_base_url must be http(s): {}", self.api_base_url);
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be positive");
        }
        for (name, quota) in [("global_quota", self.global_quota), ("account_quota", self.account_quota)] {
            if quota.max_requests == 0 || quota.timespan_secs == 0 {
                anyhow::bail!("{} must allow at least one request per non-empty window", name);
            }
        }
        Ok(self)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Global quota after the safety threshold
    pub fn effective_global_quota(&self) -> RateQuota {
        self.global_quota.with_headroom(self.safety_threshold)
    }

    /// Per-account quota after the safety threshold
    pub fn effective_account_quota(&self) -> RateQuota {
        self.account_quota.with_headroom(self.safety_threshold)
    }

    /// Build an API client from these settings
    pub fn client(&self) -> FitbitClient {
        FitbitClient::with_base_url(&self.api_base_url, self.request_timeout())
    }
}
