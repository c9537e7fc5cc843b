//! Runtime configuration
//!
//! Read from the environment (after loading `.env`):
//! - `BIZVAULT_DATA_DIR`: data directory (default: platform data dir)
//! - `BIZVAULT_REMOTE_URL`: remote store base URL (unset = offline only)
//! - `BIZVAULT_REMOTE_TOKEN`: bearer token for the remote store
//! - `BIZVAULT_CACHE_CAPACITY`: record cache size (default 64)
//! - `BIZVAULT_SYNC_POLL_SECS`: pending-count poll period (default 10)

use std::path::PathBuf;
use std::time::Duration;
use url::Url;

const DEFAULT_CACHE_CAPACITY: u64 = 64;
const DEFAULT_SYNC_POLL_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub remote_url: Option<Url>,
    pub remote_token: Option<String>,
    pub cache_capacity: u64,
    pub sync_poll_interval: Duration,
}

impl AppConfig {
    /// Load `.env` if present, then read the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let data_dir = match get("BIZVAULT_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => default_data_dir()?,
        };

        let remote_url = get("BIZVAULT_REMOTE_URL")
            .map(|raw| {
                Url::parse(&raw).map_err(|e| ConfigError::Invalid {
                    key: "BIZVAULT_REMOTE_URL",
                    reason: e.to_string(),
                })
            })
            .transpose()?;

        let cache_capacity = parse_number(get("BIZVAULT_CACHE_CAPACITY"), "BIZVAULT_CACHE_CAPACITY")?
            .unwrap_or(DEFAULT_CACHE_CAPACITY);

        let poll_secs = parse_number(get("BIZVAULT_SYNC_POLL_SECS"), "BIZVAULT_SYNC_POLL_SECS")?
            .unwrap_or(DEFAULT_SYNC_POLL_SECS);
        if poll_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "BIZVAULT_SYNC_POLL_SECS",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            data_dir,
            remote_url,
            remote_token: get("BIZVAULT_REMOTE_TOKEN"),
            cache_capacity,
            sync_poll_interval: Duration::from_secs(poll_secs),
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("bizvault.db")
    }

    pub fn local_store_dir(&self) -> PathBuf {
        self.data_dir.join("records")
    }
}

fn default_data_dir() -> Result<PathBuf, ConfigError> {
    directories::ProjectDirs::from("com", "bizvault", "bizvault")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or(ConfigError::NoDataDir)
}

fn parse_number(value: Option<String>, key: &'static str) -> Result<Option<u64>, ConfigError> {
    value
        .map(|raw| {
            raw.parse::<u64>().map_err(|e| ConfigError::Invalid {
                key,
                reason: format!("'{}': {}", raw, e),
            })
        })
        .transpose()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot determine a data directory; set BIZVAULT_DATA_DIR")]
    NoDataDir,

    #[error("Invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}
