//! Configuration handling for loccon
//!
//! Two documents are involved:
//! - `config.json` inside every storage root ([`StoreConfig`]), descriptive
//!   only and rewritten on each mutation to record `lastAccessed`.
//! - `~/.config/loccon/config.toml` ([`GlobalConfig`]) with user defaults
//!   for the CLI.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::error::StoreResult;
use super::root::{StorageRoot, STORAGE_DIR_NAME};
use super::shard::DEFAULT_MAX_SHARD_SIZE;

/// Format version written to new storage roots
pub const STORE_VERSION: &str = "1.0.0";

/// Default time a mutation waits for the storage lock
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(5000);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

/// Storage layout marker (always `sharded`)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorageType {
    #[default]
    Sharded,
}

/// Contents of `config.json`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    pub version: String,
    pub storage_type: StorageType,
    pub max_shard_size: String,
    pub created: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

impl StoreConfig {
    pub fn new(max_shard_size: u64) -> Self {
        let now = Utc::now();
        Self {
            version: STORE_VERSION.to_string(),
            storage_type: StorageType::Sharded,
            max_shard_size: format_size(max_shard_size),
            created: now,
            last_accessed: now,
        }
    }

    /// Writes `config.json` unless it already exists
    pub fn initialize(root: &StorageRoot, max_shard_size: u64) -> StoreResult<bool> {
        root.write_json_if_absent(&root.config_path(), &Self::new(max_shard_size))
    }

    /// Loads `config.json`, if present
    pub fn load(root: &StorageRoot) -> StoreResult<Option<Self>> {
        root.read_json_opt(&root.config_path())
    }

    /// Records the current time as `lastAccessed`
    pub fn touch(root: &StorageRoot) -> StoreResult<()> {
        let path = root.config_path();
        if let Some(mut config) = root.read_json_opt::<Self>(&path)? {
            config.last_accessed = Utc::now();
            root.write_json(&path, &config)?;
        }
        Ok(())
    }
}

/// Formats a byte count the way `maxShardSize` is recorded ("5MB")
pub fn format_size(bytes: u64) -> String {
    const MB: u64 = 1024 * 1024;
    const KB: u64 = 1024;

    if bytes >= MB && bytes % MB == 0 {
        format!("{}MB", bytes / MB)
    } else if bytes >= KB && bytes % KB == 0 {
        format!("{}KB", bytes / KB)
    } else {
        format!("{}B", bytes)
    }
}

/// Output format for commands
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Global user configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GlobalConfig {
    /// Storage root used when no `--storage-path` is given
    pub storage_path: Option<PathBuf>,

    /// Milliseconds a mutation waits for the storage lock
    pub lock_timeout_ms: u64,

    /// Shard rotation threshold in bytes
    pub max_shard_size: u64,

    /// Default output format (text or json)
    pub default_format: OutputFormat,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            storage_path: None,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT.as_millis() as u64,
            max_shard_size: DEFAULT_MAX_SHARD_SIZE,
            default_format: OutputFormat::Text,
        }
    }
}

impl GlobalConfig {
    /// Returns the global config directory
    pub fn config_dir() -> Option<PathBuf> {
        ProjectDirs::from("dev", "loccon", "loccon").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Loads the global configuration, falling back to defaults
    pub fn load() -> Result<Self> {
        match Self::config_dir() {
            Some(dir) => Self::load_from(&dir.join("config.toml")),
            None => Ok(Self::default()),
        }
    }

    /// Loads configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read global config: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| ConfigError::Parse(e.to_string()))
            .context("Failed to parse global config")?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.lock_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "lock_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_shard_size == 0 {
            return Err(ConfigError::Invalid(
                "max_shard_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Resolves the storage root: explicit path, configured path, the
    /// nearest `.loccon` above the current directory, or `./.loccon`
    pub fn resolve_storage_path(&self, explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit.or(self.storage_path.as_deref()) {
            return Ok(path.to_path_buf());
        }

        let cwd = std::env::current_dir().context("Failed to determine current directory")?;
        Ok(find_storage_root(&cwd).unwrap_or_else(|| cwd.join(STORAGE_DIR_NAME)))
    }
}

/// Finds the nearest ancestor of `start` containing a `.loccon/` directory
pub fn find_storage_root(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let candidate = current.join(STORAGE_DIR_NAME);
        if candidate.is_dir() {
            return Some(candidate);
        }

        if !current.pop() {
            return None;
        }
    }
}
