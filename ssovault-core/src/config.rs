//! Core configuration.

use crate::audit::DEFAULT_PAGE_SIZE;
use crate::login::LoginPolicy;
use crate::store::{MemoryStore, RecordStore, SqliteStore, StoreError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Default environment variable carrying the base64 master key
pub const DEFAULT_MASTER_KEY_ENV: &str = "SSOVAULT_MASTER_KEY";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file; an in-memory store is used when unset
    pub sqlite_path: Option<PathBuf>,
    pub audit_page_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: None,
            audit_page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl StorageConfig {
    /// Open the configured record store
    pub fn open_store(&self) -> Result<Arc<dyn RecordStore>, StoreError> {
        match self.sqlite_path {
            Some(ref path) => Ok(Arc::new(SqliteStore::open(path)?)),
            None => Ok(Arc::new(MemoryStore::new())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyConfig {
    pub master_key_env: String,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            master_key_env: DEFAULT_MASTER_KEY_ENV.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub login: LoginPolicy,
    pub storage: StorageConfig,
    pub keys: KeyConfig,
}

impl CoreConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.login.validate().map_err(ConfigError::Invalid)?;
        if self.storage.audit_page_size == 0 {
            return Err(ConfigError::Invalid(
                "audit_page_size must be greater than 0".to_string(),
            ));
        }
        if self.keys.master_key_env.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "master_key_env must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
