//! Configuration for coop-content

use crate::error::{CoopError, CoopResult};
use crate::hash::Address;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("coop-content")
}

/// Which store backend to open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Memory,
    Sled,
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Storage directory for the sled backend
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Store backend
    #[serde(default = "default_backend")]
    pub backend: Backend,

    /// Agent address to act as
    #[serde(default)]
    pub agent: Option<Address>,

    /// sled page cache size in bytes
    #[serde(default = "default_sled_cache_bytes")]
    pub sled_cache_bytes: u64,
}

fn default_backend() -> Backend {
    Backend::Sled
}

fn default_sled_cache_bytes() -> u64 {
    64 * 1024 * 1024
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            backend: default_backend(),
            agent: None,
            sled_cache_bytes: default_sled_cache_bytes(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> CoopResult<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| CoopError::Config(e.to_string()))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> CoopResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| CoopError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get sled database path
    pub fn db_path(&self) -> PathBuf {
        self.storage_dir.join("store.sled")
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }
}
