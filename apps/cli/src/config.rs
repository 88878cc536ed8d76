//! CLI configuration.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/ossync/config.toml`
//! - Windows: `%APPDATA%/ossync/config.toml`
//!
//! Command-line flags override file values.

use std::path::{Path, PathBuf};

use ossync_transfer::{DEFAULT_CONCURRENCY, DEFAULT_PART_SIZE, TransferConfig};
use serde::{Deserialize, Serialize};

/// CLI configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Root directory of the object store.
    #[serde(default = "default_store_root")]
    pub store_root: PathBuf,

    /// Part size in bytes.
    #[serde(default = "default_part_size")]
    pub part_size: u64,

    /// Concurrent part transfers.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_store_root() -> PathBuf {
    home_dir().join(".local").join("share").join("ossync").join("store")
}

fn default_part_size() -> u64 {
    DEFAULT_PART_SIZE
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_root: default_store_root(),
            part_size: default_part_size(),
            concurrency: default_concurrency(),
        }
    }
}

impl Config {
    /// Loads configuration from `path`, or from the default location.
    ///
    /// A missing default file yields defaults; a missing explicit file is
    /// an error.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (config_path(), false),
        };

        if !explicit && !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
        let config: Config = toml::from_str(&content)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Applies command-line overrides.
    pub fn with_overrides(
        mut self,
        store_root: Option<PathBuf>,
        part_size: Option<u64>,
        concurrency: Option<usize>,
    ) -> Self {
        if let Some(root) = store_root {
            self.store_root = root;
        }
        if let Some(size) = part_size {
            self.part_size = size;
        }
        if let Some(n) = concurrency {
            self.concurrency = n;
        }
        self
    }

    pub fn transfer(&self) -> TransferConfig {
        TransferConfig::new(self.part_size, self.concurrency)
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("ossync").join("config.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        home_dir().join(".config").join("ossync").join("config.toml")
    }
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}
