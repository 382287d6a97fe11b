//! Configuration for certcache
//!
//! Values come from a TOML file (`--config`, `CERTCACHE_CONFIG`, or
//! `<config dir>/certcache/config.toml`), with the workflow's environment
//! variables applied on top.

pub mod schema;

pub use schema::{CacheBackendKind, Config};

use crate::error::{CertcacheError, CertcacheResult};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Locates and reads the configuration file
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Manager for `path`, or for the default location
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            config_path: path.unwrap_or_else(Self::default_config_path),
        }
    }

    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("certcache")
            .join("config.toml")
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// File configuration; a missing file yields the defaults
    pub async fn load(&self) -> CertcacheResult<Config> {
        let content = match fs::read_to_string(&self.config_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No config file at {}, using defaults", self.config_path.display());
                return Ok(Config::default());
            }
            Err(e) => {
                return Err(CertcacheError::io(
                    format!("reading config from {}", self.config_path.display()),
                    e,
                ))
            }
        };

        toml::from_str(&content).map_err(|e| CertcacheError::ConfigInvalid {
            path: self.config_path.clone(),
            reason: e.to_string(),
        })
    }

    /// File configuration with the process environment applied once
    pub async fn load_with_env(&self) -> CertcacheResult<Config> {
        let mut config = self.load().await?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }
}
