//! Configuration management
//!
//! Defaults, then the JSON config file, then command-line/environment
//! overrides.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

use crate::error::{DownloadError, Result};
use crate::types::{Config, ContainerFormat};
use crate::utils::paths::{ensure_dir, get_config_path};

/// Values set on the command line or via `PLAYLIST_DL_*`
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub output_dir: Option<String>,
    pub max_height: Option<u32>,
    pub container: Option<ContainerFormat>,
    pub workers: Option<usize>,
    pub ytdlp_path: Option<String>,
    pub bind: Option<String>,
}

impl Overrides {
    pub fn apply(self, config: &mut Config) {
        if let Some(v) = self.output_dir {
            config.output_dir = v;
        }
        if let Some(v) = self.max_height {
            config.max_height = v;
        }
        if let Some(v) = self.container {
            config.container = v;
        }
        if let Some(v) = self.workers {
            config.workers = v;
        }
        if let Some(v) = self.ytdlp_path {
            config.ytdlp_path = v;
        }
        if let Some(v) = self.bind {
            config.bind = v;
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(DownloadError::InvalidConfig("workers must be at least 1".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(DownloadError::InvalidConfig(
                "request_timeout_secs must be at least 1".into(),
            ));
        }
        if self.max_height == 0 {
            return Err(DownloadError::InvalidConfig("max_height must be positive".into()));
        }
        if self.ytdlp_path.trim().is_empty() {
            return Err(DownloadError::InvalidConfig("ytdlp_path is empty".into()));
        }
        if self.output_dir.trim().is_empty() {
            return Err(DownloadError::InvalidConfig("output_dir is empty".into()));
        }
        Ok(())
    }
}

/// Load configuration from file, merging with defaults.
///
/// An explicit path must exist; the default path may be absent.
pub async fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let config_path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let path = get_config_path();
            if !path.exists() {
                debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Config::default());
            }
            path
        }
    };

    let content = fs::read_to_string(&config_path).await.map_err(|e| {
        DownloadError::InvalidConfig(format!("{}: {}", config_path.display(), e))
    })?;

    // Missing keys fall back to defaults via #[serde(default)]
    let config: Config = serde_json::from_str(&content).map_err(|e| {
        DownloadError::InvalidConfig(format!("{}: {}", config_path.display(), e))
    })?;

    debug!(path = %config_path.display(), "loaded config");
    Ok(config)
}

/// Save configuration to file, returning where it was written
pub async fn save_config(config: &Config, explicit: Option<&Path>) -> Result<PathBuf> {
    let path = explicit.map(Path::to_path_buf).unwrap_or_else(get_config_path);

    if let Some(parent) = path.parent() {
        ensure_dir(parent).await?;
    }
    let content = serde_json::to_string_pretty(config)?;
    fs::write(&path, content).await?;

    Ok(path)
}
