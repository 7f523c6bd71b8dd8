//! Path utilities for playlist-dl
//!
//! Respects XDG Base Directory Specification

use std::env;
use std::path::{Path, PathBuf};

use tokio::fs;

use crate::error::Result;

const APP_NAME: &str = "playlist-dl";

/// Get config directory path
/// Respects XDG_CONFIG_HOME, defaults to ~/.config/playlist-dl
pub fn get_config_dir() -> PathBuf {
    let base = env::var_os("XDG_CONFIG_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(dirs::config_dir)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config")
        });

    base.join(APP_NAME)
}

/// Get config file path
pub fn get_config_path() -> PathBuf {
    get_config_dir().join("config.json")
}

/// Ensure a directory exists
pub async fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).await?;
    Ok(())
}
