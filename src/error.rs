//! Error types for playlist-dl

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable machine-readable error codes, one per failure kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Request errors
    InvalidRequest,

    // Batch-level errors
    ResolutionError,
    EmptyPlaylist,
    InvalidOutputRoot,

    // Item-level errors
    NoAcceptableFormat,
    FormatUnavailable,
    FetchError,
    MergeError,
    Cancelled,

    // System errors
    MissingDependency,
    InvalidConfig,
    FileError,
    JsonError,
}

/// Main error type for playlist-dl
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Could not resolve playlist: {cause}")]
    Resolution { cause: String },

    #[error("Playlist resolved to zero items")]
    EmptyPlaylist,

    #[error("No acceptable format at or below {max_height}p")]
    NoAcceptableFormat { max_height: u32 },

    #[error("Selected format is no longer available: {0}")]
    FormatUnavailable(String),

    #[error("Fetch failed: {cause}")]
    Fetch { cause: String },

    #[error("Merge failed: {cause}")]
    Merge { cause: String },

    #[error("Output root {path} is unusable: {cause}")]
    InvalidOutputRoot { path: String, cause: String },

    #[error("Cancelled")]
    Cancelled,

    #[error("Missing dependency: {0}. Please install it.")]
    MissingDependency(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("File error: {0}")]
    File(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DownloadError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidRequest(_) => ErrorCode::InvalidRequest,
            Self::Resolution { .. } => ErrorCode::ResolutionError,
            Self::EmptyPlaylist => ErrorCode::EmptyPlaylist,
            Self::NoAcceptableFormat { .. } => ErrorCode::NoAcceptableFormat,
            Self::FormatUnavailable(_) => ErrorCode::FormatUnavailable,
            Self::Fetch { .. } => ErrorCode::FetchError,
            Self::Merge { .. } => ErrorCode::MergeError,
            Self::InvalidOutputRoot { .. } => ErrorCode::InvalidOutputRoot,
            Self::Cancelled => ErrorCode::Cancelled,
            Self::MissingDependency(_) => ErrorCode::MissingDependency,
            Self::InvalidConfig(_) => ErrorCode::InvalidConfig,
            Self::File(_) => ErrorCode::FileError,
            Self::Json(_) => ErrorCode::JsonError,
        }
    }

    /// Transient network failures are the only kind worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Fetch { .. })
    }

    pub fn fetch(cause: impl Into<String>) -> Self {
        Self::Fetch { cause: cause.into() }
    }

    pub fn merge(cause: impl Into<String>) -> Self {
        Self::Merge { cause: cause.into() }
    }

    pub fn resolution(cause: impl Into<String>) -> Self {
        Self::Resolution { cause: cause.into() }
    }

    pub fn output_root(path: &std::path::Path, cause: impl std::fmt::Display) -> Self {
        Self::InvalidOutputRoot {
            path: path.display().to_string(),
            cause: cause.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DownloadError>;
