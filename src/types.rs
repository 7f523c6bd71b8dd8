//! Type definitions for playlist-dl
//!
//! Source of truth for all data structures.

use serde::{Deserialize, Serialize};

use crate::error::{DownloadError, ErrorCode};

// ============================================
// Request / Playlist Types
// ============================================

/// One inbound playlist download request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistRequest {
    pub url: String,
}

/// One resolved playlist entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistItem {
    /// Position in the playlist, unique within a batch
    pub index: u32,
    pub title: String,
    pub playlist_name: String,
    pub source_url: String,
}

// ============================================
// Format Types
// ============================================

/// Target container for the merged output
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    #[default]
    Mp4,
    Mkv,
    Webm,
}

impl ContainerFormat {
    pub fn ext(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Mkv => "mkv",
            Self::Webm => "webm",
        }
    }
}

impl std::fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.ext())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AudioPolicy {
    #[default]
    BestAvailable,
}

/// Format policy for a run; never mutated mid-batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatSpec {
    pub max_height: u32,
    pub container: ContainerFormat,
    pub audio_policy: AudioPolicy,
}

impl Default for FormatSpec {
    fn default() -> Self {
        Self {
            max_height: 720,
            container: ContainerFormat::Mp4,
            audio_policy: AudioPolicy::BestAvailable,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    /// Video track only
    Video,
    /// Audio track only
    Audio,
    /// Video and audio in one stream
    Combined,
}

/// One stream option offered by the source for an item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamOption {
    /// Extractor format id, e.g. "137"
    pub id: String,
    pub kind: StreamKind,
    pub height: Option<u32>,
    pub bitrate_kbps: Option<f32>,
    pub ext: Option<String>,
}

/// Streams chosen for one item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FormatSelection {
    Pair { video: String, audio: String },
    Combined { id: String },
}

impl FormatSelection {
    /// Format expression understood by yt-dlp's `-f`
    pub fn ytdlp_selector(&self) -> String {
        match self {
            Self::Pair { video, audio } => format!("{}+{}", video, audio),
            Self::Combined { id } => id.clone(),
        }
    }

    /// Number of separately fetched streams
    pub fn stream_count(&self) -> u32 {
        match self {
            Self::Pair { .. } => 2,
            Self::Combined { .. } => 1,
        }
    }
}

// ============================================
// Outcome Types
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Failed,
}

/// Result of processing one item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadOutcome {
    pub item: PlaylistItem,
    pub status: OutcomeStatus,
    pub output_path: Option<String>,
    pub error_detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
}

impl DownloadOutcome {
    pub fn success(item: PlaylistItem, output_path: &std::path::Path) -> Self {
        Self {
            item,
            status: OutcomeStatus::Success,
            output_path: Some(output_path.display().to_string()),
            error_detail: None,
            error_code: None,
        }
    }

    pub fn failed(item: PlaylistItem, error: &DownloadError) -> Self {
        Self {
            item,
            status: OutcomeStatus::Failed,
            output_path: None,
            error_detail: Some(error.to_string()),
            error_code: Some(error.code()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    AllSucceeded,
    PartialFailure,
    TotalFailure,
}

impl OverallStatus {
    pub fn from_outcomes(outcomes: &[DownloadOutcome]) -> Self {
        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();

        if succeeded == 0 {
            // Also covers an empty slice: nothing succeeded
            Self::TotalFailure
        } else if succeeded == outcomes.len() {
            Self::AllSucceeded
        } else {
            Self::PartialFailure
        }
    }
}

/// Aggregated outcome of one playlist request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub request_url: String,
    pub outcomes: Vec<DownloadOutcome>,
    pub overall_status: OverallStatus,
}

impl BatchResult {
    pub fn new(request_url: impl Into<String>, outcomes: Vec<DownloadOutcome>) -> Self {
        let overall_status = OverallStatus::from_outcomes(&outcomes);
        Self {
            request_url: request_url.into(),
            outcomes,
            overall_status,
        }
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    /// One-line human summary, e.g. "Downloaded 2 of 3 items (1 failed)."
    pub fn summary(&self) -> String {
        match self.overall_status {
            OverallStatus::AllSucceeded => format!(
                "Download completed successfully! {} of {} items downloaded.",
                self.succeeded(),
                self.outcomes.len()
            ),
            OverallStatus::PartialFailure => format!(
                "Downloaded {} of {} items ({} failed).",
                self.succeeded(),
                self.outcomes.len(),
                self.failed()
            ),
            OverallStatus::TotalFailure => {
                format!("All {} items failed to download.", self.outcomes.len())
            }
        }
    }
}

// ============================================
// Progress Types
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Downloading,
    Merging,
    Finished,
    Error,
}

/// Progress update for one item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub item_index: u32,
    pub phase: Phase,
    pub percent: Option<f32>,
    /// Raw from the extractor, e.g. "1.20MiB/s"
    pub speed: Option<String>,
    pub message: Option<String>,
}

impl ProgressEvent {
    pub fn downloading(item_index: u32, percent: f32, speed: Option<String>) -> Self {
        Self {
            item_index,
            phase: Phase::Downloading,
            percent: Some(percent),
            speed,
            message: None,
        }
    }

    pub fn merging(item_index: u32) -> Self {
        Self {
            item_index,
            phase: Phase::Merging,
            percent: None,
            speed: None,
            message: None,
        }
    }

    pub fn finished(item_index: u32, message: impl Into<String>) -> Self {
        Self {
            item_index,
            phase: Phase::Finished,
            percent: Some(100.0),
            speed: None,
            message: Some(message.into()),
        }
    }

    pub fn error(item_index: u32, message: impl Into<String>) -> Self {
        Self {
            item_index,
            phase: Phase::Error,
            percent: None,
            speed: None,
            message: Some(message.into()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.phase, Phase::Finished | Phase::Error)
    }
}

// ============================================
// State Machine Types
// ============================================

/// Orchestrator state for one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    #[default]
    Idle,
    Resolving,
    /// Terminal: no items attempted
    ResolutionFailed,
    ProcessingItems,
    Aggregating,
    /// Terminal
    Done,
}

// ============================================
// Config Types
// ============================================

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directory for downloaded media
    pub output_dir: String,
    /// Video height ceiling (default: 720)
    pub max_height: u32,
    /// Merge target container (default: mp4)
    pub container: ContainerFormat,
    /// Items processed at once (default: 1, sequential)
    pub workers: usize,
    /// Extra attempts for fetch failures (default: 2)
    pub fetch_retries: u32,
    /// Base backoff between fetch attempts, doubled each retry
    pub retry_backoff_ms: u64,
    /// Server-side limit for a synchronous /download call
    pub request_timeout_secs: u64,
    /// How long finished async jobs stay queryable
    pub job_ttl_secs: u64,
    /// yt-dlp binary (default: "yt-dlp" on PATH)
    pub ytdlp_path: String,
    /// HTTP listen address
    pub bind: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: "downloads".into(),
            max_height: 720,
            container: ContainerFormat::Mp4,
            workers: 1,
            fetch_retries: 2,
            retry_backoff_ms: 1000,
            request_timeout_secs: 3600,
            job_ttl_secs: 3600,
            ytdlp_path: "yt-dlp".into(),
            bind: "127.0.0.1:5000".into(),
        }
    }
}

impl Config {
    pub fn format_spec(&self) -> FormatSpec {
        FormatSpec {
            max_height: self.max_height,
            container: self.container,
            audio_policy: AudioPolicy::BestAvailable,
        }
    }
}
