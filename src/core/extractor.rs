//! Extractor seam
//!
//! Everything that talks to the media platform goes through [`Extractor`].
//! The orchestrator only sees this trait, so tests can script one.

use std::path::Path;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::core::progress::ProgressReporter;
use crate::error::Result;
use crate::types::{FormatSelection, FormatSpec, PlaylistItem, StreamOption};

/// Everything one fetch-and-merge call needs
pub struct FetchRequest<'a> {
    pub item: &'a PlaylistItem,
    pub selection: &'a FormatSelection,
    pub spec: &'a FormatSpec,
    /// Final location; nothing may exist here unless the call succeeds
    pub output_path: &'a Path,
    pub progress: &'a ProgressReporter,
    pub cancel: &'a CancellationToken,
}

#[async_trait]
pub trait Extractor: Send + Sync {
    /// Name of the backend (for logging)
    fn name(&self) -> &'static str;

    /// Resolve a playlist URL into its items, in playlist order.
    ///
    /// Fails with `Resolution` for bad URLs or unreachable services and with
    /// `EmptyPlaylist` when resolution yields nothing.
    async fn resolve_playlist(&self, url: &str) -> Result<Vec<PlaylistItem>>;

    /// Stream options the platform offers for one item
    async fn list_streams(&self, item: &PlaylistItem) -> Result<Vec<StreamOption>>;

    /// Fetch the selected streams and merge them into `output_path`.
    ///
    /// Emits progress as it goes and exactly one terminal event. On failure
    /// or cancellation no file is left at `output_path`.
    async fn fetch_and_merge(&self, request: FetchRequest<'_>) -> Result<()>;
}
