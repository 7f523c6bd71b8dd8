//! Playlist orchestrator
//!
//! Drives one batch: resolve, then select/name/fetch per item, then
//! aggregate. Item failures become outcomes; only resolution and output-root
//! failures are returned as errors.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::extractor::{Extractor, FetchRequest};
use crate::core::format_selector;
use crate::core::namer::OutputNamer;
use crate::core::progress::ProgressReporter;
use crate::error::{DownloadError, Result};
use crate::types::{
    BatchResult, BatchState, Config, DownloadOutcome, FormatSelection, FormatSpec, PlaylistItem,
    PlaylistRequest, ProgressEvent,
};

/// Bounded retry for transient fetch failures
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Extra attempts after the first
    pub retries: u32,
    /// Delay before the first retry, doubled for each one after
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            retries: 0,
            backoff: Duration::ZERO,
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(2u32.saturating_pow(attempt))
    }
}

pub struct Orchestrator {
    extractor: Arc<dyn Extractor>,
    namer: OutputNamer,
    spec: FormatSpec,
    workers: usize,
    retry: RetryPolicy,
}

impl Orchestrator {
    pub fn new(extractor: Arc<dyn Extractor>, namer: OutputNamer, spec: FormatSpec) -> Self {
        Self {
            extractor,
            namer,
            spec,
            workers: 1,
            retry: RetryPolicy::none(),
        }
    }

    pub fn from_config(config: &Config, extractor: Arc<dyn Extractor>) -> Self {
        Self::new(extractor, OutputNamer::new(&config.output_dir), config.format_spec())
            .with_workers(config.workers)
            .with_retry(RetryPolicy {
                retries: config.fetch_retries,
                backoff: Duration::from_millis(config.retry_backoff_ms),
            })
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Run one batch to completion.
    ///
    /// Returns a `BatchResult` whenever resolution succeeded, even if every
    /// item failed or the batch was cancelled midway.
    pub async fn run(
        &self,
        request: &PlaylistRequest,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<BatchResult> {
        let url = request.url.trim();

        progress.set_state(BatchState::Resolving);
        info!(url, extractor = self.extractor.name(), "resolving");

        let items = match self.resolve(url, cancel).await {
            Ok(items) => items,
            Err(e) => {
                warn!(url, "resolution failed: {}", e);
                progress.set_state(BatchState::ResolutionFailed);
                return Err(e);
            }
        };

        progress.set_total_items(items.len());
        progress.set_state(BatchState::ProcessingItems);
        info!(url, items = items.len(), workers = self.workers, "processing items");

        // Futures are lazy; `buffered` bounds how many run and keeps input order
        let pending: Vec<_> = items
            .into_iter()
            .map(|item| self.process_item(item, progress, cancel))
            .collect();
        let outcomes: Vec<DownloadOutcome> = stream::iter(pending)
            .buffered(self.workers)
            .collect()
            .await;

        progress.set_state(BatchState::Aggregating);
        let result = BatchResult::new(url, outcomes);
        info!(
            url,
            succeeded = result.succeeded(),
            failed = result.failed(),
            status = ?result.overall_status,
            "batch finished"
        );

        progress.set_state(BatchState::Done);
        Ok(result)
    }

    async fn resolve(&self, url: &str, cancel: &CancellationToken) -> Result<Vec<PlaylistItem>> {
        let items = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            items = self.extractor.resolve_playlist(url) => items?,
        };

        if items.is_empty() {
            return Err(DownloadError::EmptyPlaylist);
        }

        self.namer.ensure_root().await?;
        Ok(items)
    }

    async fn process_item(
        &self,
        item: PlaylistItem,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> DownloadOutcome {
        match self.download_item(&item, progress, cancel).await {
            Ok(path) => {
                info!(item = item.index, path = %path.display(), "item done");
                DownloadOutcome::success(item, &path)
            }
            Err(e) => {
                warn!(item = item.index, code = ?e.code(), "item failed: {}", e);
                DownloadOutcome::failed(item, &e)
            }
        }
    }

    async fn download_item(
        &self,
        item: &PlaylistItem,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let prepared = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DownloadError::Cancelled),
            prepared = self.prepare(item) => prepared,
        };

        // Past this point the extractor owns the terminal event
        let (selection, output_path) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                progress.record(ProgressEvent::error(item.index, e.to_string()));
                return Err(e);
            }
        };

        self.fetch_with_retry(item, &selection, &output_path, progress, cancel)
            .await?;
        Ok(output_path)
    }

    async fn prepare(&self, item: &PlaylistItem) -> Result<(FormatSelection, PathBuf)> {
        let streams = self.extractor.list_streams(item).await?;
        let selection = format_selector::select(&streams, &self.spec)?;
        let output_path = self.namer.prepare(item, self.spec.container).await?;
        Ok((selection, output_path))
    }

    async fn fetch_with_retry(
        &self,
        item: &PlaylistItem,
        selection: &FormatSelection,
        output_path: &std::path::Path,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut attempt = 0;

        loop {
            let request = FetchRequest {
                item,
                selection,
                spec: &self.spec,
                output_path,
                progress,
                cancel,
            };

            match self.extractor.fetch_and_merge(request).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < self.retry.retries => {
                    let delay = self.retry.delay(attempt);
                    attempt += 1;
                    warn!(
                        item = item.index,
                        attempt,
                        "fetch failed, retrying in {:?}: {}",
                        delay,
                        e
                    );

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}
