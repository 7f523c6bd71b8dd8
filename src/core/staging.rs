//! Staged writes
//!
//! Fetches write into a private directory beside the final output. Only a
//! finished file is renamed into place; anything else is removed, including
//! when the owning future is dropped mid-flight.

use std::future::Future;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{DownloadError, Result};

pub struct Staging {
    dir: Option<PathBuf>,
}

impl Staging {
    /// Create `.<NN>-<uuid>.staging` next to `output_path`
    pub async fn create(output_path: &Path, item_index: u32) -> Result<Self> {
        let parent = output_path.parent().unwrap_or_else(|| Path::new("."));
        let dir = parent.join(format!(
            ".{:02}-{}.staging",
            item_index,
            uuid::Uuid::new_v4().simple()
        ));

        fs::create_dir_all(&dir)
            .await
            .map_err(|e| DownloadError::output_root(parent, e))?;

        Ok(Self { dir: Some(dir) })
    }

    pub fn dir(&self) -> &Path {
        self.dir.as_deref().unwrap_or_else(|| Path::new("."))
    }

    /// Move `produced` to `output_path` and drop the staging directory
    pub async fn commit(mut self, produced: &Path, output_path: &Path) -> Result<()> {
        let Some(dir) = self.dir.take() else {
            return Ok(());
        };

        let moved = fs::rename(produced, output_path).await;
        if let Err(e) = fs::remove_dir_all(&dir).await {
            warn!(dir = %dir.display(), "failed to remove staging directory: {}", e);
        }
        moved?;

        debug!(output = %output_path.display(), "committed");
        Ok(())
    }

    /// Remove everything written so far
    pub async fn discard(mut self) {
        if let Some(dir) = self.dir.take() {
            if let Err(e) = fs::remove_dir_all(&dir).await {
                warn!(dir = %dir.display(), "failed to remove staging directory: {}", e);
            }
        }
    }
}

impl Drop for Staging {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }
}

/// Run `fetch` against a fresh staging directory.
///
/// `fetch` returns the path of the file it produced inside the directory.
/// Cancellation wins over a still-running fetch; the fetch future is dropped
/// and the directory removed before `Cancelled` is returned.
pub async fn run_staged<F, Fut>(
    output_path: &Path,
    item_index: u32,
    cancel: &CancellationToken,
    fetch: F,
) -> Result<()>
where
    F: FnOnce(PathBuf) -> Fut,
    Fut: Future<Output = Result<PathBuf>>,
{
    if cancel.is_cancelled() {
        return Err(DownloadError::Cancelled);
    }

    let staging = Staging::create(output_path, item_index).await?;
    let dir = staging.dir().to_path_buf();

    let produced = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DownloadError::Cancelled),
        produced = fetch(dir) => produced,
    };

    match produced {
        Ok(produced) => staging.commit(&produced, output_path).await,
        Err(e) => {
            staging.discard().await;
            Err(e)
        }
    }
}
