//! Output naming
//!
//! Maps playlist + item metadata to
//! `<root>/<playlist>/<NN> - <title>.<ext>`. The index is part of every file
//! name, so two items of one playlist never collide.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tokio::fs;

use crate::error::{DownloadError, Result};
use crate::types::{ContainerFormat, PlaylistItem};

/// Byte budget for a single path component
pub const MAX_COMPONENT_BYTES: usize = 200;

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("Invalid regex"));

/// Resolves output paths under a fixed root
#[derive(Debug, Clone)]
pub struct OutputNamer {
    root: PathBuf,
}

impl OutputNamer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic path for one item. Pure; touches nothing on disk.
    pub fn path_for(
        &self,
        playlist_name: &str,
        index: u32,
        title: &str,
        container: ContainerFormat,
    ) -> PathBuf {
        let dir = sanitize_component(playlist_name, MAX_COMPONENT_BYTES, "playlist");

        let prefix = format!("{:02} - ", index);
        let ext = container.ext();
        let budget = MAX_COMPONENT_BYTES.saturating_sub(prefix.len() + ext.len() + 1);
        let title = sanitize_component(title, budget, "untitled");

        self.root.join(dir).join(format!("{}{}.{}", prefix, title, ext))
    }

    /// Create the root if absent and make sure we can write into it
    pub async fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| DownloadError::output_root(&self.root, e))?;

        let probe = self
            .root
            .join(format!(".playlist-dl-probe-{}", uuid::Uuid::new_v4()));
        fs::write(&probe, b"")
            .await
            .map_err(|e| DownloadError::output_root(&self.root, e))?;
        let _ = fs::remove_file(&probe).await;

        Ok(())
    }

    /// Path for `item`, with every parent directory created
    pub async fn prepare(&self, item: &PlaylistItem, container: ContainerFormat) -> Result<PathBuf> {
        let path = self.path_for(&item.playlist_name, item.index, &item.title, container);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloadError::output_root(parent, e))?;
        }

        Ok(path)
    }
}

/// Make `raw` safe as a single path component of at most `max_bytes`
pub fn sanitize_component(raw: &str, max_bytes: usize, fallback: &str) -> String {
    let replaced: String = raw
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let collapsed = WHITESPACE.replace_all(&replaced, " ");
    // Leading dots would hide the file; "." and ".." would escape the directory
    let trimmed = collapsed.trim().trim_matches('.').trim();

    let name = if trimmed.is_empty() { fallback } else { trimmed };
    // A cut can land right after a dot; Windows rejects trailing dots
    truncate_to_bytes(name, max_bytes)
        .trim_end_matches(|c: char| c == '.' || c.is_whitespace())
        .to_string()
}

fn truncate_to_bytes(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }

    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
