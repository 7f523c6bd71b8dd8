//! Scripted extractor for tests

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::core::extractor::{Extractor, FetchRequest};
use crate::core::staging::run_staged;
use crate::error::{DownloadError, Result};
use crate::types::{PlaylistItem, ProgressEvent, StreamKind, StreamOption};

/// Extractor whose behavior per item index is scripted up front
#[derive(Default)]
pub(crate) struct ScriptedExtractor {
    pub playlist: Vec<PlaylistItem>,
    pub unresolvable: bool,
    pub failures: Mutex<HashMap<u32, VecDeque<DownloadError>>>,
    pub only_1080p: HashSet<u32>,
    pub hanging: HashSet<u32>,
    pub delays: HashMap<u32, Duration>,
    pub resolve_calls: AtomicUsize,
    pub fetch_calls: AtomicUsize,
}

impl ScriptedExtractor {
    pub fn with_items(count: u32) -> Self {
        Self {
            playlist: (1..=count).map(item).collect(),
            ..Default::default()
        }
    }

    pub fn failing(self, index: u32, errors: Vec<DownloadError>) -> Self {
        self.failures.lock().unwrap().insert(index, errors.into());
        self
    }

    pub fn calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn resolve_playlist(&self, _url: &str) -> Result<Vec<PlaylistItem>> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        if self.unresolvable {
            return Err(DownloadError::resolution("HTTP Error 404: Not Found"));
        }
        Ok(self.playlist.clone())
    }

    async fn list_streams(&self, item: &PlaylistItem) -> Result<Vec<StreamOption>> {
        let video = |id: &str, height| StreamOption {
            id: id.into(),
            kind: StreamKind::Video,
            height: Some(height),
            bitrate_kbps: Some(1000.0),
            ext: Some("mp4".into()),
        };

        if self.only_1080p.contains(&item.index) {
            return Ok(vec![video("137", 1080)]);
        }

        Ok(vec![
            video("136", 720),
            video("137", 1080),
            StreamOption {
                id: "140".into(),
                kind: StreamKind::Audio,
                height: None,
                bitrate_kbps: Some(128.0),
                ext: Some("m4a".into()),
            },
        ])
    }

    async fn fetch_and_merge(&self, request: FetchRequest<'_>) -> Result<()> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let index = request.item.index;

        let scripted = self
            .failures
            .lock()
            .unwrap()
            .get_mut(&index)
            .and_then(|queue| queue.pop_front());
        let delay = self.delays.get(&index).copied();
        let hang = self.hanging.contains(&index);

        request
            .progress
            .record(ProgressEvent::downloading(index, 0.0, None));

        let result = run_staged(request.output_path, index, request.cancel, |dir| async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let produced = dir.join("media.mp4");
            tokio::fs::write(&produced, b"merged").await?;
            if hang {
                std::future::pending::<()>().await;
            }
            match scripted {
                Some(e) => Err(e),
                None => Ok(produced),
            }
        })
        .await;

        match &result {
            Ok(()) => request.progress.record(ProgressEvent::finished(index, "done")),
            Err(e) => request.progress.record(ProgressEvent::error(index, e.to_string())),
        }
        result
    }
}

pub(crate) fn item(index: u32) -> PlaylistItem {
    PlaylistItem {
        index,
        title: format!("Track {}", index),
        playlist_name: "Road Trip".into(),
        source_url: format!("https://example.com/watch?v={}", index),
    }
}
