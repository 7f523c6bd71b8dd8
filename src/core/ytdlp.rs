//! yt-dlp integration
//!
//! Drives the `yt-dlp` binary as a child process: `-J` for metadata,
//! a progress template on stdout for downloads, stderr for classification.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::core::extractor::{Extractor, FetchRequest};
use crate::core::progress::ProgressReporter;
use crate::core::staging::run_staged;
use crate::error::{DownloadError, Result};
use crate::types::{FormatSelection, PlaylistItem, ProgressEvent, StreamKind, StreamOption};

const PROGRESS_PREFIX: &str = "dl-progress";
const OUTPUT_PREFIX: &str = "dl-output:";
const STAGED_STEM: &str = "media";
const FALLBACK_PLAYLIST_NAME: &str = "playlist";

pub struct YtDlpExtractor {
    binary: String,
}

impl YtDlpExtractor {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Check that the configured binary runs at all
    pub async fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// Run yt-dlp and parse its stdout as one JSON document
    async fn run_json(&self, args: &[&str]) -> std::result::Result<serde_json::Value, String> {
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| format!("Failed to start yt-dlp: {}", e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(last_error_line(&stderr)
                .unwrap_or_else(|| format!("yt-dlp exited with code: {:?}", output.status.code())));
        }

        serde_json::from_slice(&output.stdout).map_err(|e| format!("Invalid JSON from yt-dlp: {}", e))
    }

    async fn download_into(
        &self,
        staging: PathBuf,
        request: &FetchRequest<'_>,
    ) -> Result<PathBuf> {
        let ext = request.spec.container.ext();
        let template = staging.join(format!("{}.%(ext)s", STAGED_STEM));
        let template = template.to_string_lossy().into_owned();
        let selector = request.selection.ytdlp_selector();
        let progress_template = format!(
            "download:{} %(info.format_id)s %(progress._percent_str)s %(progress._speed_str)s",
            PROGRESS_PREFIX
        );
        let print_template = format!("after_move:{}%(filepath)s", OUTPUT_PREFIX);

        let args = [
            "-f",
            selector.as_str(),
            "--no-playlist",
            "--no-warnings",
            "--newline",
            "--progress",
            "--progress-template",
            progress_template.as_str(),
            "--print",
            print_template.as_str(),
            "--merge-output-format",
            ext,
            "--remux-video",
            ext,
            "-o",
            template.as_str(),
            request.item.source_url.as_str(),
        ];

        debug!(
            item = request.item.index,
            streams = request.selection.stream_count(),
            "yt-dlp {}",
            args.join(" ")
        );

        let mut child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DownloadError::fetch(format!("Failed to start yt-dlp: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DownloadError::fetch("yt-dlp stdout unavailable"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| DownloadError::fetch("yt-dlp stderr unavailable"))?;

        // --print implies --quiet, which moves progress lines to stderr.
        // Titles echoed in warnings are not always valid UTF-8.
        let mut out_lines = BufReader::new(stdout).split(b'\n');
        let mut err_lines = BufReader::new(stderr).split(b'\n');
        let (mut out_open, mut err_open) = (true, true);

        let mut tracker = PercentTracker::new(request.selection);
        let mut printed: Option<PathBuf> = None;
        let mut diagnostics = String::new();

        while out_open || err_open {
            let (raw, from_stderr) = tokio::select! {
                segment = out_lines.next_segment(), if out_open => match segment? {
                    Some(raw) => (raw, false),
                    None => {
                        out_open = false;
                        continue;
                    }
                },
                segment = err_lines.next_segment(), if err_open => match segment? {
                    Some(raw) => (raw, true),
                    None => {
                        err_open = false;
                        continue;
                    }
                },
            };
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches('\r');

            if let Some(path) = line.trim().strip_prefix(OUTPUT_PREFIX) {
                printed = Some(PathBuf::from(path));
            } else if is_postprocessor_line(line) {
                tracker.emit_merging(request.item.index, request.progress);
            } else if let Some(progress) = parse_progress_line(line) {
                tracker.observe(request.item.index, &progress, request.progress);
            } else if from_stderr {
                diagnostics.push_str(line);
                diagnostics.push('\n');
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| DownloadError::fetch(format!("yt-dlp process failed: {}", e)))?;

        if !status.success() {
            warn!(item = request.item.index, code = ?status.code(), "yt-dlp failed");
            return Err(classify_failure(&diagnostics, status.code()));
        }

        match printed {
            Some(path) if path.exists() => Ok(path),
            _ => find_produced_file(&staging, ext).await,
        }
    }
}

#[async_trait]
impl Extractor for YtDlpExtractor {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn resolve_playlist(&self, url: &str) -> Result<Vec<PlaylistItem>> {
        validate_url(url)?;

        if !self.is_available().await {
            return Err(DownloadError::MissingDependency(self.binary.clone()));
        }

        info!(url, "resolving playlist");
        let json = self
            .run_json(&["--flat-playlist", "-J", "--no-warnings", url])
            .await
            .map_err(DownloadError::resolution)?;

        let items = parse_playlist(&json);
        if items.is_empty() {
            return Err(DownloadError::EmptyPlaylist);
        }

        info!(url, items = items.len(), "playlist resolved");
        Ok(items)
    }

    async fn list_streams(&self, item: &PlaylistItem) -> Result<Vec<StreamOption>> {
        let json = self
            .run_json(&["-J", "--no-playlist", "--no-warnings", item.source_url.as_str()])
            .await
            .map_err(|cause| classify_failure(&cause, None))?;

        Ok(parse_formats(&json))
    }

    async fn fetch_and_merge(&self, request: FetchRequest<'_>) -> Result<()> {
        let index = request.item.index;

        let result = run_staged(request.output_path, index, request.cancel, |staging| {
            self.download_into(staging, &request)
        })
        .await;

        match &result {
            Ok(()) => request.progress.record(ProgressEvent::finished(
                index,
                request.output_path.display().to_string(),
            )),
            Err(e) => request.progress.record(ProgressEvent::error(index, e.to_string())),
        }

        result
    }
}

/// Only absolute http(s) URLs are handed to yt-dlp
fn validate_url(raw: &str) -> Result<()> {
    let parsed = url::Url::parse(raw.trim())
        .map_err(|e| DownloadError::resolution(format!("Invalid URL {:?}: {}", raw, e)))?;

    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(DownloadError::resolution(format!(
            "Unsupported URL scheme: {}",
            other
        ))),
    }
}

/// Playlist entries from `--flat-playlist -J` output
fn parse_playlist(json: &serde_json::Value) -> Vec<PlaylistItem> {
    let str_field = |v: &serde_json::Value, key: &str| {
        v.get(key)
            .and_then(|t| t.as_str())
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
    };

    let Some(entries) = json.get("entries").and_then(|e| e.as_array()) else {
        // A single video resolves to a one-item playlist
        let Some(source_url) = str_field(json, "webpage_url").or_else(|| str_field(json, "url"))
        else {
            return Vec::new();
        };
        return vec![PlaylistItem {
            index: 1,
            title: str_field(json, "title").unwrap_or_else(|| "untitled".into()),
            playlist_name: str_field(json, "playlist_title")
                .unwrap_or_else(|| FALLBACK_PLAYLIST_NAME.into()),
            source_url,
        }];
    };

    let playlist_name = str_field(json, "title")
        .or_else(|| str_field(json, "playlist_title"))
        .unwrap_or_else(|| FALLBACK_PLAYLIST_NAME.into());

    let mut items: Vec<PlaylistItem> = entries
        .iter()
        .enumerate()
        .filter_map(|(position, entry)| {
            let source_url = str_field(entry, "url").or_else(|| str_field(entry, "webpage_url"))?;
            let index = entry
                .get("playlist_index")
                .and_then(|i| i.as_u64())
                .and_then(|i| u32::try_from(i).ok())
                .unwrap_or(position as u32 + 1);

            Some(PlaylistItem {
                index,
                title: str_field(entry, "title").unwrap_or_else(|| "untitled".into()),
                playlist_name: playlist_name.clone(),
                source_url,
            })
        })
        .collect();

    // Indices must be unique within a batch; fall back to positions if not
    let mut seen = std::collections::HashSet::new();
    if !items.iter().all(|item| seen.insert(item.index)) {
        for (position, item) in items.iter_mut().enumerate() {
            item.index = position as u32 + 1;
        }
    }

    items
}

/// Stream options from `-J` output
fn parse_formats(json: &serde_json::Value) -> Vec<StreamOption> {
    let Some(formats) = json.get("formats").and_then(|f| f.as_array()) else {
        return Vec::new();
    };

    formats
        .iter()
        .filter_map(|f| {
            let id = f.get("format_id")?.as_str()?.to_string();
            let ext = f.get("ext").and_then(|e| e.as_str()).map(String::from);
            if ext.as_deref() == Some("mhtml") {
                return None;
            }

            let has = |key: &str| f.get(key).and_then(|c| c.as_str()).map(|c| c != "none");
            let kind = match (has("vcodec"), has("acodec")) {
                (Some(true), Some(false)) => StreamKind::Video,
                (Some(false), Some(true)) => StreamKind::Audio,
                (Some(false), Some(false)) => return None,
                _ => StreamKind::Combined,
            };

            let number = |key: &str| f.get(key).and_then(|n| n.as_f64());
            let bitrate_kbps = number("tbr")
                .or_else(|| number("abr"))
                .or_else(|| number("vbr"))
                .map(|b| b as f32);
            let height = f
                .get("height")
                .and_then(|h| h.as_u64())
                .and_then(|h| u32::try_from(h).ok());

            Some(StreamOption {
                id,
                kind,
                height,
                bitrate_kbps,
                ext,
            })
        })
        .collect()
}

/// One parsed progress-template line
#[derive(Debug, Clone, PartialEq)]
struct ProgressLine {
    format_id: String,
    percent: f32,
    speed: Option<String>,
}

fn parse_progress_line(line: &str) -> Option<ProgressLine> {
    let rest = line.trim().strip_prefix(PROGRESS_PREFIX)?;
    let mut parts = rest.split_whitespace();

    let format_id = parts.next()?.to_string();
    let percent = parts
        .next()?
        .trim_end_matches('%')
        .parse::<f32>()
        .ok()?;
    let speed = parts.collect::<Vec<_>>().join(" ");
    let speed = (!speed.is_empty() && !speed.starts_with("Unknown") && speed != "NA")
        .then_some(speed);

    Some(ProgressLine {
        format_id,
        percent: percent.clamp(0.0, 100.0),
        speed,
    })
}

fn is_postprocessor_line(line: &str) -> bool {
    let line = line.trim_start();
    line.starts_with("[Merger]")
        || line.starts_with("[VideoRemuxer]")
        || line.starts_with("[VideoConvertor]")
}

/// Folds per-stream percentages into one 0-100 figure and emits it only when
/// a new whole percent is crossed.
struct PercentTracker {
    streams: Vec<String>,
    last_whole: Option<u32>,
    merging: bool,
}

impl PercentTracker {
    fn new(selection: &FormatSelection) -> Self {
        let streams = match selection {
            FormatSelection::Pair { video, audio } => vec![video.clone(), audio.clone()],
            FormatSelection::Combined { id } => vec![id.clone()],
        };
        Self {
            streams,
            last_whole: None,
            merging: false,
        }
    }

    fn overall(&self, line: &ProgressLine) -> f32 {
        let slot = self
            .streams
            .iter()
            .position(|id| *id == line.format_id)
            .unwrap_or(0);
        (slot as f32 * 100.0 + line.percent) / self.streams.len() as f32
    }

    fn observe(&mut self, item_index: u32, line: &ProgressLine, progress: &ProgressReporter) {
        if self.merging {
            return;
        }

        let overall = self.overall(line);
        let whole = overall.floor() as u32;
        if self.last_whole.is_some_and(|last| whole <= last) {
            return;
        }
        self.last_whole = Some(whole);

        if whole >= 100 {
            // Every stream is down; what follows is merge/remux
            self.emit_merging(item_index, progress);
        } else {
            progress.record(ProgressEvent::downloading(item_index, overall, line.speed.clone()));
        }
    }

    fn emit_merging(&mut self, item_index: u32, progress: &ProgressReporter) {
        if !self.merging {
            self.merging = true;
            progress.record(ProgressEvent::merging(item_index));
        }
    }
}

/// Map yt-dlp's stderr onto the error taxonomy
fn classify_failure(stderr: &str, code: Option<i32>) -> DownloadError {
    let lower = stderr.to_lowercase();
    let cause = last_error_line(stderr)
        .unwrap_or_else(|| format!("yt-dlp exited with code: {:?}", code));

    if lower.contains("requested format is not available")
        || lower.contains("requested format not available")
    {
        return DownloadError::FormatUnavailable(cause);
    }

    if lower.contains("ffmpeg")
        || lower.contains("postprocessing")
        || lower.contains("[merger]")
        || lower.contains("conversion failed")
        || lower.contains("remux")
    {
        return DownloadError::merge(cause);
    }

    DownloadError::fetch(cause)
}

/// Last `ERROR:` line, else the last non-empty line
fn last_error_line(stderr: &str) -> Option<String> {
    let lines: Vec<&str> = stderr.lines().map(str::trim).filter(|l| !l.is_empty()).collect();

    lines
        .iter()
        .rev()
        .find(|l| l.starts_with("ERROR:"))
        .or_else(|| lines.last())
        .map(|l| l.trim_start_matches("ERROR:").trim().to_string())
}

/// The merged file when `--print` gave us nothing usable
async fn find_produced_file(staging: &Path, ext: &str) -> Result<PathBuf> {
    let mut entries = tokio::fs::read_dir(staging).await?;
    let mut fallback = None;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".part") || name.ends_with(".ytdl") {
            continue;
        }
        if path.extension().is_some_and(|e| e == ext) {
            return Ok(path);
        }
        fallback.get_or_insert(path);
    }

    fallback.ok_or_else(|| DownloadError::merge("yt-dlp reported success but produced no file"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Phase;
    use serde_json::json;

    #[test]
    fn parses_flat_playlist() {
        let json = json!({
            "_type": "playlist",
            "title": "Road Trip",
            "entries": [
                {"id": "a", "title": "First", "url": "https://www.youtube.com/watch?v=a"},
                {"id": "b", "title": "Second", "url": "https://www.youtube.com/watch?v=b"},
                {"id": "c", "title": "[Private video]"},
                {"id": "d", "title": "Fourth", "url": "https://www.youtube.com/watch?v=d"}
            ]
        });

        let items = parse_playlist(&json);
        let indices: Vec<u32> = items.iter().map(|i| i.index).collect();

        assert_eq!(indices, vec![1, 2, 4]);
        assert!(items.iter().all(|i| i.playlist_name == "Road Trip"));
        assert_eq!(items[1].title, "Second");
    }

    #[test]
    fn playlist_index_wins_over_position() {
        let json = json!({
            "title": "Mix",
            "entries": [
                {"title": "x", "url": "https://e.com/x", "playlist_index": 5},
                {"title": "y", "url": "https://e.com/y", "playlist_index": 6}
            ]
        });

        let indices: Vec<u32> = parse_playlist(&json).iter().map(|i| i.index).collect();
        assert_eq!(indices, vec![5, 6]);
    }

    #[test]
    fn duplicate_indices_are_renumbered() {
        let json = json!({
            "title": "Mix",
            "entries": [
                {"title": "x", "url": "https://e.com/x", "playlist_index": 1},
                {"title": "y", "url": "https://e.com/y", "playlist_index": 1}
            ]
        });

        let indices: Vec<u32> = parse_playlist(&json).iter().map(|i| i.index).collect();
        assert_eq!(indices, vec![1, 2]);
    }

    #[test]
    fn single_video_becomes_one_item() {
        let json = json!({
            "id": "abc",
            "title": "Lonely Song",
            "webpage_url": "https://www.youtube.com/watch?v=abc"
        });

        let items = parse_playlist(&json);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].index, 1);
        assert_eq!(items[0].playlist_name, "playlist");
    }

    #[test]
    fn empty_entries_resolve_to_nothing() {
        let json = json!({"title": "Empty", "entries": []});
        assert!(parse_playlist(&json).is_empty());
    }

    #[test]
    fn parses_stream_kinds() {
        let json = json!({
            "formats": [
                {"format_id": "sb0", "ext": "mhtml", "vcodec": "none", "acodec": "none"},
                {"format_id": "140", "ext": "m4a", "vcodec": "none", "acodec": "mp4a.40.2", "abr": 129.5},
                {"format_id": "136", "ext": "mp4", "vcodec": "avc1.4d401f", "acodec": "none", "height": 720, "tbr": 1200.0},
                {"format_id": "18", "ext": "mp4", "vcodec": "avc1.42001E", "acodec": "mp4a.40.2", "height": 360},
                {"format_id": "http-720", "ext": "mp4", "height": 720}
            ]
        });

        let streams = parse_formats(&json);
        let kinds: Vec<(&str, StreamKind)> =
            streams.iter().map(|s| (s.id.as_str(), s.kind)).collect();

        assert_eq!(
            kinds,
            vec![
                ("140", StreamKind::Audio),
                ("136", StreamKind::Video),
                ("18", StreamKind::Combined),
                ("http-720", StreamKind::Combined),
            ]
        );
        assert_eq!(streams[0].bitrate_kbps, Some(129.5));
        assert_eq!(streams[1].height, Some(720));
    }

    #[test]
    fn parses_progress_template_lines() {
        let line = parse_progress_line("dl-progress 136  42.7% 1.20MiB/s").unwrap();
        assert_eq!(line.format_id, "136");
        assert_eq!(line.percent, 42.7);
        assert_eq!(line.speed.as_deref(), Some("1.20MiB/s"));

        let unknown = parse_progress_line("dl-progress 140 0.0% Unknown B/s").unwrap();
        assert_eq!(unknown.speed, None);

        assert!(parse_progress_line("[download] Destination: x.mp4").is_none());
        assert!(parse_progress_line("dl-progress 140 garbage").is_none());
    }

    #[test]
    fn tracker_maps_pair_onto_one_scale() {
        let reporter = ProgressReporter::new();
        let selection = FormatSelection::Pair { video: "136".into(), audio: "140".into() };
        let mut tracker = PercentTracker::new(&selection);

        let line = |id: &str, pct: f32| ProgressLine {
            format_id: id.into(),
            percent: pct,
            speed: None,
        };

        tracker.observe(7, &line("136", 50.0), &reporter);
        assert_eq!(reporter.latest(7).unwrap().percent, Some(25.0));

        // Same whole percent: no new event
        tracker.observe(7, &line("136", 50.5), &reporter);
        assert_eq!(reporter.latest(7).unwrap().percent, Some(25.0));

        tracker.observe(7, &line("140", 50.0), &reporter);
        assert_eq!(reporter.latest(7).unwrap().percent, Some(75.0));

        tracker.observe(7, &line("140", 100.0), &reporter);
        assert_eq!(reporter.latest(7).unwrap().phase, Phase::Merging);
    }

    #[test]
    fn classifies_failures() {
        let stderr = "ERROR: [youtube] abc: Requested format is not available. Use --list-formats";
        assert!(matches!(
            classify_failure(stderr, Some(1)),
            DownloadError::FormatUnavailable(_)
        ));

        let stderr = "ERROR: Postprocessing: Conversion failed!";
        assert!(matches!(classify_failure(stderr, Some(1)), DownloadError::Merge { .. }));

        let stderr = "WARNING: retrying\nERROR: unable to download video data: HTTP Error 403: Forbidden";
        match classify_failure(stderr, Some(1)) {
            DownloadError::Fetch { cause } => {
                assert_eq!(cause, "unable to download video data: HTTP Error 403: Forbidden")
            }
            other => panic!("unexpected {:?}", other),
        }

        assert!(matches!(classify_failure("", Some(2)), DownloadError::Fetch { .. }));
    }

    #[test]
    fn rejects_non_http_urls() {
        assert!(validate_url("https://www.youtube.com/playlist?list=PL123").is_ok());
        assert!(matches!(
            validate_url("ftp://example.com/list"),
            Err(DownloadError::Resolution { .. })
        ));
        assert!(matches!(validate_url("not a url"), Err(DownloadError::Resolution { .. })));
    }

    #[tokio::test]
    async fn finds_merged_file_when_print_is_missing() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("media.f136.mp4.part"), b"x").unwrap();
        std::fs::write(tmp.path().join("media.mp4"), b"merged").unwrap();

        let found = find_produced_file(tmp.path(), "mp4").await.unwrap();
        assert_eq!(found, tmp.path().join("media.mp4"));
    }

    #[tokio::test]
    async fn missing_binary_is_reported() {
        let extractor = YtDlpExtractor::new("/nonexistent/yt-dlp-binary");
        let err = extractor
            .resolve_playlist("https://www.youtube.com/playlist?list=PL123")
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::MissingDependency(_)));
    }

    /// Writes an executable stand-in for yt-dlp. `body` runs with `$dir` set
    /// to the staging directory taken from `-o`.
    #[cfg(unix)]
    fn fake_ytdlp(bin: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = bin.join("yt-dlp");
        let script = format!(
            "#!/bin/sh\nout=\"\"\nwhile [ $# -gt 0 ]; do\n  if [ \"$1\" = \"-o\" ]; then out=\"$2\"; fi\n  shift\ndone\ndir=$(dirname \"$out\")\n{}\n",
            body
        );
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    async fn fetch_pair(
        binary: &Path,
        output_path: &Path,
        progress: &ProgressReporter,
        cancel: &tokio_util::sync::CancellationToken,
    ) -> Result<()> {
        let extractor = YtDlpExtractor::new(binary.to_string_lossy());
        let item = crate::core::testing::item(1);
        let selection = FormatSelection::Pair {
            video: "136".into(),
            audio: "140".into(),
        };
        let spec = crate::types::FormatSpec::default();

        extractor
            .fetch_and_merge(FetchRequest {
                item: &item,
                selection: &selection,
                spec: &spec,
                output_path,
                progress,
                cancel,
            })
            .await
    }

    #[cfg(unix)]
    fn leftover_staging_dirs(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.to_string_lossy().ends_with(".staging"))
            .collect()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn downloads_pair_and_moves_printed_file_into_place() {
        let bin = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let binary = fake_ytdlp(
            bin.path(),
            r#"printf 'dl-progress 136 50.0%% 2.00MiB/s\n' >&2
printf 'dl-progress 136 100.0%% 2.00MiB/s\n' >&2
printf 'dl-progress 140 100.0%% 1.00MiB/s\n' >&2
printf '[Merger] Merging formats into "%s/media.mp4"\n' "$dir" >&2
printf 'merged' > "$dir/media.mp4"
printf 'dl-output:%s/media.mp4\n' "$dir""#,
        );
        let output = out.path().join("01 - Track 1.mp4");
        let progress = ProgressReporter::new();
        let cancel = tokio_util::sync::CancellationToken::new();

        fetch_pair(&binary, &output, &progress, &cancel).await.unwrap();

        assert_eq!(std::fs::read(&output).unwrap(), b"merged");
        assert!(leftover_staging_dirs(out.path()).is_empty());
        let last = progress.latest(1).unwrap();
        assert_eq!(last.phase, Phase::Finished);
        assert_eq!(progress.current_status().len(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_utf8_output_does_not_fail_the_download() {
        let bin = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let binary = fake_ytdlp(
            bin.path(),
            r#"printf 'WARNING: title \377\376 weird\n' >&2
printf 'merged' > "$dir/media.mp4"
printf 'dl-output:%s/media.mp4\n' "$dir""#,
        );
        let output = out.path().join("01 - Track 1.mp4");
        let progress = ProgressReporter::new();
        let cancel = tokio_util::sync::CancellationToken::new();

        let result = fetch_pair(&binary, &output, &progress, &cancel).await;

        tokio_test::assert_ok!(result);
        assert!(output.exists());
        assert!(leftover_staging_dirs(out.path()).is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_merge_leaves_nothing_behind() {
        let bin = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let binary = fake_ytdlp(
            bin.path(),
            r#"printf 'half' > "$dir/media.f136.mp4.part"
printf 'ERROR: Postprocessing: Conversion failed!\n' >&2
exit 1"#,
        );
        let output = out.path().join("01 - Track 1.mp4");
        let progress = ProgressReporter::new();
        let cancel = tokio_util::sync::CancellationToken::new();

        let err = fetch_pair(&binary, &output, &progress, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::Merge { .. }));
        assert!(err.to_string().contains("Conversion failed"));
        assert!(!output.exists());
        assert!(leftover_staging_dirs(out.path()).is_empty());
        assert_eq!(progress.latest(1).unwrap().phase, Phase::Error);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn http_failure_is_a_fetch_error() {
        let bin = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let binary = fake_ytdlp(
            bin.path(),
            r#"printf 'ERROR: unable to download video data: HTTP Error 403: Forbidden\n' >&2
exit 1"#,
        );
        let output = out.path().join("01 - Track 1.mp4");
        let progress = ProgressReporter::new();
        let cancel = tokio_util::sync::CancellationToken::new();

        let err = fetch_pair(&binary, &output, &progress, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::Fetch { .. }));
        assert!(!output.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancelling_mid_download_kills_the_process() {
        use std::sync::Arc;
        use std::time::{Duration, Instant};

        let bin = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let binary = fake_ytdlp(
            bin.path(),
            r#"printf 'partial' > "$dir/media.f136.mp4.part"
printf 'dl-progress 136 10.0%% 1.00MiB/s\n' >&2
exec sleep 30"#,
        );
        let output = out.path().join("01 - Track 1.mp4");
        let progress = Arc::new(ProgressReporter::new());
        let cancel = tokio_util::sync::CancellationToken::new();

        let canceller = {
            let progress = Arc::clone(&progress);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let deadline = Instant::now() + Duration::from_secs(10);
                while progress.latest(1).map(|e| e.phase) != Some(Phase::Downloading)
                    && Instant::now() < deadline
                {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                cancel.cancel();
            })
        };

        let started = Instant::now();
        let err = fetch_pair(&binary, &output, &progress, &cancel)
            .await
            .unwrap_err();
        canceller.await.unwrap();

        assert!(matches!(err, DownloadError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(20));
        assert!(!output.exists());
        assert!(leftover_staging_dirs(out.path()).is_empty());
    }
}
