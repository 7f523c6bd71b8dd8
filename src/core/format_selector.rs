//! Format selection policy
//!
//! Pure function from the streams an extractor reports to the pair (or single
//! combined stream) that gets fetched. No I/O, so selections are reproducible.
//!
//! Policy, mirroring `bestvideo[height<=N]+bestaudio/best`:
//! 1. highest video-only stream with height <= ceiling, plus the highest
//!    bitrate audio-only stream;
//! 2. otherwise the best combined stream, preferring one under the ceiling;
//! 3. otherwise `NoAcceptableFormat`.

use std::cmp::Ordering;

use crate::error::{DownloadError, Result};
use crate::types::{FormatSelection, FormatSpec, StreamKind, StreamOption};

/// Select streams for one item
pub fn select(streams: &[StreamOption], spec: &FormatSpec) -> Result<FormatSelection> {
    let video = best_by(
        streams
            .iter()
            .filter(|s| s.kind == StreamKind::Video)
            .filter(|s| s.height.is_some_and(|h| h <= spec.max_height)),
        by_height_then_bitrate,
    );

    let audio = best_by(
        streams.iter().filter(|s| s.kind == StreamKind::Audio),
        by_bitrate,
    );

    if let (Some(video), Some(audio)) = (video, audio) {
        return Ok(FormatSelection::Pair {
            video: video.id.clone(),
            audio: audio.id.clone(),
        });
    }

    let combined: Vec<&StreamOption> = streams
        .iter()
        .filter(|s| s.kind == StreamKind::Combined)
        .collect();

    let within_ceiling = best_by(
        combined
            .iter()
            .copied()
            .filter(|s| s.height.is_some_and(|h| h <= spec.max_height)),
        by_height_then_bitrate,
    );

    within_ceiling
        .or_else(|| best_by(combined.iter().copied(), by_height_then_bitrate))
        .map(|s| FormatSelection::Combined { id: s.id.clone() })
        .ok_or(DownloadError::NoAcceptableFormat {
            max_height: spec.max_height,
        })
}

/// Max under `cmp`, ties broken by the lexically smallest id
fn best_by<'a>(
    streams: impl Iterator<Item = &'a StreamOption>,
    cmp: fn(&StreamOption, &StreamOption) -> Ordering,
) -> Option<&'a StreamOption> {
    streams.max_by(|a, b| cmp(a, b).then_with(|| b.id.cmp(&a.id)))
}

fn by_height_then_bitrate(a: &StreamOption, b: &StreamOption) -> Ordering {
    a.height
        .unwrap_or(0)
        .cmp(&b.height.unwrap_or(0))
        .then_with(|| by_bitrate(a, b))
}

fn by_bitrate(a: &StreamOption, b: &StreamOption) -> Ordering {
    a.bitrate_kbps
        .unwrap_or(0.0)
        .total_cmp(&b.bitrate_kbps.unwrap_or(0.0))
}
