//! Terminal rendering for `playlist-dl download`
//!
//! Polls a [`ProgressReporter`] and mirrors it onto one indicatif bar per
//! item. Rendering never feeds back into the batch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;

use crate::core::progress::{ProgressReporter, ProgressSnapshot};
use crate::error::DownloadError;
use crate::types::{BatchResult, BatchState, OverallStatus, Phase, ProgressEvent};

const REFRESH: Duration = Duration::from_millis(150);

pub struct BatchView {
    multi: MultiProgress,
    status: ProgressBar,
    bars: HashMap<u32, ProgressBar>,
    style: ProgressStyle,
}

impl BatchView {
    pub fn new() -> Self {
        let multi = MultiProgress::new();

        let status = multi.add(ProgressBar::new_spinner());
        status.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        status.enable_steady_tick(Duration::from_millis(100));

        let style = ProgressStyle::default_bar()
            .template("{prefix:>5} [{bar:30.cyan/blue}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");

        Self {
            multi,
            status,
            bars: HashMap::new(),
            style,
        }
    }

    pub fn refresh(&mut self, snapshot: &ProgressSnapshot) {
        self.status.set_message(state_line(snapshot));

        for (index, event) in &snapshot.items {
            let bar = self.bars.entry(*index).or_insert_with(|| {
                let bar = self.multi.add(ProgressBar::new(100));
                bar.set_style(self.style.clone());
                bar.set_prefix(format!("#{:02}", index));
                bar
            });

            let (position, message) = describe(event);
            bar.set_position(position);
            bar.set_message(message);
            if event.is_terminal() && !bar.is_finished() {
                bar.finish();
            }
        }
    }

    pub fn finish(&self) {
        self.status.finish_and_clear();
    }
}

impl Default for BatchView {
    fn default() -> Self {
        Self::new()
    }
}

/// Redraw from `progress` until `stop` fires, then draw once more
pub async fn render(progress: Arc<ProgressReporter>, stop: CancellationToken) {
    let mut view = BatchView::new();
    let mut tick = tokio::time::interval(REFRESH);

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = tick.tick() => view.refresh(&progress.snapshot()),
        }
    }

    view.refresh(&progress.snapshot());
    view.finish();
}

fn state_line(snapshot: &ProgressSnapshot) -> String {
    let finished = snapshot.items.values().filter(|e| e.is_terminal()).count();
    match snapshot.state {
        BatchState::Idle | BatchState::Resolving => "Resolving playlist...".into(),
        BatchState::ResolutionFailed => "Resolution failed".into(),
        BatchState::ProcessingItems => {
            format!("Downloading {} of {} items", finished, snapshot.total_items)
        }
        BatchState::Aggregating | BatchState::Done => {
            format!("Finished {} items", snapshot.total_items)
        }
    }
}

/// Bar position and message for the latest event of an item
fn describe(event: &ProgressEvent) -> (u64, String) {
    let position = event.percent.unwrap_or(0.0).clamp(0.0, 100.0) as u64;
    match event.phase {
        Phase::Downloading => (position, event.speed.clone().unwrap_or_default()),
        Phase::Merging => (100, "merging".into()),
        Phase::Finished => (100, "done".green().to_string()),
        Phase::Error => (
            position,
            event.message.clone().unwrap_or_else(|| "failed".into()).red().to_string(),
        ),
    }
}

/// Per-item lines plus the one-line summary
pub fn print_summary(result: &BatchResult) {
    println!();
    for outcome in &result.outcomes {
        let label = format!("{:02} {}", outcome.item.index, outcome.item.title);
        if outcome.is_success() {
            println!(
                "{} {} {}",
                "✓".green(),
                label,
                outcome.output_path.as_deref().unwrap_or("").dimmed()
            );
        } else {
            println!(
                "{} {} {}",
                "✗".red(),
                label,
                outcome.error_detail.as_deref().unwrap_or("unknown error").red()
            );
        }
    }

    let summary = result.summary();
    let summary = match result.overall_status {
        OverallStatus::AllSucceeded => summary.green().bold(),
        OverallStatus::PartialFailure => summary.yellow().bold(),
        OverallStatus::TotalFailure => summary.red().bold(),
    };
    println!("\n{}", summary);
}

pub fn print_error(error: &DownloadError) {
    eprintln!("{} {}", "Error:".red().bold(), error);
}
