//! playlist-dl - download whole playlists, one merged file per item
//!
//! Runs as an HTTP service by default; `download` runs a single batch in the
//! terminal.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use playlist_dl::core::extractor::Extractor;
use playlist_dl::core::orchestrator::Orchestrator;
use playlist_dl::core::progress::ProgressReporter;
use playlist_dl::core::ytdlp::YtDlpExtractor;
use playlist_dl::server::{self, AppState};
use playlist_dl::storage::config::{self, Overrides};
use playlist_dl::types::{Config, ContainerFormat, OverallStatus, PlaylistRequest};
use playlist_dl::ui::progress::{print_error, print_summary, render};

/// Download whole playlists over HTTP. One item, one merged file.
#[derive(Parser, Debug)]
#[command(name = "playlist-dl")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Config file (default: $XDG_CONFIG_HOME/playlist-dl/config.json)
    #[arg(long, global = true, env = "PLAYLIST_DL_CONFIG")]
    config: Option<PathBuf>,

    /// Root directory for downloaded media
    #[arg(short, long, global = true, env = "PLAYLIST_DL_OUTPUT_DIR")]
    output_dir: Option<String>,

    /// Video height ceiling in pixels
    #[arg(long, global = true, env = "PLAYLIST_DL_MAX_HEIGHT")]
    max_height: Option<u32>,

    /// Container for merged files
    #[arg(long, global = true, value_enum, env = "PLAYLIST_DL_CONTAINER")]
    container: Option<ContainerFormat>,

    /// Items processed at once
    #[arg(short, long, global = true, env = "PLAYLIST_DL_WORKERS")]
    workers: Option<usize>,

    /// yt-dlp binary to run
    #[arg(long, global = true, env = "PLAYLIST_DL_YTDLP_PATH")]
    ytdlp_path: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service (default)
    Serve {
        /// Listen address, e.g. 0.0.0.0:5000
        #[arg(long, env = "PLAYLIST_DL_BIND")]
        bind: Option<String>,
    },

    /// Download one playlist in the foreground
    Download {
        /// Playlist (or single video) URL
        url: String,
    },

    /// Print the effective configuration
    Config {
        /// Also write it to the config file
        #[arg(long)]
        save: bool,
    },
}

fn init_tracing(default_filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Serve { bind: None });

    // Log lines would tear through the progress bars
    match command {
        Command::Serve { .. } => init_tracing("playlist_dl=info,tower_http=info"),
        _ => init_tracing("playlist_dl=warn"),
    }

    let mut cfg = config::load_config(cli.config.as_deref()).await?;
    Overrides {
        output_dir: cli.output_dir,
        max_height: cli.max_height,
        container: cli.container,
        workers: cli.workers,
        ytdlp_path: cli.ytdlp_path,
        bind: match &command {
            Command::Serve { bind } => bind.clone(),
            _ => None,
        },
    }
    .apply(&mut cfg);
    cfg.validate()?;

    let extractor: Arc<dyn Extractor> = Arc::new(YtDlpExtractor::new(cfg.ytdlp_path.clone()));

    match command {
        Command::Serve { .. } => serve(cfg, extractor).await,
        Command::Download { url } => download(cfg, extractor, url).await,
        Command::Config { save } => {
            println!("{}", serde_json::to_string_pretty(&cfg)?);
            if save {
                let path = config::save_config(&cfg, cli.config.as_deref()).await?;
                eprintln!("{} {}", "Saved".green(), path.display());
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn serve(cfg: Config, extractor: Arc<dyn Extractor>) -> anyhow::Result<ExitCode> {
    info!(
        output_dir = %cfg.output_dir,
        max_height = cfg.max_height,
        container = %cfg.container,
        workers = cfg.workers,
        "starting"
    );

    let state = AppState::from_config(&cfg, extractor);
    let shutdown = CancellationToken::new();
    spawn_ctrl_c(shutdown.clone());

    server::serve(&cfg.bind, state, shutdown).await?;
    Ok(ExitCode::SUCCESS)
}

async fn download(
    cfg: Config,
    extractor: Arc<dyn Extractor>,
    url: String,
) -> anyhow::Result<ExitCode> {
    let orchestrator = Orchestrator::from_config(&cfg, extractor);
    let progress = Arc::new(ProgressReporter::new());
    let cancel = CancellationToken::new();
    spawn_ctrl_c(cancel.clone());

    let stop_render = CancellationToken::new();
    let renderer = tokio::spawn(render(Arc::clone(&progress), stop_render.clone()));

    let run = orchestrator
        .run(&PlaylistRequest { url }, &progress, &cancel)
        .await;

    stop_render.cancel();
    let _ = renderer.await;

    match run {
        Ok(result) => {
            print_summary(&result);
            Ok(match result.overall_status {
                OverallStatus::TotalFailure => ExitCode::FAILURE,
                _ => ExitCode::SUCCESS,
            })
        }
        Err(e) => {
            print_error(&e);
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Cancel `token` on the first Ctrl-C
fn spawn_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("interrupted, cancelling");
                token.cancel();
            }
            Err(e) => warn!("failed to listen for Ctrl-C: {}", e),
        }
    });
}
