//! HTTP service
//!
//! `POST /download` runs a batch inside the request; `/jobs` runs it in the
//! background and lets clients poll by batch id.

pub mod handlers;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::core::extractor::Extractor;
use crate::core::orchestrator::Orchestrator;
use crate::error::Result;
use crate::storage::jobs::JobRegistry;
use crate::types::Config;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub jobs: Arc<JobRegistry>,
    /// Upper bound for a synchronous `/download` call
    pub request_timeout: Duration,
}

impl AppState {
    pub fn from_config(config: &Config, extractor: Arc<dyn Extractor>) -> Self {
        Self {
            orchestrator: Arc::new(Orchestrator::from_config(config, extractor)),
            jobs: Arc::new(JobRegistry::new(Duration::from_secs(config.job_ttl_secs))),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handlers::index))
        .route("/download", post(handlers::download))
        .route("/jobs", post(handlers::submit_job))
        .route(
            "/jobs/{id}",
            get(handlers::get_job).delete(handlers::cancel_job),
        )
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Serve until `shutdown` fires, then cancel whatever jobs are still running
pub async fn serve(bind: &str, state: AppState, shutdown: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(bind).await?;
    info!("listening on http://{}", listener.local_addr()?);

    let jobs = Arc::clone(&state.jobs);
    let sweeper = jobs.spawn_sweeper(SWEEP_INTERVAL, shutdown.clone());

    let stop = shutdown.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { stop.cancelled().await })
        .await?;

    shutdown.cancel();
    jobs.cancel_all();
    let _ = sweeper.await;
    info!(pending_jobs = jobs.len(), "server stopped");
    Ok(())
}
