//! HTTP handlers

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::progress::ProgressReporter;
use crate::error::{DownloadError, ErrorCode};
use crate::server::AppState;
use crate::types::{BatchResult, OverallStatus, PlaylistRequest};

pub const LIVENESS_MESSAGE: &str = "YouTube Playlist Downloader Backend is running!";
pub const MISSING_URL_MESSAGE: &str = "Invalid request: 'playlist_url' is required.";

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    code: Option<ErrorCode>,
}

impl ApiError {
    fn job_not_found(id: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: format!("No job with id {}", id),
            code: None,
        }
    }
}

impl From<DownloadError> for ApiError {
    fn from(e: DownloadError) -> Self {
        // Bad input gets the bare message, batch failures carry a code
        let (status, code) = match &e {
            DownloadError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, None),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, Some(e.code())),
        };
        Self {
            status,
            message: e.to_string(),
            code,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<ErrorCode>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            message: self.message,
            code: self.code,
        });
        (self.status, body).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Serialize)]
struct BatchResponse {
    message: String,
    result: BatchResult,
}

/// Accepts any body; only a JSON object with a non-empty string
/// `playlist_url` gets through.
fn missing_url() -> DownloadError {
    DownloadError::InvalidRequest("'playlist_url' is required.".into())
}

fn playlist_request(body: Result<Json<Value>, JsonRejection>) -> ApiResult<PlaylistRequest> {
    let Ok(Json(body)) = body else {
        return Err(missing_url().into());
    };

    match body.get("playlist_url").and_then(Value::as_str).map(str::trim) {
        Some(url) if !url.is_empty() => Ok(PlaylistRequest { url: url.to_string() }),
        _ => Err(missing_url().into()),
    }
}

pub async fn index() -> &'static str {
    LIVENESS_MESSAGE
}

pub async fn download(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Response> {
    let request = playlist_request(body)?;
    info!(url = %request.url, "download requested");

    let progress = ProgressReporter::new();
    let cancel = CancellationToken::new();
    // Fires if axum drops this future because the client went away
    let _disconnect = cancel.clone().drop_guard();

    let run = state.orchestrator.run(&request, &progress, &cancel);
    tokio::pin!(run);

    let result = tokio::select! {
        result = &mut run => result,
        _ = tokio::time::sleep(state.request_timeout) => {
            warn!(url = %request.url, timeout = ?state.request_timeout, "request timed out, cancelling batch");
            cancel.cancel();
            run.await
        }
    }?;

    let status = match result.overall_status {
        OverallStatus::TotalFailure => StatusCode::INTERNAL_SERVER_ERROR,
        OverallStatus::AllSucceeded | OverallStatus::PartialFailure => StatusCode::OK,
    };
    let body = BatchResponse {
        message: result.summary(),
        result,
    };

    Ok((status, Json(body)).into_response())
}

pub async fn submit_job(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Response> {
    let request = playlist_request(body)?;
    let batch_id = state.jobs.submit(state.orchestrator.clone(), request);

    Ok((StatusCode::ACCEPTED, Json(json!({ "batch_id": batch_id }))).into_response())
}

pub async fn get_job(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Response> {
    let view = Uuid::parse_str(&id)
        .ok()
        .and_then(|batch_id| state.jobs.get(&batch_id))
        .ok_or_else(|| ApiError::job_not_found(&id))?;

    Ok(Json(view).into_response())
}

pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let batch_id = Uuid::parse_str(&id).map_err(|_| ApiError::job_not_found(&id))?;
    if !state.jobs.cancel(&batch_id) {
        return Err(ApiError::job_not_found(&id));
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "batch_id": batch_id, "cancel_requested": true })),
    )
        .into_response())
}
