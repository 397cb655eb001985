// crates/server/src/routes/jobs.rs
//! API routes for background jobs.
//!
//! - POST /jobs/delete - Start a batch delete by ids or by filter
//! - GET  /jobs/delete/progress/{job_id} - Poll a delete job
//! - POST /jobs/archive - Start building a ZIP download
//! - GET  /jobs/archive/progress/{job_id} - Poll an archive job
//! - GET  /jobs/archive/result/{job_id} - Stream the finished ZIP (single use)

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use nvr_server_jobs::{ArchiveRequest, DeleteRequest, FilterSpec, JobId, JobSnapshot};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_stream::StreamExt;
use tokio_util::io::ReaderStream;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DeleteJobBody {
    #[serde(default)]
    pub ids: Option<Vec<Value>>,
    #[serde(default)]
    pub filter: Option<FilterSpec>,
}

#[derive(Debug, Deserialize)]
pub struct ArchiveJobBody {
    pub ids: Vec<Value>,
    #[serde(default)]
    pub filename: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct JobStartedResponse {
    pub job_id: JobId,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

impl JobStartedResponse {
    fn started(job_id: JobId, total: Option<u64>) -> Self {
        Self {
            job_id,
            status: "started",
            total,
        }
    }
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    body.map(|Json(value)| value)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

/// Every element must be an integer id.
pub(crate) fn parse_ids(values: &[Value]) -> ApiResult<Vec<i64>> {
    values
        .iter()
        .enumerate()
        .map(|(i, value)| {
            value
                .as_i64()
                .ok_or_else(|| ApiError::BadRequest(format!("Invalid recording id at index {i}")))
        })
        .collect()
}

/// Unparseable ids cannot name a live job, so they are reported as unknown.
fn parse_job_id(raw: &str) -> ApiResult<JobId> {
    raw.parse().map_err(|_| ApiError::JobNotFound(raw.to_string()))
}

/// POST /api/jobs/delete - Start a batch delete.
async fn start_delete(
    State(state): State<Arc<AppState>>,
    body: Result<Json<DeleteJobBody>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let body = json_body(body)?;
    let request = match (body.ids, body.filter) {
        (Some(ids), _) => DeleteRequest::Ids(parse_ids(&ids)?),
        (None, Some(filter)) => DeleteRequest::Filter(filter.into_filter()?),
        (None, None) => {
            return Err(ApiError::BadRequest(
                "Request must contain 'ids' or 'filter'".to_string(),
            ))
        }
    };

    let job_id = state.jobs.delete.submit(request)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(JobStartedResponse::started(job_id, None)),
    ))
}

/// GET /api/jobs/delete/progress/{job_id}
async fn delete_progress(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobSnapshot>> {
    let id = parse_job_id(&job_id)?;
    Ok(Json(state.jobs.delete.progress(id)?))
}

/// POST /api/jobs/archive - Start building a ZIP of the given recordings.
async fn start_archive(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ArchiveJobBody>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let body = json_body(body)?;
    let ids = parse_ids(&body.ids)?;
    let ticket = state.jobs.archive.submit(ArchiveRequest {
        ids,
        filename: body.filename,
    })?;
    Ok((
        StatusCode::ACCEPTED,
        Json(JobStartedResponse::started(ticket.job_id, Some(ticket.total))),
    ))
}

/// GET /api/jobs/archive/progress/{job_id}
async fn archive_progress(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobSnapshot>> {
    let id = parse_job_id(&job_id)?;
    Ok(Json(state.jobs.archive.progress(id)?))
}

/// GET /api/jobs/archive/result/{job_id} - Stream the ZIP.
///
/// The download takes the artifact out of its slot, so a second request for
/// the same job gets 404. The response body holds the artifact until the
/// stream ends or the client goes away; the file is removed after that.
async fn archive_result(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Response> {
    let id = parse_job_id(&job_id)?;
    let download = state.jobs.archive.take_result(id)?;

    let file = tokio::fs::File::open(download.artifact.path())
        .await
        .map_err(|e| {
            ApiError::Internal(format!(
                "Failed to open archive {}: {e}",
                download.artifact.path().display()
            ))
        })?;

    let len = download.artifact.len();
    let disposition = format!("attachment; filename=\"{}\"", download.filename);
    let artifact = download.artifact;
    let stream = ReaderStream::new(file).map(move |chunk| {
        let _artifact = &artifact;
        chunk
    });

    tracing::info!(job_id = %id, bytes = len, "streaming archive");

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/zip")
        .header(header::CONTENT_DISPOSITION, disposition)
        .header(header::CONTENT_LENGTH, len)
        .body(Body::from_stream(stream))
        .map_err(|e| ApiError::Internal(format!("Failed to build archive response: {e}")))
}

/// Build the jobs router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/jobs/delete", post(start_delete))
        .route("/jobs/delete/progress/{job_id}", get(delete_progress))
        .route("/jobs/archive", post(start_archive))
        .route("/jobs/archive/progress/{job_id}", get(archive_progress))
        .route("/jobs/archive/result/{job_id}", get(archive_result))
}
