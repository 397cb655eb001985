// crates/server/src/routes/recordings.rs
//! Per-recording endpoints.
//!
//! - DELETE /recordings/{id} - Delete one recording synchronously
//! - GET    /recordings/{id}/thumbnail/{index} - JPEG frame, generated on demand

use std::path::Path as FsPath;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get},
    Json, Router,
};
use nvr_server_jobs::thumbnail::{seek_seconds, thumbnail_path, THUMBNAIL_COUNT};
use nvr_server_jobs::{
    delete_recording, DeleteItemError, DeleteOutcome, SubmitError, ThumbnailRequest,
};
use serde::Serialize;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const THUMBNAIL_RETRY_AFTER_SECS: u64 = 2;

#[derive(Debug, Serialize)]
pub struct DeleteRecordingResponse {
    pub success: bool,
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<&'static str>,
}

fn parse_recording_id(raw: &str) -> ApiResult<i64> {
    match raw.parse::<i64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(ApiError::BadRequest(format!("Invalid recording ID: {raw}"))),
    }
}

fn parse_thumbnail_index(raw: &str) -> ApiResult<u8> {
    match raw.parse::<u8>() {
        Ok(index) if index < THUMBNAIL_COUNT => Ok(index),
        _ => Err(ApiError::BadRequest(format!(
            "Invalid thumbnail index: {raw} (expected 0-{})",
            THUMBNAIL_COUNT - 1
        ))),
    }
}

/// DELETE /api/recordings/{id}
async fn delete_one(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<DeleteRecordingResponse>> {
    let id = parse_recording_id(&id)?;
    let outcome = delete_recording(&state.db, state.storage_path(), id)
        .await
        .map_err(|e| match e {
            DeleteItemError::NotFound(id) => ApiError::RecordingNotFound(id),
            DeleteItemError::Database(db) => ApiError::Database(db),
        })?;

    tracing::info!(recording_id = id, ?outcome, "recording deleted");
    Ok(Json(DeleteRecordingResponse {
        success: true,
        id,
        warning: (outcome == DeleteOutcome::FileNotRemoved)
            .then_some("Recording removed from database but its file could not be deleted"),
    }))
}

/// Read a cached thumbnail if it exists and is non-empty.
async fn read_cached(path: &FsPath) -> Option<Vec<u8>> {
    match tokio::fs::read(path).await {
        Ok(bytes) if !bytes.is_empty() => Some(bytes),
        _ => None,
    }
}

fn jpeg_response(bytes: Vec<u8>) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "image/jpeg"),
            (header::CACHE_CONTROL, "public, max-age=86400"),
        ],
        bytes,
    )
        .into_response()
}

/// GET /api/recordings/{id}/thumbnail/{index}
///
/// Serves from `<storage>/thumbnails` when possible. Otherwise a worker
/// extracts the frame and this request waits for its completion.
async fn thumbnail(
    State(state): State<Arc<AppState>>,
    Path((id, index)): Path<(String, String)>,
) -> ApiResult<Response> {
    if !state.generate_thumbnails {
        return Err(ApiError::Forbidden("Thumbnail generation is disabled".to_string()));
    }
    let id = parse_recording_id(&id)?;
    let index = parse_thumbnail_index(&index)?;

    let output = thumbnail_path(state.storage_path(), id, index);
    if let Some(bytes) = read_cached(&output).await {
        return Ok(jpeg_response(bytes));
    }

    let recording = state
        .db
        .get_recording(id)
        .await?
        .ok_or(ApiError::RecordingNotFound(id))?;
    if tokio::fs::metadata(&recording.file_path).await.is_err() {
        return Err(ApiError::NotFound(format!(
            "Recording file not found: {}",
            recording.file_path
        )));
    }

    let request = ThumbnailRequest {
        recording_id: id,
        index,
        input: recording.file_path.clone().into(),
        output,
        seek_secs: seek_seconds(index, recording.duration_secs()),
    };
    let completion = state.jobs.thumbnails.submit(request).map_err(|e| match e {
        SubmitError::Capacity(message) => ApiError::ServiceUnavailable {
            message,
            retry_after: Some(THUMBNAIL_RETRY_AFTER_SECS),
        },
        other => other.into(),
    })?;

    let path = match completion.await {
        Ok(Ok(path)) => path,
        Ok(Err(e)) => {
            return Err(ApiError::Internal(format!(
                "Thumbnail generation failed for recording {id}: {e}"
            )))
        }
        Err(_) => {
            return Err(ApiError::Internal(format!(
                "Thumbnail worker for recording {id} went away"
            )))
        }
    };

    let bytes = read_cached(&path).await.ok_or_else(|| {
        ApiError::Internal(format!("Thumbnail missing after generation: {}", path.display()))
    })?;
    Ok(jpeg_response(bytes))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/recordings/{id}", delete(delete_one))
        .route("/recordings/{id}/thumbnail/{index}", get(thumbnail))
}
