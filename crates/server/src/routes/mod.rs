// crates/server/src/routes/mod.rs
//! API route handlers for the NVR server.

pub mod health;
pub mod jobs;
pub mod metrics;
pub mod recordings;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Create the combined API router with all routes under /api prefix.
///
/// Routes:
/// - GET    /api/health - Health check with active worker counts
/// - POST   /api/jobs/delete - Start a batch delete (ids or filter)
/// - GET    /api/jobs/delete/progress/{job_id} - Poll a delete job
/// - POST   /api/jobs/archive - Start building a ZIP of recordings
/// - GET    /api/jobs/archive/progress/{job_id} - Poll an archive job
/// - GET    /api/jobs/archive/result/{job_id} - Download a finished archive (once)
/// - DELETE /api/recordings/{id} - Delete a single recording
/// - GET    /api/recordings/{id}/thumbnail/{index} - Cached or freshly generated thumbnail
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", health::router())
        .nest("/api", jobs::router())
        .nest("/api", recordings::router())
        .merge(metrics::router())
        .with_state(state)
}
