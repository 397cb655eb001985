// crates/server/src/lib.rs
//! NVR server library.
//!
//! Axum HTTP surface over the recording store and the background job
//! subsystem: batch deletes, ZIP downloads and on-demand thumbnails.

pub mod config;
pub mod error;
pub mod metrics;
pub mod routes;
pub mod state;

pub use config::{Cli, ServerConfig};
pub use error::*;
pub use metrics::{init_metrics, render_metrics};
pub use routes::api_routes;
pub use state::AppState;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};

/// Create the Axum application with all routes and middleware.
///
/// This sets up:
/// - API routes under `/api` and `/metrics`
/// - CORS (allows any origin)
/// - Request tracing
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api_routes(state))
        .layer(cors)
        .layer(nvr_observability::http_trace_layer())
}

// ============================================================================
// Integration Tests
// ============================================================================
