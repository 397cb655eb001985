// crates/server/src/state.rs
//! Application state for the Axum server.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use nvr_db::Database;
use nvr_server_jobs::JobSystem;

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    /// Recording metadata store.
    pub db: Database,
    /// Job tables and worker pools.
    pub jobs: Arc<JobSystem>,
    /// When false the thumbnail endpoint answers 403.
    pub generate_thumbnails: bool,
}

impl AppState {
    pub fn new(db: Database, jobs: Arc<JobSystem>, generate_thumbnails: bool) -> Arc<Self> {
        Arc::new(Self {
            start_time: Instant::now(),
            db,
            jobs,
            generate_thumbnails,
        })
    }

    /// Get the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Recording files and the thumbnail cache live under here.
    pub fn storage_path(&self) -> &PathBuf {
        &self.jobs.config().storage_path
    }
}
