// crates/server-jobs/src/system.rs
//! Wiring for the whole subsystem.

use std::sync::Arc;

use nvr_db::Database;
use tracing::info;

use crate::archive_job::ArchiveJobs;
use crate::config::JobsConfig;
use crate::delete::DeleteJobs;
use crate::supervisor::JobSupervisor;
use crate::thumbnail::{FfmpegExtractor, FrameExtractor, ThumbnailWorkers};

/// Worker counts by kind, for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ActiveWorkers {
    pub delete: usize,
    pub archive: usize,
    pub thumbnail: usize,
}

/// Every job table, worker pool and the supervisor behind them.
///
/// Constructed once at startup and shared by reference; there is no global
/// state. Must be built inside a Tokio runtime.
pub struct JobSystem {
    pub delete: DeleteJobs,
    pub archive: ArchiveJobs,
    pub thumbnails: ThumbnailWorkers,
    supervisor: Arc<JobSupervisor>,
    config: JobsConfig,
}

impl JobSystem {
    /// Build with the `ffmpeg` extractor from `config`.
    pub fn new(db: Database, config: JobsConfig) -> Self {
        let extractor = FfmpegExtractor::new(
            config.thumbnail.ffmpeg_program.clone(),
            config.thumbnail.timeout,
        );
        Self::with_extractor(db, config, Arc::new(extractor))
    }

    pub fn with_extractor(
        db: Database,
        config: JobsConfig,
        extractor: Arc<dyn FrameExtractor>,
    ) -> Self {
        let supervisor = Arc::new(JobSupervisor::new());
        let delete = DeleteJobs::new(
            db.clone(),
            &config.delete,
            config.storage_path.clone(),
            Arc::clone(&supervisor),
        );
        let archive = ArchiveJobs::new(
            db,
            &config.archive,
            config.temp_dir.clone(),
            Arc::clone(&supervisor),
        );
        let thumbnails = ThumbnailWorkers::new(&config.thumbnail, extractor, Arc::clone(&supervisor));
        Self {
            delete,
            archive,
            thumbnails,
            supervisor,
            config,
        }
    }

    pub fn config(&self) -> &JobsConfig {
        &self.config
    }

    pub fn active_workers(&self) -> ActiveWorkers {
        ActiveWorkers {
            delete: self.delete.active_workers(),
            archive: self.archive.active_workers(),
            thumbnail: self.thumbnails.active_workers(),
        }
    }

    /// Stop accepting jobs and wait (bounded by the configured timeout) for
    /// in-flight workers. Returns `true` if all of them finished.
    pub async fn shutdown(&self) -> bool {
        info!(in_flight = self.supervisor.in_flight(), "job system shutting down");
        self.supervisor.shutdown(self.config.shutdown_timeout).await
    }
}
