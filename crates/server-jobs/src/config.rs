// crates/server-jobs/src/config.rs
//! Tunables for the job subsystem.

use std::path::PathBuf;
use std::time::Duration;

/// Subsystem configuration. `Default` gives the production values.
#[derive(Debug, Clone)]
pub struct JobsConfig {
    pub delete: DeleteConfig,
    pub archive: ArchiveConfig,
    pub thumbnail: ThumbnailConfig,
    /// Root of recording storage; cached thumbnails live in `<storage>/thumbnails`.
    pub storage_path: PathBuf,
    /// Where archive artifacts are written.
    pub temp_dir: PathBuf,
    /// Upper bound on waiting for in-flight workers at shutdown.
    pub shutdown_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct DeleteConfig {
    pub capacity: usize,
    pub retention: Duration,
    pub max_workers: usize,
    /// Report progress every this many items (and on the last one).
    pub progress_every: u64,
    /// Rows fetched per page when deleting by filter.
    pub page_size: u32,
}

#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    pub capacity: usize,
    pub retention: Duration,
    pub max_workers: usize,
    pub max_entries: usize,
    pub default_filename: String,
}

#[derive(Debug, Clone)]
pub struct ThumbnailConfig {
    pub max_workers: usize,
    pub timeout: Duration,
    pub ffmpeg_program: String,
}

impl Default for DeleteConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            retention: Duration::from_secs(300),
            max_workers: 10,
            progress_every: 10,
            page_size: 100,
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            capacity: 8,
            retention: Duration::from_secs(600),
            max_workers: 8,
            max_entries: 200,
            default_filename: "recordings.zip".to_string(),
        }
    }
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            timeout: Duration::from_secs(5),
            ffmpeg_program: "ffmpeg".to_string(),
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            delete: DeleteConfig::default(),
            archive: ArchiveConfig::default(),
            thumbnail: ThumbnailConfig::default(),
            storage_path: PathBuf::from("/var/lib/nvr/recordings"),
            temp_dir: std::env::temp_dir(),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}
