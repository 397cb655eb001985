// crates/server-jobs/src/lib.rs
//! Background job subsystem for the NVR web API.
//!
//! Long-running work (bulk deletes, ZIP archives, thumbnails) runs on
//! supervised worker tasks. Delete and archive jobs are tracked in small
//! fixed-capacity tables that clients poll by job id; thumbnail results are
//! handed straight back to the waiting request through a completion queue.

pub mod archive;
pub mod archive_job;
pub mod config;
pub mod delete;
pub mod delivery;
pub mod filter;
pub mod id;
pub mod limiter;
pub mod metrics;
pub mod progress;
pub mod supervisor;
pub mod system;
pub mod table;
pub mod thumbnail;
pub mod types;

pub use archive::{ArchiveArtifact, ArchiveSource, ArchiveSummary};
pub use archive_job::{ArchiveDownload, ArchiveJobs, ArchiveRequest, ArchiveTicket};
pub use config::{ArchiveConfig, DeleteConfig, JobsConfig, ThumbnailConfig};
pub use delete::{delete_recording, DeleteItemError, DeleteJobs, DeleteOutcome, DeleteRequest};
pub use filter::FilterSpec;
pub use progress::ProgressReporter;
pub use supervisor::JobSupervisor;
pub use system::{ActiveWorkers, JobSystem};
pub use table::{JobTable, TableConfig};
pub use thumbnail::{
    FfmpegExtractor, FrameExtractor, ThumbnailError, ThumbnailOutcome, ThumbnailRequest,
    ThumbnailWorkers,
};
pub use types::{JobError, JobId, JobKind, JobSnapshot, JobStatus, SubmitError};
