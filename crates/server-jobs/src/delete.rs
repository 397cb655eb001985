// crates/server-jobs/src/delete.rs
//! Bulk recording deletion.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use nvr_db::{Database, DbError, RecordingFilter, RecordingRow};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::DeleteConfig;
use crate::limiter::WorkerLimiter;
use crate::metrics;
use crate::progress::ProgressReporter;
use crate::supervisor::JobSupervisor;
use crate::table::{JobTable, TableConfig};
use crate::thumbnail::{thumbnail_path, THUMBNAIL_COUNT};
use crate::types::{JobError, JobId, JobKind, JobSnapshot, JobStatus, SubmitError};

/// What to delete.
#[derive(Debug, Clone)]
pub enum DeleteRequest {
    /// Explicit ids, processed in the given order.
    Ids(Vec<i64>),
    /// Every complete recording matching the filter, in ascending id order.
    Filter(RecordingFilter),
}

/// How a single deletion went. The row is gone in both cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The row was removed but its backing file could not be.
    FileNotRemoved,
}

#[derive(Debug, Error)]
pub enum DeleteItemError {
    #[error("recording {0} not found")]
    NotFound(i64),

    #[error(transparent)]
    Database(#[from] DbError),
}

/// Delete one recording by id: row first, then the backing file, then any
/// cached thumbnails.
pub async fn delete_recording(
    db: &Database,
    storage_path: &Path,
    id: i64,
) -> Result<DeleteOutcome, DeleteItemError> {
    let recording = db
        .get_recording(id)
        .await?
        .ok_or(DeleteItemError::NotFound(id))?;
    delete_loaded(db, storage_path, &recording).await
}

async fn delete_loaded(
    db: &Database,
    storage_path: &Path,
    recording: &RecordingRow,
) -> Result<DeleteOutcome, DeleteItemError> {
    // Row first. A failed unlink below never brings it back.
    if !db.delete_recording(recording.id).await? {
        return Err(DeleteItemError::NotFound(recording.id));
    }

    let outcome = match tokio::fs::remove_file(&recording.file_path).await {
        Ok(()) => {
            debug!(recording_id = recording.id, path = %recording.file_path, "recording file deleted");
            DeleteOutcome::Deleted
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(recording_id = recording.id, path = %recording.file_path, "recording file does not exist");
            DeleteOutcome::FileNotRemoved
        }
        Err(e) => {
            warn!(recording_id = recording.id, path = %recording.file_path, "failed to delete recording file: {e}");
            DeleteOutcome::FileNotRemoved
        }
    };

    for index in 0..THUMBNAIL_COUNT {
        let thumb = thumbnail_path(storage_path, recording.id, index);
        match tokio::fs::remove_file(&thumb).await {
            Ok(()) => debug!(path = %thumb.display(), "thumbnail deleted"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %thumb.display(), "failed to delete thumbnail: {e}"),
        }
    }

    Ok(outcome)
}

/// Submission front-end and worker body for delete jobs.
pub struct DeleteJobs {
    db: Database,
    table: Arc<JobTable<()>>,
    limiter: WorkerLimiter,
    supervisor: Arc<JobSupervisor>,
    storage_path: PathBuf,
    progress_every: u64,
    page_size: u32,
}

#[derive(Clone)]
struct DeleteContext {
    db: Database,
    storage_path: PathBuf,
    progress_every: u64,
    page_size: u32,
}

impl DeleteJobs {
    pub fn new(
        db: Database,
        config: &DeleteConfig,
        storage_path: PathBuf,
        supervisor: Arc<JobSupervisor>,
    ) -> Self {
        let table = JobTable::new(TableConfig {
            name: "delete",
            capacity: config.capacity,
            retention: config.retention,
            completion_message: "Batch delete operation complete",
        });
        Self {
            db,
            table: Arc::new(table),
            limiter: WorkerLimiter::new(JobKind::Delete, config.max_workers),
            supervisor,
            storage_path,
            progress_every: config.progress_every.max(1),
            page_size: config.page_size.max(1),
        }
    }

    /// Validate, allocate a job and start its worker. Returns without
    /// waiting for any deletion.
    pub fn submit(&self, request: DeleteRequest) -> Result<JobId, SubmitError> {
        let result = self.try_submit(request);
        match &result {
            Ok(_) => metrics::job_submitted(JobKind::Delete),
            Err(e) => metrics::job_rejected(JobKind::Delete, e.reason()),
        }
        result
    }

    fn try_submit(&self, request: DeleteRequest) -> Result<JobId, SubmitError> {
        let (total, message) = match &request {
            DeleteRequest::Ids(ids) if ids.is_empty() => {
                return Err(SubmitError::Validation("Empty 'ids' array".to_string()));
            }
            DeleteRequest::Ids(ids) => (
                ids.len() as u64,
                format!("Preparing to delete {} recordings...", ids.len()),
            ),
            DeleteRequest::Filter(_) => (0, "Preparing to delete recordings by filter...".to_string()),
        };

        if self.supervisor.is_shutting_down() {
            return Err(SubmitError::ShuttingDown);
        }
        let busy = || SubmitError::Capacity("Too many concurrent delete operations".to_string());
        let permit = self.limiter.try_acquire().ok_or_else(busy)?;
        let id = self.table.create(total, message, ()).map_err(|e| {
            debug!("{e}");
            busy()
        })?;

        let reporter = ProgressReporter::new(Arc::clone(&self.table), id);
        let ctx = DeleteContext {
            db: self.db.clone(),
            storage_path: self.storage_path.clone(),
            progress_every: self.progress_every,
            page_size: self.page_size,
        };
        let spawned = self.supervisor.spawn(async move {
            let _permit = permit;
            let started = Instant::now();
            let status = match request {
                DeleteRequest::Ids(ids) => run_ids(&ctx, &reporter, &ids).await,
                DeleteRequest::Filter(filter) => run_filter(&ctx, &reporter, &filter).await,
            };
            metrics::job_finished(JobKind::Delete, status, started.elapsed());
        });
        if let Err(e) = spawned {
            let _ = self.table.fail(id, e.to_string());
            return Err(e);
        }

        info!(job_id = %id, total, "batch delete job started");
        Ok(id)
    }

    pub fn progress(&self, id: JobId) -> Result<JobSnapshot, JobError> {
        self.table.get(id)
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    pub fn active_workers(&self) -> usize {
        self.limiter.active()
    }

    pub fn table(&self) -> &Arc<JobTable<()>> {
        &self.table
    }
}

#[derive(Default)]
struct Tally {
    succeeded: u64,
    failed: u64,
}

impl Tally {
    async fn delete(&mut self, ctx: &DeleteContext, job_id: JobId, recording: &RecordingRow) {
        match delete_loaded(&ctx.db, &ctx.storage_path, recording).await {
            Ok(_) => self.succeeded += 1,
            Err(e) => {
                warn!(job_id = %job_id, recording_id = recording.id, "delete failed: {e}");
                self.failed += 1;
            }
        }
    }

    fn report(&self, ctx: &DeleteContext, reporter: &ProgressReporter<()>, done: u64, total: u64) {
        if done % ctx.progress_every == 0 || done == total {
            let _ = reporter.report_progress(
                done,
                self.succeeded,
                self.failed,
                format!("Deleting recordings... {done}/{total}"),
            );
        }
    }
}

async fn run_ids(ctx: &DeleteContext, reporter: &ProgressReporter<()>, ids: &[i64]) -> JobStatus {
    let job_id = reporter.job_id();
    let total = ids.len() as u64;
    let _ = reporter.report_progress(0, 0, 0, "Starting batch delete operation...");

    let mut tally = Tally::default();
    for (i, &id) in ids.iter().enumerate() {
        match ctx.db.get_recording(id).await {
            Ok(Some(recording)) => tally.delete(ctx, job_id, &recording).await,
            Ok(None) => {
                warn!(job_id = %job_id, recording_id = id, "recording not found");
                tally.failed += 1;
            }
            Err(e) => {
                warn!(job_id = %job_id, recording_id = id, "failed to load recording: {e}");
                tally.failed += 1;
            }
        }
        tally.report(ctx, reporter, i as u64 + 1, total);
    }

    info!(
        job_id = %job_id,
        succeeded = tally.succeeded,
        failed = tally.failed,
        "batch delete complete"
    );
    let _ = reporter.report_complete(tally.succeeded, tally.failed);
    JobStatus::Complete
}

async fn run_filter(
    ctx: &DeleteContext,
    reporter: &ProgressReporter<()>,
    filter: &RecordingFilter,
) -> JobStatus {
    let job_id = reporter.job_id();
    let _ = reporter.report_progress(0, 0, 0, "Loading recordings to delete...");

    let total = match ctx.db.count_recordings(filter).await {
        Ok(total) => total,
        Err(e) => {
            error!(job_id = %job_id, "failed to count recordings: {e}");
            let _ = reporter.report_error(format!("Failed to load recordings: {e}"));
            return JobStatus::Error;
        }
    };
    if total == 0 {
        info!(job_id = %job_id, "no recordings match filter");
        let _ = reporter.report_complete(0, 0);
        return JobStatus::Complete;
    }
    let _ = reporter.report_total(total, format!("Deleting recordings... 0/{total}"));

    let mut tally = Tally::default();
    let mut done: u64 = 0;
    let mut after_id: i64 = 0;
    'pages: while done < total {
        let page = match ctx
            .db
            .list_recordings_after(filter, after_id, ctx.page_size)
            .await
        {
            Ok(page) => page,
            Err(e) => {
                error!(job_id = %job_id, after_id, "failed to load recordings page: {e}");
                let _ = reporter.report_error(format!("Failed to load recordings: {e}"));
                return JobStatus::Error;
            }
        };
        if page.is_empty() {
            break;
        }
        for recording in &page {
            after_id = recording.id;
            tally.delete(ctx, job_id, recording).await;
            done += 1;
            tally.report(ctx, reporter, done, total);
            if done >= total {
                break 'pages;
            }
        }
    }

    info!(
        job_id = %job_id,
        total,
        succeeded = tally.succeeded,
        failed = tally.failed,
        "filtered delete complete"
    );
    let _ = reporter.report_complete(tally.succeeded, tally.failed);
    JobStatus::Complete
}
