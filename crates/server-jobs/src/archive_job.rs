// crates/server-jobs/src/archive_job.rs
//! Batch download: resolve recordings, build a ZIP, hand it out once.

use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use nvr_db::Database;
use tracing::{debug, error, info, warn};

use crate::archive::{build_archive, ArchiveArtifact, ArchiveSource, ArchiveSummary, EntryOutcome};
use crate::config::ArchiveConfig;
use crate::limiter::WorkerLimiter;
use crate::metrics;
use crate::progress::ProgressReporter;
use crate::supervisor::JobSupervisor;
use crate::table::{JobTable, TableConfig};
use crate::types::{JobError, JobId, JobKind, JobSnapshot, JobStatus, SubmitError};

/// Per-job data stored in the archive table.
#[derive(Debug)]
pub struct ArchiveSlot {
    filename: String,
    artifact: Option<Arc<ArchiveArtifact>>,
}

/// A finished archive taken out of the table for streaming. Holding it keeps
/// the file on disk.
#[derive(Debug)]
pub struct ArchiveDownload {
    pub filename: String,
    pub artifact: Arc<ArchiveArtifact>,
}

#[derive(Debug, Clone)]
pub struct ArchiveRequest {
    pub ids: Vec<i64>,
    pub filename: Option<String>,
}

/// Accepted archive job.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveTicket {
    pub job_id: JobId,
    pub total: u64,
}

pub struct ArchiveJobs {
    db: Database,
    table: Arc<JobTable<ArchiveSlot>>,
    limiter: WorkerLimiter,
    supervisor: Arc<JobSupervisor>,
    temp_dir: PathBuf,
    max_entries: usize,
    default_filename: String,
}

impl ArchiveJobs {
    pub fn new(
        db: Database,
        config: &ArchiveConfig,
        temp_dir: PathBuf,
        supervisor: Arc<JobSupervisor>,
    ) -> Self {
        let table = JobTable::new(TableConfig {
            name: "archive",
            capacity: config.capacity,
            retention: config.retention,
            completion_message: "Archive ready for download",
        });
        Self {
            db,
            table: Arc::new(table),
            limiter: WorkerLimiter::new(JobKind::Archive, config.max_workers),
            supervisor,
            temp_dir,
            max_entries: config.max_entries,
            default_filename: config.default_filename.clone(),
        }
    }

    pub fn submit(&self, request: ArchiveRequest) -> Result<ArchiveTicket, SubmitError> {
        let result = self.try_submit(request);
        match &result {
            Ok(_) => metrics::job_submitted(JobKind::Archive),
            Err(e) => metrics::job_rejected(JobKind::Archive, e.reason()),
        }
        result
    }

    fn try_submit(&self, request: ArchiveRequest) -> Result<ArchiveTicket, SubmitError> {
        if request.ids.is_empty() || request.ids.len() > self.max_entries {
            return Err(SubmitError::Validation(format!(
                "ids must contain 1-{} entries",
                self.max_entries
            )));
        }
        if self.supervisor.is_shutting_down() {
            return Err(SubmitError::ShuttingDown);
        }
        let busy = || SubmitError::Capacity("Too many concurrent download jobs".to_string());
        let permit = self.limiter.try_acquire().ok_or_else(busy)?;

        let total = request.ids.len() as u64;
        let filename = sanitize_filename(request.filename.as_deref(), &self.default_filename);
        let slot = ArchiveSlot {
            filename,
            artifact: None,
        };
        let id = self
            .table
            .create(total, format!("Preparing archive of {total} recordings..."), slot)
            .map_err(|e| {
                debug!("{e}");
                busy()
            })?;

        let reporter = ProgressReporter::new(Arc::clone(&self.table), id);
        let db = self.db.clone();
        let temp_dir = self.temp_dir.clone();
        let ids = request.ids;
        let spawned = self.supervisor.spawn(async move {
            let _permit = permit;
            let started = Instant::now();
            let status = run(db, temp_dir, reporter, ids).await;
            metrics::job_finished(JobKind::Archive, status, started.elapsed());
        });
        if let Err(e) = spawned {
            let _ = self.table.fail(id, e.to_string());
            return Err(e);
        }

        info!(job_id = %id, total, "batch download job started");
        Ok(ArchiveTicket { job_id: id, total })
    }

    pub fn progress(&self, id: JobId) -> Result<JobSnapshot, JobError> {
        self.table.get(id)
    }

    /// Take the finished archive out of the table. The slot is freed; the
    /// file lives as long as the returned download (or any clone of its
    /// artifact).
    pub fn take_result(&self, id: JobId) -> Result<ArchiveDownload, JobError> {
        let slot = self.table.take_completed(id)?;
        match slot.artifact {
            Some(artifact) => Ok(ArchiveDownload {
                filename: slot.filename,
                artifact,
            }),
            None => {
                error!(job_id = %id, "completed archive job has no artifact");
                Err(JobError::NotFound(id))
            }
        }
    }

    pub fn active_workers(&self) -> usize {
        self.limiter.active()
    }

    pub fn table(&self) -> &Arc<JobTable<ArchiveSlot>> {
        &self.table
    }
}

async fn run(
    db: Database,
    temp_dir: PathBuf,
    reporter: ProgressReporter<ArchiveSlot>,
    ids: Vec<i64>,
) -> JobStatus {
    let job_id = reporter.job_id();
    let total = ids.len() as u64;
    let _ = reporter.report_progress(0, 0, 0, "Loading recordings...");

    let mut sources = Vec::with_capacity(ids.len());
    for id in ids {
        let source = match db.get_recording(id).await {
            Ok(Some(rec)) => Some(ArchiveSource::from_path(rec.file_path, rec.start_time)),
            Ok(None) => {
                warn!(job_id = %job_id, recording_id = id, "recording not found, skipping");
                None
            }
            Err(e) => {
                warn!(job_id = %job_id, recording_id = id, "failed to load recording, skipping: {e}");
                None
            }
        };
        sources.push(source);
    }

    let temp = match tempfile::Builder::new()
        .prefix("nvr-archive-")
        .suffix(".zip")
        .tempfile_in(&temp_dir)
    {
        Ok(temp) => temp,
        Err(e) => {
            error!(job_id = %job_id, dir = %temp_dir.display(), "failed to create temp file: {e}");
            let _ = reporter.report_error("Failed to create temp file");
            return JobStatus::Error;
        }
    };

    let progress = reporter.clone();
    let built = tokio::task::spawn_blocking(move || -> std::io::Result<(ArchiveSummary, tempfile::TempPath)> {
        let (file, path) = temp.into_parts();
        let mut written = 0u64;
        let mut skipped = 0u64;
        let mut out = BufWriter::new(file);
        let summary = build_archive(&mut out, &sources, |index, outcome| {
            match outcome {
                EntryOutcome::Written => written += 1,
                EntryOutcome::Skipped => skipped += 1,
            }
            let done = index as u64 + 1;
            let _ = progress.report_progress(
                done,
                written,
                skipped,
                format!("Adding recordings... {done}/{total}"),
            );
        })?;
        let file = out.into_inner().map_err(|e| e.into_error())?;
        file.set_len(summary.len)?;
        file.sync_all()?;
        Ok((summary, path))
    })
    .await;

    let (summary, path) = match built {
        Ok(Ok(done)) => done,
        Ok(Err(e)) => {
            error!(job_id = %job_id, "failed to write archive: {e}");
            let _ = reporter.report_error(format!("Failed to write archive: {e}"));
            return JobStatus::Error;
        }
        Err(e) => {
            error!(job_id = %job_id, "archive builder task failed: {e}");
            let _ = reporter.report_error("Archive builder crashed");
            return JobStatus::Error;
        }
    };

    let artifact = ArchiveArtifact::new(path, summary.len);
    info!(
        job_id = %job_id,
        entries = summary.written,
        skipped = summary.skipped,
        bytes = summary.len,
        path = %artifact.path().display(),
        "archive ready"
    );
    let _ = reporter.report_complete_with(summary.written, summary.skipped, |slot| {
        slot.artifact = Some(artifact);
    });
    JobStatus::Complete
}

/// Make a client-supplied name safe for `Content-Disposition`: path
/// separators, quotes and control characters are dropped, and an empty
/// result falls back to `default`.
pub fn sanitize_filename(raw: Option<&str>, default: &str) -> String {
    let cleaned: String = raw
        .unwrap_or_default()
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | '"') && !c.is_control())
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        default.to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nvr_db::NewRecording;
    use std::io::{Cursor, Read};
    use std::path::Path;
    use std::time::Duration;

    async fn wait_finished(jobs: &ArchiveJobs, id: JobId) -> JobSnapshot {
        for _ in 0..300 {
            let snap = jobs.progress(id).unwrap();
            if snap.complete {
                return snap;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("archive job {id} did not finish");
    }

    async fn seed(db: &Database, dir: &Path, name: &str, bytes: &[u8]) -> i64 {
        let path = dir.join(name);
        std::fs::write(&path, bytes).unwrap();
        db.insert_recording(&NewRecording::complete(
            "front",
            path.to_string_lossy(),
            1_700_000_000,
            1_700_000_060,
        ))
        .await
        .unwrap()
    }

    fn jobs(db: Database, temp_dir: &Path) -> ArchiveJobs {
        ArchiveJobs::new(
            db,
            &ArchiveConfig::default(),
            temp_dir.to_path_buf(),
            Arc::new(JobSupervisor::new()),
        )
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename(Some("incident.zip"), "d.zip"), "incident.zip");
        assert_eq!(sanitize_filename(Some("../../etc/passwd"), "d.zip"), "....etcpasswd");
        assert_eq!(sanitize_filename(Some("a\"b\r\n.zip"), "d.zip"), "ab.zip");
        assert_eq!(sanitize_filename(Some("  "), "d.zip"), "d.zip");
        assert_eq!(sanitize_filename(Some(".."), "d.zip"), "d.zip");
        assert_eq!(sanitize_filename(None, "d.zip"), "d.zip");
    }

    #[tokio::test]
    async fn test_validation_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new_in_memory().await.unwrap();
        let jobs = jobs(db, dir.path());

        let empty = jobs.submit(ArchiveRequest { ids: vec![], filename: None });
        assert!(matches!(empty, Err(SubmitError::Validation(_))));

        let too_many = jobs.submit(ArchiveRequest {
            ids: (1..=201).collect(),
            filename: None,
        });
        assert!(matches!(too_many, Err(SubmitError::Validation(ref m)) if m == "ids must contain 1-200 entries"));
        assert_eq!(jobs.table().occupied(), 0);
    }

    #[tokio::test]
    async fn test_archive_job_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new_in_memory().await.unwrap();
        let a = seed(&db, dir.path(), "front_a.mp4", b"alpha bytes").await;
        let b = seed(&db, dir.path(), "front_b.mp4", &vec![3u8; 70_000]).await;
        let gone = seed(&db, dir.path(), "front_gone.mp4", b"x").await;
        std::fs::remove_file(dir.path().join("front_gone.mp4")).unwrap();

        let temp_dir = tempfile::tempdir().unwrap();
        let jobs = jobs(db, temp_dir.path());
        let ticket = jobs
            .submit(ArchiveRequest {
                ids: vec![a, 9999, gone, b],
                filename: Some("incident.zip".into()),
            })
            .unwrap();
        assert_eq!(ticket.total, 4);

        let snap = wait_finished(&jobs, ticket.job_id).await;
        assert_eq!(snap.status, JobStatus::Complete);
        assert_eq!(snap.current, 4);
        assert_eq!((snap.succeeded, snap.failed), (2, 2));

        let download = jobs.take_result(ticket.job_id).unwrap();
        assert_eq!(download.filename, "incident.zip");
        let path = download.artifact.path().to_path_buf();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len() as u64, download.artifact.len());

        let mut zip = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(zip.len(), 2);
        let mut entry = zip.by_name("front_b.mp4").unwrap();
        let mut content = Vec::new();
        entry.read_to_end(&mut content).unwrap();
        assert_eq!(entry.crc32(), crc32fast::hash(&vec![3u8; 70_000]));
        drop(entry);

        // Result is handed out once; the slot is gone afterwards.
        assert!(matches!(
            jobs.take_result(ticket.job_id),
            Err(JobError::NotFound(_))
        ));
        drop(download);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_result_before_completion_is_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new_in_memory().await.unwrap();
        let jobs = jobs(db, dir.path());
        let id = jobs
            .table()
            .create(1, "pending", ArchiveSlot { filename: "x.zip".into(), artifact: None })
            .unwrap();
        assert!(matches!(
            jobs.take_result(id),
            Err(JobError::NotReady { status: JobStatus::Pending, .. })
        ));
    }

    #[tokio::test]
    async fn test_unwritable_temp_dir_fails_job() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new_in_memory().await.unwrap();
        let a = seed(&db, dir.path(), "a.mp4", b"a").await;
        let jobs = jobs(db, &dir.path().join("does/not/exist"));

        let ticket = jobs
            .submit(ArchiveRequest { ids: vec![a], filename: None })
            .unwrap();
        let snap = wait_finished(&jobs, ticket.job_id).await;
        assert_eq!(snap.status, JobStatus::Error);
        assert_eq!(snap.error_message.as_deref(), Some("Failed to create temp file"));
        assert!(matches!(
            jobs.take_result(ticket.job_id),
            Err(JobError::NotReady { status: JobStatus::Error, .. })
        ));
    }
}
