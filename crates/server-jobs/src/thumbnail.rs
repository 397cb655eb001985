// crates/server-jobs/src/thumbnail.rs
//! Thumbnail extraction workers.
//!
//! Each request runs in its own worker, bounded by a small ceiling because
//! every worker drives an external `ffmpeg` process. Results reach the
//! waiting HTTP request through the completion queue.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::config::ThumbnailConfig;
use crate::delivery::CompletionQueue;
use crate::limiter::WorkerLimiter;
use crate::metrics;
use crate::supervisor::JobSupervisor;
use crate::types::{JobKind, JobStatus, SubmitError};

/// Thumbnails per recording (indices `0..THUMBNAIL_COUNT`).
pub const THUMBNAIL_COUNT: u8 = 3;

/// Used when a recording's duration is unknown.
const FALLBACK_DURATION_SECS: f64 = 10.0;

#[derive(Debug, Error)]
pub enum ThumbnailError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("frame extraction timed out after {0:?}")]
    Timeout(Duration),

    #[error("frame extraction failed: {0}")]
    Failed(String),

    #[error("frame extraction produced no output")]
    EmptyOutput,
}

pub type ThumbnailOutcome = Result<PathBuf, ThumbnailError>;

/// `<storage>/thumbnails/<recording_id>_<index>.jpg`
pub fn thumbnail_path(storage_path: &Path, recording_id: i64, index: u8) -> PathBuf {
    storage_path
        .join("thumbnails")
        .join(format!("{recording_id}_{index}.jpg"))
}

/// Seek offset (seconds) for thumbnail `index` of a recording lasting
/// `duration_secs`: near the start, the middle, and near the end.
pub fn seek_seconds(index: u8, duration_secs: Option<i64>) -> f64 {
    let duration = match duration_secs {
        Some(d) if d > 0 => d as f64,
        _ => FALLBACK_DURATION_SECS,
    };
    let seek = match index {
        0 => 1.0,
        1 => duration / 2.0,
        2 if duration > 2.0 => duration - 1.0,
        2 => duration * 0.9,
        _ => 0.0,
    };
    if seek >= duration {
        if duration > 1.0 {
            duration - 1.0
        } else {
            0.0
        }
    } else {
        seek.max(0.0)
    }
}

/// Grabs a single video frame into an image file.
#[async_trait]
pub trait FrameExtractor: Send + Sync {
    async fn extract(&self, input: &Path, output: &Path, seek_secs: f64) -> Result<(), ThumbnailError>;
}

/// Runs `ffmpeg` with a wall-clock timeout; the child is killed on timeout.
#[derive(Debug, Clone)]
pub struct FfmpegExtractor {
    program: String,
    timeout: Duration,
}

impl FfmpegExtractor {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

#[async_trait]
impl FrameExtractor for FfmpegExtractor {
    async fn extract(&self, input: &Path, output: &Path, seek_secs: f64) -> Result<(), ThumbnailError> {
        let mut child = Command::new(&self.program)
            .arg("-ss")
            .arg(format!("{seek_secs:.2}"))
            .arg("-i")
            .arg(input)
            .args(["-frames:v", "1", "-vf", "scale=320:-1", "-q:v", "8", "-y"])
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ThumbnailError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) if status.success() => Ok(()),
            Ok(Ok(status)) => Err(ThumbnailError::Failed(status.to_string())),
            Ok(Err(e)) => Err(ThumbnailError::Failed(e.to_string())),
            Err(_) => {
                if let Err(e) = child.kill().await {
                    warn!(program = %self.program, "failed to kill timed-out extractor: {e}");
                }
                Err(ThumbnailError::Timeout(self.timeout))
            }
        }
    }
}

/// One thumbnail to produce.
#[derive(Debug, Clone)]
pub struct ThumbnailRequest {
    pub recording_id: i64,
    pub index: u8,
    pub input: PathBuf,
    pub output: PathBuf,
    pub seek_secs: f64,
}

/// Bounded pool of thumbnail workers.
pub struct ThumbnailWorkers {
    extractor: Arc<dyn FrameExtractor>,
    limiter: WorkerLimiter,
    supervisor: Arc<JobSupervisor>,
    completions: CompletionQueue<ThumbnailOutcome>,
}

impl ThumbnailWorkers {
    pub fn new(
        config: &ThumbnailConfig,
        extractor: Arc<dyn FrameExtractor>,
        supervisor: Arc<JobSupervisor>,
    ) -> Self {
        Self {
            extractor,
            limiter: WorkerLimiter::new(JobKind::Thumbnail, config.max_workers),
            supervisor,
            completions: CompletionQueue::start(),
        }
    }

    /// Start generating a thumbnail. Rejects immediately when the worker
    /// ceiling is reached; the returned receiver yields the outcome.
    pub fn submit(
        &self,
        request: ThumbnailRequest,
    ) -> Result<oneshot::Receiver<ThumbnailOutcome>, SubmitError> {
        let result = self.try_submit(request);
        match &result {
            Ok(_) => metrics::job_submitted(JobKind::Thumbnail),
            Err(e) => metrics::job_rejected(JobKind::Thumbnail, e.reason()),
        }
        result
    }

    fn try_submit(
        &self,
        request: ThumbnailRequest,
    ) -> Result<oneshot::Receiver<ThumbnailOutcome>, SubmitError> {
        if self.supervisor.is_shutting_down() {
            return Err(SubmitError::ShuttingDown);
        }
        let permit = self.limiter.try_acquire().ok_or_else(|| {
            SubmitError::Capacity("Too many concurrent thumbnail generations".to_string())
        })?;
        let (slot, rx) = self.completions.defer();
        let extractor = Arc::clone(&self.extractor);

        self.supervisor.spawn(async move {
            let _permit = permit;
            let started = Instant::now();
            let outcome = generate(extractor.as_ref(), &request).await;
            let status = match &outcome {
                Ok(path) => {
                    info!(
                        recording_id = request.recording_id,
                        index = request.index,
                        path = %path.display(),
                        "thumbnail generated"
                    );
                    JobStatus::Complete
                }
                Err(e) => {
                    warn!(
                        recording_id = request.recording_id,
                        index = request.index,
                        "thumbnail generation failed: {e}"
                    );
                    JobStatus::Error
                }
            };
            metrics::job_finished(JobKind::Thumbnail, status, started.elapsed());
            slot.deliver(outcome);
        })?;
        Ok(rx)
    }

    pub fn active_workers(&self) -> usize {
        self.limiter.active()
    }

    pub fn limiter(&self) -> &WorkerLimiter {
        &self.limiter
    }
}

async fn generate(extractor: &dyn FrameExtractor, request: &ThumbnailRequest) -> ThumbnailOutcome {
    if let Some(dir) = request.output.parent() {
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            return Err(ThumbnailError::Failed(format!(
                "cannot create {}: {e}",
                dir.display()
            )));
        }
    }

    let extracted = extractor
        .extract(&request.input, &request.output, request.seek_secs)
        .await;
    let produced = match tokio::fs::metadata(&request.output).await {
        Ok(meta) => meta.len() > 0,
        Err(_) => false,
    };
    match extracted {
        Ok(()) if produced => Ok(request.output.clone()),
        Ok(()) => {
            discard(&request.output).await;
            Err(ThumbnailError::EmptyOutput)
        }
        Err(e) => {
            discard(&request.output).await;
            Err(e)
        }
    }
}

async fn discard(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "removed incomplete thumbnail"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), "failed to remove incomplete thumbnail: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Semaphore;

    struct GatedExtractor {
        gate: Arc<Semaphore>,
    }

    #[async_trait]
    impl FrameExtractor for GatedExtractor {
        async fn extract(&self, _input: &Path, output: &Path, _seek: f64) -> Result<(), ThumbnailError> {
            let _pass = self
                .gate
                .acquire()
                .await
                .map_err(|e| ThumbnailError::Failed(e.to_string()))?;
            tokio::fs::write(output, b"\xff\xd8jpeg")
                .await
                .map_err(|e| ThumbnailError::Failed(e.to_string()))
        }
    }

    struct SilentExtractor;

    #[async_trait]
    impl FrameExtractor for SilentExtractor {
        async fn extract(&self, _input: &Path, output: &Path, _seek: f64) -> Result<(), ThumbnailError> {
            tokio::fs::write(output, b"")
                .await
                .map_err(|e| ThumbnailError::Failed(e.to_string()))
        }
    }

    fn request(dir: &Path, id: i64) -> ThumbnailRequest {
        ThumbnailRequest {
            recording_id: id,
            index: 0,
            input: dir.join("in.mp4"),
            output: thumbnail_path(dir, id, 0),
            seek_secs: 1.0,
        }
    }

    fn config(max_workers: usize) -> ThumbnailConfig {
        ThumbnailConfig {
            max_workers,
            ..Default::default()
        }
    }

    #[test]
    fn test_seek_positions() {
        assert_eq!(seek_seconds(0, Some(60)), 1.0);
        assert_eq!(seek_seconds(1, Some(60)), 30.0);
        assert_eq!(seek_seconds(2, Some(60)), 59.0);
        assert_eq!(seek_seconds(2, Some(2)), 1.8);
        assert_eq!(seek_seconds(1, None), 5.0);
        assert_eq!(seek_seconds(2, Some(0)), 9.0);
        // Index 0 on a one-second clip would land on the last frame.
        assert_eq!(seek_seconds(0, Some(1)), 0.0);
    }

    #[test]
    fn test_thumbnail_path_layout() {
        let path = thumbnail_path(Path::new("/data"), 42, 2);
        assert_eq!(path, PathBuf::from("/data/thumbnails/42_2.jpg"));
    }

    #[tokio::test]
    async fn test_ceiling_admits_exactly_cap() {
        let dir = tempfile::tempdir().unwrap();
        let gate = Arc::new(Semaphore::new(0));
        let supervisor = Arc::new(JobSupervisor::new());
        let workers = ThumbnailWorkers::new(
            &config(4),
            Arc::new(GatedExtractor { gate: Arc::clone(&gate) }),
            Arc::clone(&supervisor),
        );

        let mut accepted = Vec::new();
        let mut rejected = 0;
        for id in 1..=5 {
            match workers.submit(request(dir.path(), id)) {
                Ok(rx) => accepted.push(rx),
                Err(SubmitError::Capacity(_)) => rejected += 1,
                Err(e) => panic!("unexpected rejection: {e}"),
            }
        }
        assert_eq!(accepted.len(), 4);
        assert_eq!(rejected, 1);
        assert_eq!(workers.active_workers(), 4);

        gate.add_permits(4);
        for rx in accepted {
            let path = rx.await.unwrap().unwrap();
            assert!(path.exists());
        }
        assert!(supervisor.shutdown(Duration::from_secs(5)).await);
        assert_eq!(workers.active_workers(), 0);
        assert!(workers.limiter().peak() <= 4);
    }

    #[tokio::test]
    async fn test_empty_output_is_failure_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let workers = ThumbnailWorkers::new(
            &config(1),
            Arc::new(SilentExtractor),
            Arc::new(JobSupervisor::new()),
        );
        let req = request(dir.path(), 7);
        let output = req.output.clone();
        let outcome = workers.submit(req).unwrap().await.unwrap();
        assert!(matches!(outcome, Err(ThumbnailError::EmptyOutput)));
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_missing_program_reports_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = FfmpegExtractor::new("/nonexistent/ffmpeg-binary", Duration::from_secs(1));
        let out = dir.path().join("t.jpg");
        let err = extractor
            .extract(&dir.path().join("in.mp4"), &out, 1.0)
            .await
            .unwrap_err();
        assert!(matches!(err, ThumbnailError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_rejects_after_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = Arc::new(JobSupervisor::new());
        let workers = ThumbnailWorkers::new(&config(4), Arc::new(SilentExtractor), Arc::clone(&supervisor));
        supervisor.shutdown(Duration::from_millis(10)).await;
        assert!(matches!(
            workers.submit(request(dir.path(), 1)),
            Err(SubmitError::ShuttingDown)
        ));
        assert_eq!(workers.active_workers(), 0);
    }
}
