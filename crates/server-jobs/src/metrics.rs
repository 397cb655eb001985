// crates/server-jobs/src/metrics.rs
//! Job metrics, recorded through the `metrics` facade.
//!
//! Recording is a no-op until the binary installs a recorder.

use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

use crate::types::{JobKind, JobStatus};

pub const JOBS_SUBMITTED: &str = "nvr_jobs_submitted_total";
pub const JOBS_REJECTED: &str = "nvr_jobs_rejected_total";
pub const JOBS_FINISHED: &str = "nvr_jobs_finished_total";
pub const JOB_DURATION: &str = "nvr_job_duration_seconds";
pub const WORKERS_ACTIVE: &str = "nvr_workers_active";

/// Register descriptions for every job metric.
pub fn describe_metrics() {
    describe_counter!(JOBS_SUBMITTED, "Jobs accepted for background execution");
    describe_counter!(JOBS_REJECTED, "Job submissions rejected before starting");
    describe_counter!(JOBS_FINISHED, "Jobs that reached a terminal state");
    describe_histogram!(JOB_DURATION, "Wall-clock time from worker start to finish");
    describe_gauge!(WORKERS_ACTIVE, "Workers currently running, by kind");
}

pub(crate) fn job_submitted(kind: JobKind) {
    counter!(JOBS_SUBMITTED, "kind" => kind.as_str()).increment(1);
}

pub(crate) fn job_rejected(kind: JobKind, reason: &'static str) {
    counter!(JOBS_REJECTED, "kind" => kind.as_str(), "reason" => reason).increment(1);
}

pub(crate) fn job_finished(kind: JobKind, status: JobStatus, elapsed: Duration) {
    counter!(JOBS_FINISHED, "kind" => kind.as_str(), "status" => status.as_str()).increment(1);
    histogram!(JOB_DURATION, "kind" => kind.as_str()).record(elapsed.as_secs_f64());
}

pub(crate) fn workers_active(kind: JobKind, active: usize) {
    gauge!(WORKERS_ACTIVE, "kind" => kind.as_str()).set(active as f64);
}
