// crates/server-jobs/src/types.rs
//! Identifiers, statuses and error types shared by every job kind.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use thiserror::Error;
use uuid::Uuid;

/// Opaque external handle of a job: a random (version 4) UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(Uuid);

impl JobId {
    pub(crate) fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl Serialize for JobId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Lifecycle of a job. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Complete,
    Error,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Complete => "complete",
            JobStatus::Error => "error",
        }
    }

    /// `Complete` or `Error`.
    pub fn is_finished(self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Error)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kinds of background work the subsystem runs. Used for metric labels
/// and log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Delete,
    Archive,
    Thumbnail,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Delete => "delete",
            JobKind::Archive => "archive",
            JobKind::Thumbnail => "thumbnail",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time copy of one job record, as returned to pollers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub status: JobStatus,
    pub total: u64,
    pub current: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub status_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub complete: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Failures of job table operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("job {0} not found")]
    NotFound(JobId),

    #[error("too many concurrent {table} jobs (capacity {capacity})")]
    Capacity { table: &'static str, capacity: usize },

    #[error("job {id} is {status}")]
    NotReady { id: JobId, status: JobStatus },
}

/// Synchronous outcome of a rejected submission. Nothing was started.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// Malformed, empty or oversized input.
    #[error("{0}")]
    Validation(String),

    /// No free job slot or the worker ceiling was hit.
    #[error("{0}")]
    Capacity(String),

    #[error("server is shutting down")]
    ShuttingDown,

    #[error("{0}")]
    Internal(String),
}

impl SubmitError {
    /// Short label for the `reason` metric dimension.
    pub fn reason(&self) -> &'static str {
        match self {
            SubmitError::Validation(_) => "validation",
            SubmitError::Capacity(_) => "capacity",
            SubmitError::ShuttingDown => "shutdown",
            SubmitError::Internal(_) => "internal",
        }
    }
}

impl From<JobError> for SubmitError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::Capacity { .. } => SubmitError::Capacity(err.to_string()),
            other => SubmitError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_round_trips_through_text() {
        let id = JobId::from_uuid(Uuid::new_v4());
        let text = id.to_string();
        assert_eq!(text.len(), 36);
        assert_eq!(text.parse::<JobId>().unwrap(), id);
        assert!("not-a-uuid".parse::<JobId>().is_err());
    }

    #[test]
    fn test_snapshot_serializes_wire_shape() {
        let id = JobId::from_uuid(Uuid::nil());
        let now = Utc::now();
        let snap = JobSnapshot {
            job_id: id,
            status: JobStatus::Running,
            total: 10,
            current: 4,
            succeeded: 3,
            failed: 1,
            status_message: "Deleting recordings... 4/10".into(),
            error_message: None,
            complete: false,
            created_at: now,
            updated_at: now,
        };
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["job_id"], "00000000-0000-0000-0000-000000000000");
        assert_eq!(json["status"], "running");
        assert_eq!(json["current"], 4);
        assert_eq!(json["complete"], false);
        assert!(json.get("error_message").is_none());
    }

    #[test]
    fn test_capacity_maps_to_submit_capacity() {
        let err = JobError::Capacity {
            table: "delete",
            capacity: 10,
        };
        let submit: SubmitError = err.into();
        assert!(matches!(submit, SubmitError::Capacity(_)));
        assert_eq!(submit.reason(), "capacity");
    }

    #[test]
    fn test_finished_statuses() {
        assert!(!JobStatus::Pending.is_finished());
        assert!(!JobStatus::Running.is_finished());
        assert!(JobStatus::Complete.is_finished());
        assert!(JobStatus::Error.is_finished());
    }
}
