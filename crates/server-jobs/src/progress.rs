// crates/server-jobs/src/progress.rs
//! The write side of a job record, handed to exactly one worker.

use std::sync::Arc;

use tracing::debug;

use crate::table::JobTable;
use crate::types::{JobError, JobId};

/// Reports progress for one job.
///
/// Every method returns `NotFound` once the job's slot has been recycled or
/// removed. Workers treat that as "nobody is listening any more" and carry
/// on; it is never a reason to abort.
pub struct ProgressReporter<P> {
    table: Arc<JobTable<P>>,
    id: JobId,
}

impl<P> Clone for ProgressReporter<P> {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
            id: self.id,
        }
    }
}

impl<P> ProgressReporter<P> {
    pub(crate) fn new(table: Arc<JobTable<P>>, id: JobId) -> Self {
        Self { table, id }
    }

    pub fn job_id(&self) -> JobId {
        self.id
    }

    pub fn report_progress(
        &self,
        current: u64,
        succeeded: u64,
        failed: u64,
        message: impl Into<String>,
    ) -> Result<(), JobError> {
        self.note(self.table.update(self.id, current, succeeded, failed, message))
    }

    /// Fix a total that was unknown at creation time.
    pub fn report_total(&self, total: u64, message: impl Into<String>) -> Result<(), JobError> {
        self.note(self.table.set_total(self.id, total, message))
    }

    pub fn report_complete(&self, succeeded: u64, failed: u64) -> Result<(), JobError> {
        self.note(self.table.complete(self.id, succeeded, failed))
    }

    /// Complete and attach a result to the job's payload atomically.
    pub fn report_complete_with(
        &self,
        succeeded: u64,
        failed: u64,
        attach: impl FnOnce(&mut P),
    ) -> Result<(), JobError> {
        self.note(self.table.complete_with(self.id, succeeded, failed, attach))
    }

    pub fn report_error(&self, message: impl Into<String>) -> Result<(), JobError> {
        self.note(self.table.fail(self.id, message))
    }

    fn note(&self, result: Result<(), JobError>) -> Result<(), JobError> {
        if let Err(e) = &result {
            debug!(job_id = %self.id, "progress report dropped: {e}");
        }
        result
    }
}
