// crates/server-jobs/src/table.rs
//! Fixed-capacity job table.
//!
//! One mutex guards a small array of slots. Every operation locates its
//! slot with a linear scan, copies or mutates it, and unlocks; nothing
//! inside the critical section touches I/O. Records evicted from a slot
//! (recycling, explicit delete, result hand-off) are dropped only after the
//! lock is released, so payloads with file-backed `Drop` impls never run
//! under the lock.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::id;
use crate::types::{JobError, JobId, JobSnapshot, JobStatus};

/// Static shape of one table.
#[derive(Debug, Clone)]
pub struct TableConfig {
    /// Short name used in logs and capacity errors ("delete", "archive").
    pub name: &'static str,
    pub capacity: usize,
    /// How long a finished job stays readable before its slot may be reused.
    pub retention: Duration,
    /// Status message set by `complete`.
    pub completion_message: &'static str,
}

struct JobRecord<P> {
    id: JobId,
    status: JobStatus,
    total: u64,
    current: u64,
    succeeded: u64,
    failed: u64,
    status_message: String,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    touched: Instant,
    payload: P,
}

impl<P> JobRecord<P> {
    fn touch(&mut self) {
        self.updated_at = Utc::now();
        self.touched = Instant::now();
    }

    fn reusable(&self, retention: Duration) -> bool {
        self.status.is_finished() && self.touched.elapsed() >= retention
    }

    fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job_id: self.id,
            status: self.status,
            total: self.total,
            current: self.current,
            succeeded: self.succeeded,
            failed: self.failed,
            status_message: self.status_message.clone(),
            error_message: self.error_message.clone(),
            complete: self.status.is_finished(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// A bounded table of jobs of one kind. `P` is per-kind data attached to
/// each record (the archive artifact, for instance).
pub struct JobTable<P> {
    config: TableConfig,
    slots: Mutex<Vec<Option<JobRecord<P>>>>,
}

impl<P> JobTable<P> {
    pub fn new(config: TableConfig) -> Self {
        let slots = (0..config.capacity).map(|_| None).collect();
        Self {
            config,
            slots: Mutex::new(slots),
        }
    }

    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Option<JobRecord<P>>>> {
        self.slots.lock().unwrap_or_else(|poisoned| {
            tracing::error!(table = self.config.name, "job table mutex poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Allocate a slot for a new `Pending` job.
    ///
    /// Empty slots are preferred. Otherwise the first finished job whose
    /// retention has elapsed is recycled. Never waits for a slot.
    pub fn create(
        &self,
        total: u64,
        message: impl Into<String>,
        payload: P,
    ) -> Result<JobId, JobError> {
        let id = id::generate();
        let now = Utc::now();
        let record = JobRecord {
            id,
            status: JobStatus::Pending,
            total,
            current: 0,
            succeeded: 0,
            failed: 0,
            status_message: message.into(),
            error_message: None,
            created_at: now,
            updated_at: now,
            touched: Instant::now(),
            payload,
        };

        let evicted = {
            let mut slots = self.lock();
            let index = match slots.iter().position(Option::is_none) {
                Some(index) => index,
                None => slots
                    .iter()
                    .position(|slot| {
                        slot.as_ref()
                            .is_some_and(|r| r.reusable(self.config.retention))
                    })
                    .ok_or(JobError::Capacity {
                        table: self.config.name,
                        capacity: self.config.capacity,
                    })?,
            };
            slots[index].replace(record)
        };

        if let Some(old) = &evicted {
            info!(table = self.config.name, job_id = %old.id, "recycled finished job slot");
        }
        drop(evicted);
        info!(table = self.config.name, job_id = %id, total, "job created");
        Ok(id)
    }

    fn with_record<R>(
        &self,
        id: JobId,
        f: impl FnOnce(&mut JobRecord<P>) -> R,
    ) -> Result<R, JobError> {
        let mut slots = self.lock();
        let record = slots
            .iter_mut()
            .flatten()
            .find(|r| r.id == id)
            .ok_or(JobError::NotFound(id))?;
        Ok(f(record))
    }

    fn take_record(&self, id: JobId) -> Result<JobRecord<P>, JobError> {
        let mut slots = self.lock();
        let slot = slots
            .iter_mut()
            .find(|slot| slot.as_ref().is_some_and(|r| r.id == id))
            .ok_or(JobError::NotFound(id))?;
        slot.take().ok_or(JobError::NotFound(id))
    }

    /// Record progress. Moves `Pending` to `Running`; `current` never goes
    /// backwards and never passes a known `total`. Updates to a finished job
    /// are ignored.
    pub fn update(
        &self,
        id: JobId,
        current: u64,
        succeeded: u64,
        failed: u64,
        message: impl Into<String>,
    ) -> Result<(), JobError> {
        let message = message.into();
        self.with_record(id, |r| {
            if r.status.is_finished() {
                debug!(job_id = %id, "ignoring progress for finished job");
                return;
            }
            let current = if r.total > 0 { current.min(r.total) } else { current };
            r.status = JobStatus::Running;
            r.current = r.current.max(current);
            r.succeeded = succeeded;
            r.failed = failed;
            r.status_message = message;
            r.touch();
        })
    }

    /// Fix a lazily discovered total. Only takes effect while the total is
    /// still unknown (zero).
    pub fn set_total(
        &self,
        id: JobId,
        total: u64,
        message: impl Into<String>,
    ) -> Result<(), JobError> {
        let message = message.into();
        self.with_record(id, |r| {
            if r.status.is_finished() || r.total != 0 {
                return;
            }
            r.status = JobStatus::Running;
            r.total = total;
            r.status_message = message;
            r.touch();
        })
    }

    /// Mark the job complete with `current = total`.
    pub fn complete(&self, id: JobId, succeeded: u64, failed: u64) -> Result<(), JobError> {
        self.complete_with(id, succeeded, failed, |_| {})
    }

    /// Like [`complete`](Self::complete), additionally letting the worker
    /// attach its result to the payload in the same critical section.
    pub fn complete_with(
        &self,
        id: JobId,
        succeeded: u64,
        failed: u64,
        attach: impl FnOnce(&mut P),
    ) -> Result<(), JobError> {
        let message = self.config.completion_message;
        self.with_record(id, |r| {
            if r.status.is_finished() {
                return;
            }
            r.status = JobStatus::Complete;
            r.current = r.total;
            r.succeeded = succeeded;
            r.failed = failed;
            r.status_message = message.to_string();
            attach(&mut r.payload);
            r.touch();
        })
    }

    /// Abort the whole job.
    pub fn fail(&self, id: JobId, message: impl Into<String>) -> Result<(), JobError> {
        let message = message.into();
        self.with_record(id, |r| {
            if r.status.is_finished() {
                return;
            }
            r.status = JobStatus::Error;
            r.status_message = format!("Error: {message}");
            r.error_message = Some(message);
            r.touch();
        })
    }

    pub fn get(&self, id: JobId) -> Result<JobSnapshot, JobError> {
        self.with_record(id, |r| r.snapshot())
    }

    /// Remove a job outright, whatever its state.
    pub fn delete(&self, id: JobId) -> Result<(), JobError> {
        let removed = self.take_record(id)?;
        debug!(table = self.config.name, job_id = %removed.id, "job removed");
        Ok(())
    }

    /// Hand a completed job's payload to the caller and free its slot.
    ///
    /// Fails with `NotReady` (leaving the job in place) unless the job is
    /// `Complete`.
    pub fn take_completed(&self, id: JobId) -> Result<P, JobError> {
        let record = {
            let mut slots = self.lock();
            let slot = slots
                .iter_mut()
                .find(|slot| slot.as_ref().is_some_and(|r| r.id == id))
                .ok_or(JobError::NotFound(id))?;
            match slot.as_ref().map(|r| r.status) {
                Some(JobStatus::Complete) => {}
                Some(status) => return Err(JobError::NotReady { id, status }),
                None => return Err(JobError::NotFound(id)),
            }
            slot.take().ok_or(JobError::NotFound(id))?
        };
        Ok(record.payload)
    }

    /// Number of occupied slots, finished or not.
    pub fn occupied(&self) -> usize {
        self.lock().iter().filter(|slot| slot.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn table(capacity: usize, retention: Duration) -> JobTable<()> {
        JobTable::new(TableConfig {
            name: "test",
            capacity,
            retention,
            completion_message: "Done",
        })
    }

    #[test]
    fn test_lifecycle_pending_running_complete() {
        let t = table(2, Duration::from_secs(60));
        let id = t.create(3, "Preparing", ()).unwrap();

        let snap = t.get(id).unwrap();
        assert_eq!(snap.status, JobStatus::Pending);
        assert_eq!((snap.total, snap.current), (3, 0));
        assert_eq!(snap.status_message, "Preparing");
        assert!(!snap.complete);

        t.update(id, 1, 1, 0, "1/3").unwrap();
        let snap = t.get(id).unwrap();
        assert_eq!(snap.status, JobStatus::Running);
        assert_eq!(snap.current, 1);

        t.complete(id, 2, 1).unwrap();
        let snap = t.get(id).unwrap();
        assert_eq!(snap.status, JobStatus::Complete);
        assert_eq!(snap.current, 3);
        assert_eq!((snap.succeeded, snap.failed), (2, 1));
        assert_eq!(snap.status_message, "Done");
        assert!(snap.complete);
    }

    #[test]
    fn test_current_is_monotonic_and_clamped() {
        let t = table(1, Duration::from_secs(60));
        let id = t.create(5, "", ()).unwrap();
        t.update(id, 3, 3, 0, "").unwrap();
        t.update(id, 2, 3, 0, "").unwrap();
        assert_eq!(t.get(id).unwrap().current, 3);
        t.update(id, 99, 5, 0, "").unwrap();
        assert_eq!(t.get(id).unwrap().current, 5);
    }

    #[test]
    fn test_set_total_only_once() {
        let t = table(1, Duration::from_secs(60));
        let id = t.create(0, "Loading", ()).unwrap();
        t.set_total(id, 7, "0/7").unwrap();
        t.set_total(id, 9, "0/9").unwrap();
        let snap = t.get(id).unwrap();
        assert_eq!(snap.total, 7);
        assert_eq!(snap.status_message, "0/7");
    }

    #[test]
    fn test_fail_sets_error_fields_and_is_terminal() {
        let t = table(1, Duration::from_secs(60));
        let id = t.create(2, "", ()).unwrap();
        t.fail(id, "disk full").unwrap();
        t.update(id, 1, 1, 0, "late").unwrap();
        t.complete(id, 2, 0).unwrap();

        let snap = t.get(id).unwrap();
        assert_eq!(snap.status, JobStatus::Error);
        assert_eq!(snap.status_message, "Error: disk full");
        assert_eq!(snap.error_message.as_deref(), Some("disk full"));
        assert_eq!(snap.current, 0);
        assert!(snap.complete);
    }

    #[test]
    fn test_unknown_id_is_not_found() {
        let t = table(1, Duration::from_secs(60));
        let stray = id::generate();
        assert_eq!(t.get(stray), Err(JobError::NotFound(stray)));
        assert_eq!(t.update(stray, 1, 1, 0, ""), Err(JobError::NotFound(stray)));
        assert_eq!(t.complete(stray, 0, 0), Err(JobError::NotFound(stray)));
        assert_eq!(t.fail(stray, "x"), Err(JobError::NotFound(stray)));
        assert_eq!(t.delete(stray), Err(JobError::NotFound(stray)));
    }

    #[test]
    fn test_capacity_rejects_while_jobs_are_live() {
        let t = table(2, Duration::ZERO);
        let a = t.create(1, "", ()).unwrap();
        let b = t.create(1, "", ()).unwrap();
        t.update(b, 0, 0, 0, "running").unwrap();

        let err = t.create(1, "", ()).unwrap_err();
        assert_eq!(
            err,
            JobError::Capacity {
                table: "test",
                capacity: 2
            }
        );

        // A finished job past retention (zero here) frees its slot.
        t.complete(a, 1, 0).unwrap();
        let c = t.create(1, "", ()).unwrap();
        assert!(t.get(a).is_err());
        assert!(t.get(c).is_ok());
    }

    #[test]
    fn test_finished_job_is_kept_for_retention() {
        let t = table(1, Duration::from_millis(50));
        let a = t.create(1, "", ()).unwrap();
        t.complete(a, 1, 0).unwrap();
        assert!(matches!(t.create(1, "", ()), Err(JobError::Capacity { .. })));

        std::thread::sleep(Duration::from_millis(60));
        let b = t.create(1, "", ()).unwrap();
        assert_ne!(a, b);
        assert_eq!(t.get(b).unwrap().status, JobStatus::Pending);
    }

    #[test]
    fn test_empty_slot_preferred_over_recycling() {
        let t = table(2, Duration::ZERO);
        let a = t.create(1, "", ()).unwrap();
        t.complete(a, 1, 0).unwrap();
        let _b = t.create(1, "", ()).unwrap();
        // `a` stays readable because slot 1 was free.
        assert!(t.get(a).is_ok());
        assert_eq!(t.occupied(), 2);
    }

    #[test]
    fn test_take_completed_frees_slot() {
        let t: JobTable<Option<String>> = JobTable::new(TableConfig {
            name: "test",
            capacity: 1,
            retention: Duration::from_secs(600),
            completion_message: "Done",
        });
        let id = t.create(1, "", None).unwrap();
        assert_eq!(
            t.take_completed(id),
            Err(JobError::NotReady {
                id,
                status: JobStatus::Pending
            })
        );

        t.complete_with(id, 1, 0, |p| *p = Some("artifact".into()))
            .unwrap();
        assert_eq!(t.take_completed(id).unwrap().as_deref(), Some("artifact"));
        assert_eq!(t.get(id), Err(JobError::NotFound(id)));
        assert_eq!(t.occupied(), 0);
    }

    #[test]
    fn test_take_completed_rejects_errored_job() {
        let t = table(1, Duration::from_secs(60));
        let id = t.create(1, "", ()).unwrap();
        t.fail(id, "boom").unwrap();
        assert_eq!(
            t.take_completed(id),
            Err(JobError::NotReady {
                id,
                status: JobStatus::Error
            })
        );
        assert!(t.get(id).is_ok());
    }

    struct DropCounter(Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_recycled_payload_is_dropped() {
        let drops = Arc::new(AtomicUsize::new(0));
        let t = JobTable::new(TableConfig {
            name: "test",
            capacity: 1,
            retention: Duration::ZERO,
            completion_message: "Done",
        });
        let a = t.create(1, "", DropCounter(drops.clone())).unwrap();
        t.complete(a, 1, 0).unwrap();
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        let b = t.create(1, "", DropCounter(drops.clone())).unwrap();
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        t.delete(b).unwrap();
        assert_eq!(drops.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_ids_unique_across_active_slots() {
        let t = table(10, Duration::from_secs(60));
        let ids: Vec<JobId> = (0..10).map(|_| t.create(1, "", ()).unwrap()).collect();
        let unique: std::collections::HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), 10);
    }
}
