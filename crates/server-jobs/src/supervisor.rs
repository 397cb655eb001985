// crates/server-jobs/src/supervisor.rs
//! Tracks every spawned worker so shutdown can wait for them.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::types::SubmitError;

/// Owner of all worker tasks.
///
/// Workers are fire-and-forget: the supervisor never returns their output
/// and nothing joins an individual task. Its only jobs are refusing new
/// work once shutdown starts and waiting, with a bound, for the in-flight
/// workers to finish.
#[derive(Debug, Default)]
pub struct JobSupervisor {
    tracker: TaskTracker,
    shutting_down: AtomicBool,
}

impl JobSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Spawn a worker on the current runtime.
    pub fn spawn<F>(&self, worker: F) -> Result<(), SubmitError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_shutting_down() {
            return Err(SubmitError::ShuttingDown);
        }
        self.tracker.spawn(worker);
        Ok(())
    }

    /// Workers still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Refuse new work and wait up to `timeout` for running workers.
    ///
    /// Returns `true` if every worker finished in time. Workers still running
    /// at the deadline are abandoned, not aborted.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.shutting_down.store(true, Ordering::Release);
        self.tracker.close();

        let pending = self.tracker.len();
        if pending > 0 {
            info!(pending, "waiting for background workers");
        }
        match tokio::time::timeout(timeout, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    remaining = self.tracker.len(),
                    timeout_secs = timeout.as_secs_f64(),
                    "shutdown timeout reached, abandoning workers"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_shutdown_waits_for_workers() {
        let supervisor = JobSupervisor::new();
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let done = Arc::clone(&done);
            supervisor
                .spawn(async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    done.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        assert!(supervisor.shutdown(Duration::from_secs(5)).await);
        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert_eq!(supervisor.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_spawn_rejected_after_shutdown() {
        let supervisor = JobSupervisor::new();
        assert!(supervisor.shutdown(Duration::from_millis(10)).await);
        assert!(supervisor.is_shutting_down());
        let err = supervisor.spawn(async {}).unwrap_err();
        assert!(matches!(err, SubmitError::ShuttingDown));
    }

    #[tokio::test]
    async fn test_shutdown_times_out_on_stuck_worker() {
        let supervisor = JobSupervisor::new();
        supervisor
            .spawn(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
            })
            .unwrap();
        assert!(!supervisor.shutdown(Duration::from_millis(20)).await);
        assert_eq!(supervisor.in_flight(), 1);
    }
}
