// crates/server-jobs/src/limiter.rs
//! Per-kind ceiling on simultaneously running workers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::metrics;
use crate::types::JobKind;

#[derive(Debug, Default)]
struct Counters {
    active: AtomicUsize,
    peak: AtomicUsize,
}

/// Non-blocking admission counter. A permit is taken before a worker is
/// spawned and released when the permit is dropped, which happens when the
/// worker's task ends on any path, panics included.
#[derive(Debug, Clone)]
pub struct WorkerLimiter {
    kind: JobKind,
    cap: usize,
    counters: Arc<Counters>,
}

impl WorkerLimiter {
    pub fn new(kind: JobKind, cap: usize) -> Self {
        Self {
            kind,
            cap,
            counters: Arc::default(),
        }
    }

    /// Take a worker slot, or `None` if `cap` workers are already running.
    pub fn try_acquire(&self) -> Option<WorkerPermit> {
        let cap = self.cap;
        let previous = self
            .counters
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < cap).then_some(n + 1)
            })
            .ok()?;
        let now = previous + 1;
        self.counters.peak.fetch_max(now, Ordering::AcqRel);
        metrics::workers_active(self.kind, now);
        Some(WorkerPermit {
            kind: self.kind,
            counters: Arc::clone(&self.counters),
        })
    }

    pub fn active(&self) -> usize {
        self.counters.active.load(Ordering::Acquire)
    }

    /// Highest `active` value ever observed.
    pub fn peak(&self) -> usize {
        self.counters.peak.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }
}

/// Proof of admission; releases its slot on drop.
#[derive(Debug)]
pub struct WorkerPermit {
    kind: JobKind,
    counters: Arc<Counters>,
}

impl Drop for WorkerPermit {
    fn drop(&mut self) {
        let now = self.counters.active.fetch_sub(1, Ordering::AcqRel) - 1;
        metrics::workers_active(self.kind, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceiling_rejects_excess() {
        let limiter = WorkerLimiter::new(JobKind::Thumbnail, 2);
        let a = limiter.try_acquire().unwrap();
        let _b = limiter.try_acquire().unwrap();
        assert!(limiter.try_acquire().is_none());
        assert_eq!(limiter.active(), 2);

        drop(a);
        assert_eq!(limiter.active(), 1);
        assert!(limiter.try_acquire().is_some());
    }

    #[test]
    fn test_concurrent_acquire_never_exceeds_cap() {
        let limiter = WorkerLimiter::new(JobKind::Delete, 4);
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        if let Some(permit) = limiter.try_acquire() {
                            assert!(limiter.active() <= 4);
                            drop(permit);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(limiter.active(), 0);
        assert!(limiter.peak() <= 4);
    }
}
