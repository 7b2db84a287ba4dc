#[cfg(feature = "metrics")]
use std::sync::atomic::{AtomicU64, Ordering};

/// Optional performance counters for a scheduler.
#[cfg(feature = "metrics")]
#[derive(Debug, Default)]
pub struct Metrics {
    /// Total jobs scheduled (local or global).
    pub jobs_scheduled: AtomicU64,
    /// Total jobs marked done.
    pub jobs_completed: AtomicU64,
    /// Jobs kept on a local list at schedule time.
    pub local_pushes: AtomicU64,
    /// Jobs migrated to the global queue at schedule time.
    pub global_pushes: AtomicU64,
    /// Jobs retrieved from a local list.
    pub local_pops: AtomicU64,
    /// Jobs retrieved from the global queue.
    pub global_pops: AtomicU64,
    /// Chi-squared tests skipped because the local list was below expectation.
    pub chi_skips: AtomicU64,
    /// Chi-squared tests that passed (job kept local).
    pub chi_passes: AtomicU64,
    /// Chi-squared tests that failed (job migrated).
    pub chi_failures: AtomicU64,
}

#[cfg(feature = "metrics")]
impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of the current counter values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_scheduled: self.jobs_scheduled.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            local_pushes: self.local_pushes.load(Ordering::Relaxed),
            global_pushes: self.global_pushes.load(Ordering::Relaxed),
            local_pops: self.local_pops.load(Ordering::Relaxed),
            global_pops: self.global_pops.load(Ordering::Relaxed),
            chi_skips: self.chi_skips.load(Ordering::Relaxed),
            chi_passes: self.chi_passes.load(Ordering::Relaxed),
            chi_failures: self.chi_failures.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of scheduler counters at a point in time.
#[cfg(feature = "metrics")]
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub jobs_scheduled: u64,
    pub jobs_completed: u64,
    pub local_pushes: u64,
    pub global_pushes: u64,
    pub local_pops: u64,
    pub global_pops: u64,
    pub chi_skips: u64,
    pub chi_passes: u64,
    pub chi_failures: u64,
}

#[cfg(feature = "metrics")]
impl MetricsSnapshot {
    /// Fraction of scheduled jobs that migrated to the global queue.
    pub fn migration_ratio(&self) -> f64 {
        if self.jobs_scheduled > 0 {
            self.global_pushes as f64 / self.jobs_scheduled as f64
        } else {
            0.0
        }
    }

    /// Jobs still outstanding according to the counters.
    pub fn outstanding(&self) -> i64 {
        self.jobs_scheduled as i64 - self.jobs_completed as i64
    }
}
