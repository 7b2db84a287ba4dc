//! A parallel, general-purpose task scheduler.
//!
//! The scheduler divides scheduled jobs over multiple workers, each one
//! owning a local list, plus a global queue accessible by all of them. A
//! balancing [`Policy`] decides, at every schedule call, whether work stays
//! on the scheduling worker's local list or migrates to the global queue.

#[cfg(feature = "metrics")]
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::job::Job;
use crate::job_list::SyncJobList;
use crate::policy::Policy;
use crate::trace::{self, Event};
use crate::worker::{BalanceContext, Worker};

#[cfg(feature = "trace")]
static NEXT_SCHEDULER_ID: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

/// A pool of workers sharing one global job queue and one outstanding-work
/// counter.
///
/// The scheduler itself spawns no threads: callers drive it by invoking
/// [`Scheduler::get_job`] from as many threads as there are workers, each
/// thread using its own worker id.
pub struct Scheduler {
    global: SyncJobList,
    workers: Vec<Worker>,
    n_workers: usize,
    chi_limit: f32,
    #[cfg(feature = "metrics")]
    metrics: Metrics,
    #[cfg(feature = "trace")]
    trace_id: usize,
}

impl Scheduler {
    /// Creates a scheduler with `n_workers` workers and the given balancing
    /// policy. The global queue hands out the oldest job first.
    pub fn new(n_workers: usize, policy: Policy) -> Self {
        Self::with_global_list(SyncJobList::new_fifo(), n_workers, policy)
    }

    /// Like [`Scheduler::new`], but the global queue hands out the newest
    /// job first.
    ///
    /// This is the discipline for a scheduler of join tasks: a parent join
    /// is always scheduled before the joins of its children, and it blocks
    /// on their results, so pooled joins must be drained newest-first or a
    /// worker could pick up a parent that can never complete ahead of its
    /// children.
    pub fn new_lifo(n_workers: usize, policy: Policy) -> Self {
        Self::with_global_list(SyncJobList::new_lifo(), n_workers, policy)
    }

    fn with_global_list(global: SyncJobList, n_workers: usize, policy: Policy) -> Self {
        let mut scheduler = Scheduler {
            global,
            workers: Vec::new(),
            n_workers: 0,
            chi_limit: policy.chi_limit(),
            #[cfg(feature = "metrics")]
            metrics: Metrics::new(),
            #[cfg(feature = "trace")]
            trace_id: NEXT_SCHEDULER_ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed),
        };
        scheduler.reset(n_workers, policy);

        scheduler
    }

    /// Resets the scheduler: erases any pending job, zeroes the job counter,
    /// and rebuilds the workers.
    pub fn reset(&mut self, n_workers: usize, policy: Policy) {
        self.global.clear();
        self.n_workers = n_workers;
        self.workers.clear();

        for id in 0..n_workers {
            #[cfg(feature = "trace")]
            trace::record(
                Event::Create,
                id,
                Some(self.trace_id as f64),
                Some(id as f64),
            );

            self.workers.push(Worker::new(id));
        }

        self.set_policy(policy);
    }

    /// Sets the balancing policy of the scheduler.
    pub fn set_policy(&mut self, policy: Policy) {
        self.chi_limit = policy.chi_limit();
    }

    /// Schedules a job to the given worker, increasing the job counter by
    /// one. The increment happens before any possible migration, so a
    /// concurrent reader of the counter never undercounts.
    ///
    /// It is not ensured that the specified worker will eventually run the
    /// job; that depends on the balancing policy.
    pub fn schedule(&self, job: Job, to: usize) {
        self.global.inc_remaining(1);
        #[cfg(feature = "metrics")]
        Metrics::bump(&self.metrics.jobs_scheduled);

        self.workers[to].schedule(job, &self.balance_context());
    }

    /// Retrieves a job for the given worker: its local list first, the
    /// global queue otherwise.
    ///
    /// If no job is available anywhere, this call blocks until either a job
    /// is scheduled or the job counter reaches zero. Returns `None` only in
    /// the latter case, meaning no more jobs will ever be retrieved.
    /// Retrieving a job does not decrease the job counter.
    pub fn get_job(&self, from: usize) -> Option<Job> {
        self.workers[from].get_job(&self.balance_context())
    }

    /// Marks a job as done, decreasing the job counter by one. This is the
    /// only operation that decreases the counter: every scheduled job must
    /// eventually be marked done exactly once.
    pub fn mark_done(&self, from: usize) {
        self.global.dec_remaining(1);
        #[cfg(feature = "metrics")]
        Metrics::bump(&self.metrics.jobs_completed);
        trace::record(Event::JobDone, from, None, None);
    }

    /// Number of scheduled jobs not yet marked done.
    pub fn remaining_jobs(&self) -> u64 {
        self.global.get_remaining()
    }

    /// Number of workers in the scheduler.
    pub fn n_workers(&self) -> usize {
        self.n_workers
    }

    /// Snapshot of the scheduler's counters.
    #[cfg(feature = "metrics")]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    fn balance_context(&self) -> BalanceContext<'_> {
        BalanceContext {
            global: &self.global,
            n_workers: self.n_workers,
            chi_limit: self.chi_limit,
            #[cfg(feature = "metrics")]
            metrics: &self.metrics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_only_local_serves_own_worker_lifo() {
        let scheduler = Scheduler::new(2, Policy::OnlyLocal);
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let order_clone = order.clone();
            scheduler.schedule(
                Job::new(move |_| order_clone.lock().unwrap().push(i)),
                0,
            );
        }
        assert_eq!(scheduler.remaining_jobs(), 3);

        for _ in 0..3 {
            let job = scheduler.get_job(0).expect("job available locally");
            job.run(0);
            scheduler.mark_done(0);
        }

        assert_eq!(*order.lock().unwrap(), vec![2, 1, 0]);
        assert_eq!(scheduler.remaining_jobs(), 0);
        assert!(scheduler.get_job(1).is_none());
    }

    #[test]
    fn test_only_global_makes_jobs_visible_to_other_workers() {
        let scheduler = Scheduler::new(2, Policy::OnlyGlobal);
        let executed = Arc::new(AtomicUsize::new(0));

        for _ in 0..4 {
            let executed_clone = executed.clone();
            scheduler.schedule(
                Job::new(move |_| {
                    executed_clone.fetch_add(1, Ordering::SeqCst);
                }),
                0,
            );
        }

        // Worker 1 never scheduled anything, yet drains all four jobs from
        // the global queue.
        for _ in 0..4 {
            let job = scheduler.get_job(1).expect("job available globally");
            job.run(1);
            scheduler.mark_done(1);
        }

        assert_eq!(executed.load(Ordering::SeqCst), 4);
        assert!(scheduler.get_job(0).is_none());
    }

    #[test]
    fn test_termination_wakes_blocked_worker() {
        let scheduler = Arc::new(Scheduler::new(2, Policy::OnlyLocal));
        scheduler.schedule(Job::new(|_| {}), 0);

        let scheduler_clone = scheduler.clone();
        let blocked = thread::spawn(move || scheduler_clone.get_job(1).is_none());

        // Give the second worker time to block on the global queue, then
        // retire the only job.
        thread::sleep(Duration::from_millis(50));
        let job = scheduler.get_job(0).expect("local job");
        job.run(0);
        scheduler.mark_done(0);

        assert!(blocked.join().expect("blocked worker panicked"));
    }

    #[test]
    fn test_lifo_scheduler_pools_newest_first() {
        let scheduler = Scheduler::new_lifo(2, Policy::OnlyGlobal);
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let order_clone = order.clone();
            scheduler.schedule(
                Job::new(move |_| order_clone.lock().unwrap().push(i)),
                0,
            );
        }

        for _ in 0..3 {
            let job = scheduler.get_job(1).expect("job available globally");
            job.run(1);
            scheduler.mark_done(1);
        }

        assert_eq!(*order.lock().unwrap(), vec![2, 1, 0]);
    }

    #[test]
    fn test_reset_discards_pending_work() {
        let mut scheduler = Scheduler::new(2, Policy::OnlyLocal);
        scheduler.schedule(Job::new(|_| {}), 0);
        scheduler.schedule(Job::new(|_| {}), 1);
        assert_eq!(scheduler.remaining_jobs(), 2);

        scheduler.reset(4, Policy::Strict);
        assert_eq!(scheduler.remaining_jobs(), 0);
        assert_eq!(scheduler.n_workers(), 4);
        assert!(scheduler.get_job(3).is_none());
    }

    #[test]
    fn test_perfect_policy_migrates_unbalanced_local_list() {
        let scheduler = Scheduler::new(4, Policy::Perfect);

        // Everything is scheduled from worker 0, so its local list starts
        // at or above the uniform expectation and work spills to the global
        // queue where worker 1 can see it. The very first schedule migrates
        // deterministically: one local job against an expectation of 1/4.
        let executed = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let executed_clone = executed.clone();
            scheduler.schedule(
                Job::new(move |_| {
                    executed_clone.fetch_add(1, Ordering::SeqCst);
                }),
                0,
            );
        }

        let migrated = scheduler.get_job(1).expect("perfect policy must migrate work");
        migrated.run(1);
        scheduler.mark_done(1);

        // Worker 0 drains the rest, local list first, then the global
        // queue, until the counter reaches zero.
        while let Some(job) = scheduler.get_job(0) {
            job.run(0);
            scheduler.mark_done(0);
        }

        assert_eq!(executed.load(Ordering::SeqCst), 8);
        assert_eq!(scheduler.remaining_jobs(), 0);
    }
}
