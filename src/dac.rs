//! Parallel divide-and-conquer engine.
//!
//! [`Dac`] drives a user-supplied divide/conquer/base-test/base-case
//! quadruple over two layered schedulers, one for the fork (split) phase
//! and one for the join (combine) phase. Every worker exhausts the fork
//! scheduler before any worker touches the joins, so no join can run while
//! any child fork is still outstanding. Within the join phase, both legal
//! join placements hand out newer joins first — local lists by stack
//! discipline, the pooled global list by construction — so the joins a
//! parent blocks on always start before the parent itself.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread;

use thiserror::Error;

#[cfg(feature = "metrics")]
use crate::metrics::MetricsSnapshot;
use crate::job::Job;
use crate::policy::Policy;
use crate::promise::{self, Future, Promise};
use crate::scheduler::Scheduler;
use crate::trace;

type DivideFn<In> = dyn Fn(&In) -> Vec<In> + Send + Sync;
type ConquerFn<Out> = dyn Fn(Vec<Out>) -> Out + Send + Sync;
type BaseTestFn<In> = dyn Fn(&In) -> bool + Send + Sync;
type BaseCaseFn<In, Out> = dyn Fn(&In) -> Out + Send + Sync;

struct Callbacks<In, Out> {
    divide: Box<DivideFn<In>>,
    conquer: Box<ConquerFn<Out>>,
    base_test: Box<BaseTestFn<In>>,
    base_case: Box<BaseCaseFn<In, Out>>,
}

/// Errors surfaced by [`Dac::compute`].
#[derive(Debug, Error)]
pub enum ComputeError {
    /// `workers` was zero.
    #[error("at least one worker is required")]
    NoWorkers,
    /// The join scheduler was given a policy that mixes local and global
    /// placement, which can deadlock the join phase.
    #[error("join scheduler requires an only-local or only-global policy, got {0:?}")]
    InvalidJoinPolicy(Policy),
    /// A user callback panicked; the computation was abandoned.
    #[error("a user callback panicked: {message}")]
    CallbackPanicked { message: String },
}

/// First panic payload observed across the worker threads.
#[derive(Default)]
struct FailureCell {
    message: Mutex<Option<String>>,
}

impl FailureCell {
    fn record(&self, payload: Box<dyn std::any::Any + Send>) {
        let message = if let Some(text) = payload.downcast_ref::<&str>() {
            (*text).to_string()
        } else if let Some(text) = payload.downcast_ref::<String>() {
            text.clone()
        } else {
            "unknown panic payload".to_string()
        };

        let mut slot = self.message.lock().unwrap();
        if slot.is_none() {
            *slot = Some(message);
        }
    }

    fn take(&self) -> Option<String> {
        self.message.lock().unwrap().take()
    }
}

struct Engines {
    forks: Arc<Scheduler>,
    joins: Arc<Scheduler>,
}

impl Engines {
    fn reset(&mut self, workers: usize, fork_policy: Policy, join_policy: Policy) {
        Self::reset_slot(&mut self.forks, workers, fork_policy, Scheduler::new);
        Self::reset_slot(&mut self.joins, workers, join_policy, Scheduler::new_lifo);
    }

    // Once a run has drained, every task-held clone is gone and the
    // scheduler is uniquely owned again, so it can be reset in place.
    fn reset_slot(
        slot: &mut Arc<Scheduler>,
        workers: usize,
        policy: Policy,
        make: fn(usize, Policy) -> Scheduler,
    ) {
        match Arc::get_mut(slot) {
            Some(scheduler) => scheduler.reset(workers, policy),
            None => *slot = Arc::new(make(workers, policy)),
        }
    }
}

/// Framework for parallel divide-and-conquer computation.
///
/// A `Dac` instance captures the four callbacks once and can then compute
/// any number of inputs, each call owning its own pool of worker threads
/// for the duration of the computation.
///
/// # Example
///
/// ```
/// use rustdac::Dac;
///
/// let sum = Dac::new(
///     |values: &Vec<u64>| {
///         let mid = values.len() / 2;
///         vec![values[..mid].to_vec(), values[mid..].to_vec()]
///     },
///     |parts: Vec<u64>| parts.into_iter().sum(),
///     |values: &Vec<u64>| values.len() <= 1,
///     |values: &Vec<u64>| values.first().copied().unwrap_or(0),
/// );
///
/// let total = sum.compute((1..=100).collect(), 4).unwrap();
/// assert_eq!(total, 5050);
/// ```
pub struct Dac<In, Out> {
    callbacks: Arc<Callbacks<In, Out>>,
    engines: Mutex<Engines>,
}

impl<In, Out> Dac<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    /// Creates a `Dac` instance from the four callbacks.
    ///
    /// `base_test` returns true iff its input is small enough to solve
    /// directly with `base_case`. `divide` must produce strictly smaller
    /// subproblems; `conquer` receives their results in the same order
    /// `divide` emitted them.
    pub fn new<D, C, T, B>(divide: D, conquer: C, base_test: T, base_case: B) -> Self
    where
        D: Fn(&In) -> Vec<In> + Send + Sync + 'static,
        C: Fn(Vec<Out>) -> Out + Send + Sync + 'static,
        T: Fn(&In) -> bool + Send + Sync + 'static,
        B: Fn(&In) -> Out + Send + Sync + 'static,
    {
        Dac {
            callbacks: Arc::new(Callbacks {
                divide: Box::new(divide),
                conquer: Box::new(conquer),
                base_test: Box::new(base_test),
                base_case: Box::new(base_case),
            }),
            engines: Mutex::new(Engines {
                forks: Arc::new(Scheduler::new(0, Policy::Strict)),
                joins: Arc::new(Scheduler::new_lifo(0, Policy::OnlyLocal)),
            }),
        }
    }

    /// Computes the result for `input` using `workers` parallel threads,
    /// with the default policies: `strict` for forks, `only_local` for
    /// joins.
    pub fn compute(&self, input: In, workers: usize) -> Result<Out, ComputeError> {
        self.compute_with_policies(input, workers, Policy::Strict, Policy::OnlyLocal)
    }

    /// Computes the result for `input` using `workers` parallel threads and
    /// the given balancing policies.
    ///
    /// `join_policy` must be [`Policy::OnlyLocal`] or [`Policy::OnlyGlobal`];
    /// anything else is rejected before any thread is spawned. Concurrent
    /// calls on the same instance are serialised.
    pub fn compute_with_policies(
        &self,
        input: In,
        workers: usize,
        fork_policy: Policy,
        join_policy: Policy,
    ) -> Result<Out, ComputeError> {
        if workers == 0 {
            return Err(ComputeError::NoWorkers);
        }

        if !join_policy.is_valid_for_joins() {
            return Err(ComputeError::InvalidJoinPolicy(join_policy));
        }

        let mut engines = self.engines.lock().unwrap();
        engines.reset(workers, fork_policy, join_policy);

        let forks = Arc::clone(&engines.forks);
        let joins = Arc::clone(&engines.joins);
        let failure = Arc::new(FailureCell::default());

        let (root_promise, root_future) = promise::pair();
        forks.schedule(
            Self::fork_job(
                Arc::clone(&self.callbacks),
                input,
                root_promise,
                Arc::clone(&forks),
                Arc::clone(&joins),
            ),
            0,
        );

        let mut handles = Vec::with_capacity(workers - 1);
        let mut caller_id = workers - 1;

        for id in 0..workers - 1 {
            let forks = Arc::clone(&forks);
            let joins = Arc::clone(&joins);
            let failure = Arc::clone(&failure);

            let spawned = thread::Builder::new()
                .name(format!("dac-worker-{}", id))
                .spawn(move || drive(&forks, &joins, id, &failure));

            match spawned {
                Ok(handle) => handles.push(handle),
                // Degraded run: continue with whatever threads started. The
                // calling thread claims id 0 when that spawn failed, so the
                // seeded root task is always drained.
                Err(_) if id == 0 => caller_id = 0,
                Err(_) => {}
            }
        }

        drive(&forks, &joins, caller_id, &failure);

        for handle in handles {
            let _ = handle.join();
        }

        match root_future.wait() {
            Ok(output) => Ok(output),
            Err(_) => Err(ComputeError::CallbackPanicked {
                message: failure
                    .take()
                    .unwrap_or_else(|| "unknown panic payload".to_string()),
            }),
        }
    }

    /// Counter snapshot of the fork scheduler after the last computation.
    #[cfg(feature = "metrics")]
    pub fn fork_metrics(&self) -> MetricsSnapshot {
        self.engines.lock().unwrap().forks.metrics()
    }

    /// Counter snapshot of the join scheduler after the last computation.
    #[cfg(feature = "metrics")]
    pub fn join_metrics(&self) -> MetricsSnapshot {
        self.engines.lock().unwrap().joins.metrics()
    }

    fn fork_job(
        callbacks: Arc<Callbacks<In, Out>>,
        input: In,
        promise: Promise<Out>,
        forks: Arc<Scheduler>,
        joins: Arc<Scheduler>,
    ) -> Job {
        Job::new(move |id| Self::fork(&callbacks, input, promise, &forks, &joins, id))
    }

    fn fork(
        callbacks: &Arc<Callbacks<In, Out>>,
        input: In,
        promise: Promise<Out>,
        forks: &Arc<Scheduler>,
        joins: &Arc<Scheduler>,
        id: usize,
    ) {
        if (callbacks.base_test)(&input) {
            promise.fulfil((callbacks.base_case)(&input));
            forks.mark_done(id);

            return;
        }

        let children = (callbacks.divide)(&input);
        // The subtree below only needs the children from here on.
        drop(input);

        assert!(!children.is_empty(), "divide must produce at least one subproblem");

        let mut promises = Vec::with_capacity(children.len());
        let mut futures = Vec::with_capacity(children.len());

        for _ in 0..children.len() {
            let (child_promise, child_future) = promise::pair();
            promises.push(child_promise);
            futures.push(child_future);
        }

        // The join is scheduled before any child fork so it exists before
        // any child can complete; it goes to its own scheduler, which
        // shares no state with the forks.
        {
            let callbacks = Arc::clone(callbacks);
            let joins_handle = Arc::clone(joins);

            joins.schedule(
                Job::new(move |join_id| {
                    Self::join(&callbacks, futures, promise, &joins_handle, join_id)
                }),
                id,
            );
        }

        let mut sub_forks: Vec<(In, Promise<Out>)> = children.into_iter().zip(promises).collect();
        let (last_input, last_promise) = sub_forks.pop().expect("children are non-empty");

        for (child_input, child_promise) in sub_forks {
            forks.schedule(
                Self::fork_job(
                    Arc::clone(callbacks),
                    child_input,
                    child_promise,
                    Arc::clone(forks),
                    Arc::clone(joins),
                ),
                id,
            );
        }

        // Tail-run the last child inline: it fuses the child frame with the
        // parent's continuation, bounding queue growth, and performs the one
        // mark_done this fork task still owes.
        Self::fork(callbacks, last_input, last_promise, forks, joins, id);
    }

    fn join(
        callbacks: &Arc<Callbacks<In, Out>>,
        futures: Vec<Future<Out>>,
        promise: Promise<Out>,
        joins: &Arc<Scheduler>,
        id: usize,
    ) {
        let mut results = Vec::with_capacity(futures.len());

        for future in futures {
            match future.wait() {
                Ok(value) => results.push(value),
                // A producer died without fulfilling its promise. Dropping
                // our own promise propagates the failure towards the root;
                // the join counter must still retire.
                Err(_) => {
                    joins.mark_done(id);

                    return;
                }
            }
        }

        promise.fulfil((callbacks.conquer)(results));
        joins.mark_done(id);
    }
}

/// Per-worker drain loop: exhaust the fork scheduler completely, then the
/// join scheduler. The fork scheduler signals termination to every worker
/// only once all fork tasks are marked done, so no join can run while any
/// child fork is still outstanding.
fn drive(forks: &Scheduler, joins: &Scheduler, id: usize, failure: &FailureCell) {
    let _flush = trace::FlushGuard;

    while let Some(job) = forks.get_job(id) {
        run_job(forks, job, id, failure);
    }

    while let Some(job) = joins.get_job(id) {
        run_job(joins, job, id, failure);
    }
}

fn run_job(scheduler: &Scheduler, job: Job, id: usize, failure: &FailureCell) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| job.run(id))) {
        failure.record(payload);
        // The panicking task never reached its own mark_done; issue the one
        // it still owed so the counter cannot strand the other workers.
        scheduler.mark_done(id);
    }
}
