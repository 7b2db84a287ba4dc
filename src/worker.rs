//! Per-worker scheduling state and the chi-squared balancing decision.
//!
//! Each worker owns a private list of jobs with stack discipline: new jobs
//! are pushed to the tail and retrieved from the tail, so the freshest,
//! cache-warm work runs first. Migration to the global queue always takes
//! the head of the list, the oldest resident job.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::job::Job;
use crate::job_list::SyncJobList;
#[cfg(feature = "metrics")]
use crate::metrics::Metrics;
use crate::trace::{self, Event};

/// Scheduler state a worker needs to take a balancing decision.
pub(crate) struct BalanceContext<'a> {
    pub(crate) global: &'a SyncJobList,
    pub(crate) n_workers: usize,
    pub(crate) chi_limit: f32,
    #[cfg(feature = "metrics")]
    pub(crate) metrics: &'a Metrics,
}

/// Outcome of the chi-squared balancing decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum ChiDecision {
    /// Short-circuit: single worker or only-local policy. Keep local.
    KeepForced,
    /// Short-circuit: only-global policy or no outstanding work. Migrate.
    MigrateForced,
    /// The local list holds less than its expected share; keep local
    /// without running the test.
    KeepBelowExpectation { observed: f32, expected: f32 },
    /// The test ran; the job stays local iff the statistic is within the
    /// critical value.
    Tested { statistic: f32, keep: bool },
}

impl ChiDecision {
    pub(crate) fn keeps_local(self) -> bool {
        match self {
            ChiDecision::KeepForced => true,
            ChiDecision::MigrateForced => false,
            ChiDecision::KeepBelowExpectation { .. } => true,
            ChiDecision::Tested { keep, .. } => keep,
        }
    }
}

/// Goodness-of-fit statistic for the two-bucket approximation: this worker's
/// local list against all other workers pooled.
pub(crate) fn chi_statistic(observed: f32, expected: f32, par_degree: f32) -> f32 {
    let mut chi_squared = (observed - expected) * (observed - expected);
    chi_squared += chi_squared / (par_degree - 1.0);
    chi_squared / expected
}

/// Decides whether a worker holding `local_jobs` should keep the freshly
/// scheduled job local, testing the local count against the expected share
/// of `remaining` under a uniform distribution across `n_workers`.
pub(crate) fn chi_squared_test(
    local_jobs: usize,
    remaining: u64,
    n_workers: usize,
    chi_limit: f32,
) -> ChiDecision {
    let par_degree = n_workers as f32;

    // No parallelism to balance against, or only-local policy.
    if par_degree < 2.0 || chi_limit == f32::INFINITY {
        return ChiDecision::KeepForced;
    }

    // Only-global policy.
    if chi_limit < 0.0 {
        return ChiDecision::MigrateForced;
    }

    // Straight to global (and avoid a division by zero).
    if remaining == 0 {
        return ChiDecision::MigrateForced;
    }

    let observed = local_jobs as f32;
    let expected = remaining as f32 / par_degree;

    if observed < expected {
        return ChiDecision::KeepBelowExpectation { observed, expected };
    }

    let statistic = chi_statistic(observed, expected, par_degree);

    ChiDecision::Tested {
        statistic,
        keep: statistic <= chi_limit,
    }
}

/// A worker's scheduling state within one scheduler.
///
/// The local list is touched only by the owning worker thread; the mutex
/// exists to satisfy aliasing rules and is never contended.
pub(crate) struct Worker {
    id: usize,
    local: Mutex<VecDeque<Job>>,
}

impl Worker {
    pub(crate) fn new(id: usize) -> Self {
        Worker {
            id,
            local: Mutex::new(VecDeque::new()),
        }
    }

    /// Retrieves a job: tail of the local list first (no blocking), global
    /// queue otherwise. Returns `None` once the scheduler has terminated.
    pub(crate) fn get_job(&self, ctx: &BalanceContext<'_>) -> Option<Job> {
        trace::record(Event::RetrieveBegin, self.id, None, None);

        if let Some(job) = self.local.lock().unwrap().pop_back() {
            #[cfg(feature = "metrics")]
            Metrics::bump(&ctx.metrics.local_pops);
            trace::record(Event::RetrievedLocal, self.id, None, None);

            return Some(job);
        }

        match ctx.global.pop() {
            Some(job) => {
                #[cfg(feature = "metrics")]
                Metrics::bump(&ctx.metrics.global_pops);
                trace::record(Event::RetrievedGlobal, self.id, None, None);

                Some(job)
            }
            None => {
                trace::record(Event::NoJob, self.id, None, None);

                None
            }
        }
    }

    /// Pushes a job to the tail of the local list, then either keeps it
    /// there or migrates the list's head to the global queue, depending on
    /// the balancing decision. The fresh job is always the one retained.
    pub(crate) fn schedule(&self, job: Job, ctx: &BalanceContext<'_>) {
        trace::record(Event::ScheduleBegin, self.id, None, None);

        let mut local = self.local.lock().unwrap();
        local.push_back(job);

        let decision = chi_squared_test(
            local.len(),
            ctx.global.get_remaining(),
            ctx.n_workers,
            ctx.chi_limit,
        );
        self.record_decision(decision, ctx);

        if decision.keeps_local() {
            #[cfg(feature = "metrics")]
            Metrics::bump(&ctx.metrics.local_pushes);
            trace::record(Event::ScheduledLocal, self.id, None, None);

            return;
        }

        if let Some(oldest) = local.pop_front() {
            drop(local);
            ctx.global.push(oldest);

            #[cfg(feature = "metrics")]
            Metrics::bump(&ctx.metrics.global_pushes);
            trace::record(Event::ScheduledGlobal, self.id, None, None);
        }
    }

    fn record_decision(&self, decision: ChiDecision, ctx: &BalanceContext<'_>) {
        match decision {
            ChiDecision::KeepForced | ChiDecision::MigrateForced => {}
            ChiDecision::KeepBelowExpectation { observed, expected } => {
                #[cfg(feature = "metrics")]
                Metrics::bump(&ctx.metrics.chi_skips);
                trace::record(
                    Event::ChiSkipped,
                    self.id,
                    Some(observed as f64),
                    Some(expected as f64),
                );
            }
            ChiDecision::Tested { statistic, keep } => {
                #[cfg(feature = "metrics")]
                Metrics::bump(if keep {
                    &ctx.metrics.chi_passes
                } else {
                    &ctx.metrics.chi_failures
                });
                trace::record(
                    if keep { Event::ChiPassed } else { Event::ChiFailed },
                    self.id,
                    Some(statistic as f64),
                    Some(ctx.chi_limit as f64),
                );
            }
        }
    }
}
