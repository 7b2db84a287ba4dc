//! The scheduler as a standalone, general-purpose task pool: jobs scheduled
//! round-robin, drained by a pool of threads, with nested scheduling from
//! inside running jobs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use rustdac::{Job, Policy, Scheduler};

fn drain(scheduler: &Scheduler, id: usize) {
    while let Some(job) = scheduler.get_job(id) {
        job.run(id);
        scheduler.mark_done(id);
    }
}

#[test]
fn test_pool_drains_round_robin_schedule() {
    let workers = 4;
    let scheduler = Arc::new(Scheduler::new(workers, Policy::Strict));
    let executed = Arc::new(AtomicUsize::new(0));

    let num_jobs = 1000;
    for i in 0..num_jobs {
        let executed_clone = executed.clone();
        scheduler.schedule(
            Job::new(move |_| {
                executed_clone.fetch_add(1, Ordering::SeqCst);
            }),
            i % workers,
        );
    }

    let mut handles = Vec::new();
    for id in 0..workers {
        let scheduler_clone = Arc::clone(&scheduler);
        handles.push(thread::spawn(move || drain(&scheduler_clone, id)));
    }

    for handle in handles {
        handle.join().expect("worker thread panicked");
    }

    assert_eq!(executed.load(Ordering::SeqCst), num_jobs);
    assert_eq!(scheduler.remaining_jobs(), 0);
}

#[test]
fn test_jobs_can_schedule_more_jobs() {
    let workers = 2;
    let scheduler = Arc::new(Scheduler::new(workers, Policy::OnlyGlobal));
    let executed = Arc::new(AtomicUsize::new(0));

    // Each seed job spawns ten follow-ups from whichever worker runs it.
    for _ in 0..8 {
        let scheduler_clone = Arc::clone(&scheduler);
        let executed_clone = executed.clone();

        scheduler.schedule(
            Job::new(move |id| {
                for _ in 0..10 {
                    let executed_inner = executed_clone.clone();
                    scheduler_clone.schedule(
                        Job::new(move |_| {
                            executed_inner.fetch_add(1, Ordering::SeqCst);
                        }),
                        id,
                    );
                }
            }),
            0,
        );
    }

    let mut handles = Vec::new();
    for id in 0..workers {
        let scheduler_clone = Arc::clone(&scheduler);
        handles.push(thread::spawn(move || drain(&scheduler_clone, id)));
    }

    for handle in handles {
        handle.join().expect("worker thread panicked");
    }

    assert_eq!(executed.load(Ordering::SeqCst), 80);
}
