//! Job definitions.
//!
//! Jobs are single-shot units of work consumed on execution. They carry no
//! identity and no return value; results flow through the one-shot promise
//! cells owned by the closures themselves.

/// A unit of work to be executed by a scheduler.
///
/// The closure receives the id of the worker that actually runs it, which
/// may differ from the worker it was scheduled to if the balancing policy
/// migrated it through the global queue.
pub struct Job {
    work: Box<dyn FnOnce(usize) + Send>,
}

impl Job {
    /// Creates a new job from the given work function.
    pub fn new<F>(work: F) -> Self
    where
        F: FnOnce(usize) + Send + 'static,
    {
        Job {
            work: Box::new(work),
        }
    }

    /// Executes the job on the worker with the given id, consuming it.
    pub fn run(self, worker_id: usize) {
        (self.work)(worker_id);
    }
}
