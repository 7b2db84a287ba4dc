//! Per-worker CSV event tracing.
//!
//! Strictly observational. Workers record scheduling events into
//! thread-local buffers (zero contention on the hot path); each drain loop
//! flushes its buffer into a global registry through an RAII guard, and
//! [`export_to_dir`] writes one `worker_<id>.csv` per worker with columns
//! `time_ms,worker_id,event_code,info1,info2`.
//!
//! Compiled to empty inline stubs unless the `trace` feature is enabled.

/// Closed set of traced scheduler events.
#[derive(Debug, Clone, Copy)]
pub enum Event {
    /// A worker has been instantiated. `info1` is the id of the parent
    /// scheduler, `info2` the id of the worker.
    Create,
    /// The worker started to retrieve a job.
    RetrieveBegin,
    /// A job has been retrieved from the global queue.
    RetrievedGlobal,
    /// A job has been retrieved from the local list.
    RetrievedLocal,
    /// No job found; the scheduler has terminated.
    NoJob,
    /// The worker started to schedule a job.
    ScheduleBegin,
    /// The job has been placed in the global queue.
    ScheduledGlobal,
    /// The job has been kept in the local list.
    ScheduledLocal,
    /// The chi-squared test has been skipped (local jobs below expectation).
    /// `info1` is the local job count, `info2` the expected count.
    ChiSkipped,
    /// The chi-squared test passed. `info1` is the statistic, `info2` the
    /// critical value.
    ChiPassed,
    /// The chi-squared test failed. `info1` is the statistic, `info2` the
    /// critical value.
    ChiFailed,
    /// A job has been completed.
    JobDone,
}

impl Event {
    /// Six-character event code used in the CSV output.
    pub fn code(self) -> &'static str {
        match self {
            Event::Create => "CREATE",
            Event::RetrieveBegin => "RT_BGN",
            Event::RetrievedGlobal => "RT_GLB",
            Event::RetrievedLocal => "RT_LOC",
            Event::NoJob => "NO_JOB",
            Event::ScheduleBegin => "SC_BGN",
            Event::ScheduledGlobal => "SC_GLB",
            Event::ScheduledLocal => "SC_LOC",
            Event::ChiSkipped => "CHI_SK",
            Event::ChiPassed => "CHI_OK",
            Event::ChiFailed => "CHI_NO",
            Event::JobDone => "J_DONE",
        }
    }
}

#[cfg(feature = "trace")]
mod imp {
    use super::Event;
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use std::fs::File;
    use std::io::{BufWriter, Write};
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Instant;

    #[derive(Debug, Clone)]
    struct Record {
        time_ms: f64,
        worker_id: usize,
        code: &'static str,
        info1: Option<f64>,
        info2: Option<f64>,
    }

    thread_local! {
        static BUFFER: RefCell<Vec<Record>> = RefCell::new(Vec::with_capacity(1024));
    }

    lazy_static::lazy_static! {
        static ref START: Instant = Instant::now();
        static ref RECORDS: Mutex<Vec<Record>> = Mutex::new(Vec::new());
    }

    /// Records an event for the given worker into the thread-local buffer.
    pub(crate) fn record(event: Event, worker_id: usize, info1: Option<f64>, info2: Option<f64>) {
        let time_ms = 1000.0 * START.elapsed().as_secs_f64();

        BUFFER.with(|buffer| {
            buffer.borrow_mut().push(Record {
                time_ms,
                worker_id,
                code: event.code(),
                info1,
                info2,
            });
        });
    }

    /// Moves the calling thread's buffer into the global registry. Must be
    /// called by each worker thread before it exits; [`FlushGuard`] does so
    /// on drop.
    pub fn flush_thread() {
        BUFFER.with(|buffer| {
            let mut local = buffer.borrow_mut();
            if !local.is_empty() {
                let mut records = RECORDS.lock().unwrap();
                records.append(&mut local);
            }
        });
    }

    /// Discards every collected record.
    pub fn clear() {
        flush_thread();
        RECORDS.lock().unwrap().clear();
    }

    /// Writes one `worker_<id>.csv` per worker into `dir`.
    pub fn export_to_dir<P: AsRef<Path>>(dir: P) -> std::io::Result<()> {
        flush_thread();

        let records = RECORDS.lock().unwrap();
        let mut by_worker: BTreeMap<usize, Vec<&Record>> = BTreeMap::new();

        for record in records.iter() {
            by_worker.entry(record.worker_id).or_default().push(record);
        }

        for (worker_id, mut rows) in by_worker {
            rows.sort_by(|a, b| a.time_ms.total_cmp(&b.time_ms));

            let path = dir.as_ref().join(format!("worker_{}.csv", worker_id));
            let mut writer = BufWriter::new(File::create(path)?);
            writeln!(writer, "time_ms,worker_id,event_code,info1,info2")?;

            for row in rows {
                let info1 = row.info1.map(|v| v.to_string()).unwrap_or_default();
                let info2 = row.info2.map(|v| v.to_string()).unwrap_or_default();
                writeln!(
                    writer,
                    "{},{},{},{},{}",
                    row.time_ms, row.worker_id, row.code, info1, info2
                )?;
            }

            writer.flush()?;
        }

        Ok(())
    }

    /// RAII guard that flushes the thread-local buffer when dropped.
    pub(crate) struct FlushGuard;

    impl Drop for FlushGuard {
        fn drop(&mut self) {
            flush_thread();
        }
    }

}

#[cfg(feature = "trace")]
pub use imp::{clear, export_to_dir, flush_thread};

#[cfg(feature = "trace")]
pub(crate) use imp::{record, FlushGuard};

#[cfg(not(feature = "trace"))]
#[inline(always)]
pub(crate) fn record(_event: Event, _worker_id: usize, _info1: Option<f64>, _info2: Option<f64>) {}

/// No-op stand-in when tracing is compiled out.
#[cfg(not(feature = "trace"))]
pub(crate) struct FlushGuard;
