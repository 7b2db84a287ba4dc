//! One-shot promise/future cells carrying subproblem results.
//!
//! Built on a bounded crossbeam channel of capacity one: fulfilling the
//! promise never blocks, and the exactly-once write is structural because
//! [`Promise::fulfil`] consumes the promise. Dropping a promise unfulfilled
//! disconnects the channel, which every waiting [`Future`] observes as
//! [`Broken`] — the mechanism that unblocks join tasks when a producer
//! fails.

use crossbeam::channel::{bounded, Receiver, Sender};

/// The producing half of a one-shot cell.
pub struct Promise<T> {
    sender: Sender<T>,
}

/// The consuming half of a one-shot cell.
pub struct Future<T> {
    receiver: Receiver<T>,
}

/// The promise was dropped without being fulfilled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Broken;

/// Creates a connected promise/future pair.
pub fn pair<T>() -> (Promise<T>, Future<T>) {
    let (sender, receiver) = bounded(1);

    (Promise { sender }, Future { receiver })
}

impl<T> Promise<T> {
    /// Fulfils the promise with `value`, consuming it.
    ///
    /// A future abandoned by its consumer is not an error here: the value
    /// is simply discarded.
    pub fn fulfil(self, value: T) {
        let _ = self.sender.send(value);
    }
}

impl<T> Future<T> {
    /// Blocks until the value arrives, consuming the future.
    pub fn wait(self) -> Result<T, Broken> {
        self.receiver.recv().map_err(|_| Broken)
    }
}
