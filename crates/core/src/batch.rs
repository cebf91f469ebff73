//! Debounced batch queue
//!
//! Items are buffered and handed to a [`BatchExecutor`] in batches:
//! - when the buffer reaches `max_size` (synchronously, on the producer)
//! - on a fixed-delay timer while the queue is started
//! - once more when the queue is stopped
//!
//! A flush swaps the buffer for an empty one before executing, so producers
//! keep appending while a batch is being processed. Executions are
//! serialized so batches reach the executor in order.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How long `stop` waits for an in-flight flush before giving up on it
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Handler invoked with each detached batch
pub trait BatchExecutor<T>: Send + Sync {
    fn execute(&self, batch: Vec<T>) -> anyhow::Result<()>;
}

impl<T, F> BatchExecutor<T> for F
where
    F: Fn(Vec<T>) -> anyhow::Result<()> + Send + Sync,
{
    fn execute(&self, batch: Vec<T>) -> anyhow::Result<()> {
        self(batch)
    }
}

struct Shared<T> {
    name: String,
    buffer: Mutex<Vec<T>>,
    flush_lock: Mutex<()>,
    max_size: usize,
    executor: Box<dyn BatchExecutor<T>>,
}

impl<T> Shared<T> {
    fn flush(&self) -> anyhow::Result<()> {
        let _serial = self.flush_lock.lock();
        self.execute_buffered()
    }

    /// Caller holds `flush_lock`
    fn execute_buffered(&self) -> anyhow::Result<()> {
        let batch = std::mem::take(&mut *self.buffer.lock());
        if batch.is_empty() {
            return Ok(());
        }
        debug!("{}: flushing {} item(s)", self.name, batch.len());
        self.executor.execute(batch)
    }

    /// Flush, logging errors and panics instead of propagating them
    fn flush_logged(&self) {
        self.log_outcome(catch_unwind(AssertUnwindSafe(|| self.flush())));
    }

    /// Like `flush_logged`, but gives up if another flush holds the lock past `timeout`
    fn flush_logged_within(&self, timeout: Duration) {
        let Some(_serial) = self.flush_lock.try_lock_for(timeout) else {
            warn!(
                "{}: flush still in progress after {:?}, {} item(s) left buffered",
                self.name,
                timeout,
                self.buffer.lock().len()
            );
            return;
        };
        self.log_outcome(catch_unwind(AssertUnwindSafe(|| self.execute_buffered())));
    }

    fn log_outcome(&self, outcome: std::thread::Result<anyhow::Result<()>>) {
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("{}: batch execution failed: {:#}", self.name, e),
            Err(_) => warn!("{}: batch execution panicked", self.name),
        }
    }
}

struct Timer {
    stop_tx: Sender<()>,
    done_rx: Receiver<()>,
    handle: JoinHandle<()>,
}

/// Thread-safe buffer that hands items to an executor in batches
pub struct BatchQueue<T> {
    shared: Arc<Shared<T>>,
    timer: Mutex<Option<Timer>>,
}

impl<T: PartialEq + Send + 'static> BatchQueue<T> {
    /// Create a queue
    ///
    /// `max_size` of zero means no size-triggered flush.
    pub fn new(
        name: impl Into<String>,
        max_size: usize,
        executor: impl BatchExecutor<T> + 'static,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                buffer: Mutex::new(Vec::new()),
                flush_lock: Mutex::new(()),
                max_size: if max_size == 0 { usize::MAX } else { max_size },
                executor: Box::new(executor),
            }),
            timer: Mutex::new(None),
        }
    }

    /// Append an item
    ///
    /// An item equal to the last buffered one is dropped and `false` is
    /// returned. Reaching `max_size` flushes synchronously on the caller.
    pub fn add(&self, item: T) -> bool {
        let full = {
            let mut buffer = self.shared.buffer.lock();
            if buffer.last() == Some(&item) {
                return false;
            }
            buffer.push(item);
            buffer.len() >= self.shared.max_size
        };

        if full {
            self.shared.flush_logged();
        }
        true
    }

    /// Hand the buffered items to the executor, if there are any
    pub fn flush(&self) -> anyhow::Result<()> {
        self.shared.flush()
    }

    /// Start the fixed-delay flush timer
    ///
    /// A zero period or an already running timer makes this a no-op.
    pub fn start(&self, period: Duration) {
        if period.is_zero() {
            return;
        }
        let mut timer = self.timer.lock();
        if timer.is_some() {
            return;
        }

        let (stop_tx, stop_rx) = bounded::<()>(0);
        let (done_tx, done_rx) = bounded::<()>(0);
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(format!("batch-{}", shared.name))
            .spawn(move || {
                let _done = done_tx;
                // Delay counts from the end of the previous flush
                while let Err(RecvTimeoutError::Timeout) = stop_rx.recv_timeout(period) {
                    shared.flush_logged();
                }
            });

        match spawned {
            Ok(handle) => {
                debug!("{}: timer started ({:?})", self.shared.name, period);
                *timer = Some(Timer {
                    stop_tx,
                    done_rx,
                    handle,
                });
            }
            Err(e) => warn!("{}: failed to spawn timer thread: {}", self.shared.name, e),
        }
    }

    /// Stop the timer and flush whatever is left
    ///
    /// Waits up to ten seconds in total for an in-flight flush to finish.
    pub fn stop(&self) {
        self.stop_within(STOP_TIMEOUT);
    }

    /// [`BatchQueue::stop`] with an explicit bound
    ///
    /// If a flush is still executing when `timeout` runs out, the remaining
    /// items stay buffered for a later flush.
    pub fn stop_within(&self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        if let Some(timer) = self.timer.lock().take() {
            drop(timer.stop_tx);
            match timer.done_rx.recv_timeout(timeout) {
                Err(RecvTimeoutError::Timeout) => {
                    warn!("{}: timer did not stop within {:?}", self.shared.name, timeout);
                }
                _ => {
                    let _ = timer.handle.join();
                }
            }
            debug!("{}: timer stopped", self.shared.name);
        }
        self.shared
            .flush_logged_within(deadline.saturating_duration_since(Instant::now()));
    }

    pub fn is_started(&self) -> bool {
        self.timer.lock().is_some()
    }

    /// Number of buffered items
    pub fn len(&self) -> usize {
        self.shared.buffer.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.buffer.lock().is_empty()
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }
}
