//! Coordination helpers shared by the traversal engine and the operation scheduler.

use std::future::Future;
use std::mem;
use std::pin::pin;
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};

use crossbeam::channel::{self, select, Sender, TrySendError};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::types::{PenumbraError, Result};

/// Wakes a blocked sender once its token is cancelled.
struct CancelSignal(Sender<()>);

impl Wake for CancelSignal {
    fn wake(self: Arc<Self>) {
        let _ = self.0.try_send(());
    }
}

/// Sends `value` on a bounded channel, blocking while the channel is full.
///
/// Returns false when `ctx` is cancelled before the value could be queued or when
/// the receiving side has hung up. The value is dropped in both cases. A blocked
/// sender is woken by the cancellation itself.
pub fn submit<T>(ctx: &CancellationToken, sender: &Sender<T>, value: T) -> bool {
    if ctx.is_cancelled() {
        return false;
    }
    let value = match sender.try_send(value) {
        Ok(()) => return true,
        Err(TrySendError::Disconnected(_)) => return false,
        Err(TrySendError::Full(value)) => value,
    };

    let (signal_tx, signal_rx) = channel::bounded(1);
    let waker = Waker::from(Arc::new(CancelSignal(signal_tx)));
    let mut cancelled = pin!(ctx.cancelled());
    if let Poll::Ready(()) = cancelled.as_mut().poll(&mut Context::from_waker(&waker)) {
        return false;
    }
    select! {
        send(sender, value) -> sent => sent.is_ok(),
        recv(signal_rx) -> _ => false,
    }
}

/// Collects failures from independent workers and combines them once they finish.
#[derive(Default, Debug)]
pub struct ErrorCollector {
    errors: Mutex<Vec<PenumbraError>>,
}

impl ErrorCollector {
    /// Creates an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one failure.
    pub fn add(&self, err: PenumbraError) {
        self.errors.lock().push(err);
    }

    /// Records the error side of `result`.
    pub fn collect(&self, result: Result<()>) {
        if let Err(err) = result {
            self.add(err);
        }
    }

    /// Number of recorded failures.
    pub fn len(&self) -> usize {
        self.errors.lock().len()
    }

    /// Returns true when nothing has failed.
    pub fn is_empty(&self) -> bool {
        self.errors.lock().is_empty()
    }

    /// Drains the collector into a single result.
    pub fn combined(&self) -> Result<()> {
        let mut errors = mem::take(&mut *self.errors.lock());
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(PenumbraError::Multiple(errors)),
        }
    }
}

/// Keeps the first error reported by any of several workers.
#[derive(Default, Debug)]
pub struct FirstError {
    slot: Mutex<Option<PenumbraError>>,
}

impl FirstError {
    /// Creates an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `err` if no error was stored yet; returns true when it was kept.
    pub fn record(&self, err: PenumbraError) -> bool {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(err);
        true
    }

    /// Returns true once an error has been stored.
    pub fn is_set(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Takes the stored error, leaving the slot empty.
    pub fn take(&self) -> Option<PenumbraError> {
        self.slot.lock().take()
    }
}
