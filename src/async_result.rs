//! Single-settlement results and the continuations that resume them.
//!
//! # Shape
//!
//! An [`AsyncResult`] is a shared cell with one producer side (`resolve`,
//! `fail`) and one consumer side (`on_settle`). Both sides may be reached
//! from any thread:
//!
//! ```text
//! producer ── resolve(v) ──┐
//!                          ├─► callback(Ok(v))   runs on whichever side came last
//! consumer ── on_settle ───┘
//! ```
//!
//! If the value is already there when the consumer attaches, the callback
//! runs right away on the consumer's stack. That inline resumption is the
//! fast path: no task is spawned and no thread is woken.
//!
//! The cell lock is never held while a callback runs, so a callback may
//! freely settle other results or attach to them.
//!
//! # Misuse is loud
//!
//! Settling twice returns [`Error::DoubleResume`] and attaching twice returns
//! [`Error::AlreadyObserved`]. Both are also logged at error level. The only
//! quiet case is the single late settlement that follows a
//! [`force_fail`](AsyncResult::force_fail) or an
//! [`abandon`](AsyncResult::abandon).

use std::fmt;
use std::future::{Future, IntoFuture};
use std::mem;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::mpsc;
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::error::Error;

type Callback<T> = Box<dyn FnOnce(Result<T, Error>) + Send + 'static>;

/// Observable state of an [`AsyncResult`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Status {
    Pending,
    Resolved,
    Failed,
    /// The consumer gave up. The producer may still settle once.
    Abandoned,
}

enum State<T> {
    /// Not settled. Holds the consumer's callback once one is attached.
    Pending(Option<Callback<T>>),
    /// Settled, waiting for a consumer.
    Ready(Result<T, Error>),
    /// Settled and handed to the consumer.
    Delivered { failed: bool },
    Abandoned { settled: bool },
}

struct Cell<T> {
    state: State<T>,
    /// Set by `force_fail`: one late settlement from the real producer is
    /// expected and must not be reported as a double resume.
    forced: bool,
}

/// A value (or error) that becomes available later, exactly once.
///
/// Cloning yields another handle to the same cell.
pub struct AsyncResult<T> {
    cell: Arc<Mutex<Cell<T>>>,
}

impl<T> Clone for AsyncResult<T> {
    fn clone(&self) -> Self {
        Self { cell: Arc::clone(&self.cell) }
    }
}

impl<T: Send + 'static> fmt::Debug for AsyncResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncResult").field("status", &self.status()).finish()
    }
}

impl<T: Send + 'static> AsyncResult<T> {
    /// A result that some asynchronous operation will settle later.
    pub fn pending() -> Self {
        Self::with_state(State::Pending(None))
    }

    /// An already-resolved result. Attaching to it resumes inline.
    pub fn resolved(value: T) -> Self {
        Self::with_state(State::Ready(Ok(value)))
    }

    /// An already-failed result.
    pub fn failed(error: Error) -> Self {
        Self::with_state(State::Ready(Err(error)))
    }

    fn with_state(state: State<T>) -> Self {
        Self { cell: Arc::new(Mutex::new(Cell { state, forced: false })) }
    }

    pub fn resolve(&self, value: T) -> Result<(), Error> {
        self.settle(Ok(value))
    }

    pub fn fail(&self, error: Error) -> Result<(), Error> {
        self.settle(Err(error))
    }

    /// Settles the result with `outcome`.
    ///
    /// If a consumer is attached its callback runs on this thread before
    /// `settle` returns.
    pub fn settle(&self, outcome: Result<T, Error>) -> Result<(), Error> {
        let failed = outcome.is_err();
        let mut cell = self.cell.lock();
        let previous = mem::replace(&mut cell.state, State::Delivered { failed });

        match previous {
            State::Pending(Some(callback)) => {
                drop(cell);
                callback(outcome);
                Ok(())
            }
            State::Pending(None) => {
                cell.state = State::Ready(outcome);
                Ok(())
            }
            State::Abandoned { settled: false } => {
                cell.state = State::Abandoned { settled: true };
                drop(cell);
                debug!(failed, "settled after the consumer abandoned it, dropping outcome");
                Ok(())
            }
            settled => {
                cell.state = settled;
                if mem::take(&mut cell.forced) {
                    drop(cell);
                    debug!(failed, "late settlement after forced failure, dropping outcome");
                    return Ok(());
                }
                drop(cell);
                error!(failed, "result settled more than once");
                Err(Error::DoubleResume)
            }
        }
    }

    /// Registers the single consumer.
    ///
    /// Runs `callback` immediately, on this thread, when the result is already
    /// settled. Otherwise it runs on whichever thread settles the result.
    pub fn on_settle<F>(&self, callback: F) -> Result<(), Error>
    where
        F: FnOnce(Result<T, Error>) + Send + 'static,
    {
        let mut cell = self.cell.lock();
        let previous = mem::replace(&mut cell.state, State::Pending(None));

        match previous {
            State::Pending(None) => {
                cell.state = State::Pending(Some(Box::new(callback)));
                Ok(())
            }
            State::Ready(outcome) => {
                cell.state = State::Delivered { failed: outcome.is_err() };
                drop(cell);
                callback(outcome);
                Ok(())
            }
            observed => {
                cell.state = observed;
                drop(cell);
                error!("second consumer attached to a result");
                Err(Error::AlreadyObserved)
            }
        }
    }

    /// Chains `f` onto this result.
    ///
    /// When `self` is already settled, `f` runs inline and the returned
    /// result is settled before `then` returns.
    pub fn then<U, F>(&self, f: F) -> AsyncResult<U>
    where
        U: Send + 'static,
        F: FnOnce(Result<T, Error>) -> Result<U, Error> + Send + 'static,
    {
        let next = AsyncResult::pending();
        let settle_next = next.clone();
        if let Err(e) = self.on_settle(move |outcome| {
            // `settle_next` is private to this closure, so it cannot already
            // be settled unless it was abandoned, which `settle` tolerates.
            let _ = settle_next.settle(f(outcome));
        }) {
            let _ = next.fail(e);
        }
        next
    }

    /// Blocks the calling thread until the result settles.
    ///
    /// This is the degraded path: whatever else this thread was supposed to
    /// drive sits idle until the producer settles.
    pub fn wait(&self) -> Result<T, Error> {
        let (tx, rx) = mpsc::sync_channel(1);
        self.on_settle(move |outcome| {
            let _ = tx.send(outcome);
        })?;
        rx.recv().unwrap_or(Err(Error::Discarded))
    }

    /// Forces a pending result to fail. Returns `false` if it had settled.
    ///
    /// The real producer may settle once more afterwards; that settlement is
    /// dropped quietly.
    pub fn force_fail(&self, error: Error) -> bool {
        {
            let mut cell = self.cell.lock();
            if !matches!(cell.state, State::Pending(_)) {
                return false;
            }
            cell.forced = true;
        }
        // The cell may have been settled between the check and here. In that
        // case our own settlement is the late one and is absorbed by `forced`.
        let _ = self.settle(Err(error));
        true
    }

    /// Fails the result with [`Error::Timeout`] if it is still pending after
    /// `after`. The timer runs on `runtime`.
    pub fn expire_after(&self, runtime: &Handle, after: Duration) {
        let result = self.clone();
        runtime.spawn(async move {
            tokio::time::sleep(after).await;
            if result.force_fail(Error::Timeout(after)) {
                warn!(?after, "pending result timed out");
            }
        });
    }

    /// Declares that the consumer no longer wants the outcome.
    ///
    /// A callback that was waiting is dropped without being run. The producer
    /// may still settle once; that settlement is accepted and discarded.
    pub fn abandon(&self) {
        let previous = {
            let mut cell = self.cell.lock();
            let settled = !matches!(cell.state, State::Pending(_));
            mem::replace(&mut cell.state, State::Abandoned { settled })
        };
        // Dropping a callback may drop a `Continuation`, which settles another
        // result. Do it outside the lock.
        drop(previous);
    }

    pub fn status(&self) -> Status {
        match &self.cell.lock().state {
            State::Pending(_) => Status::Pending,
            State::Ready(Ok(_)) | State::Delivered { failed: false } => Status::Resolved,
            State::Ready(Err(_)) | State::Delivered { failed: true } => Status::Failed,
            State::Abandoned { .. } => Status::Abandoned,
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(self.status(), Status::Resolved | Status::Failed)
    }

    #[cfg(test)]
    pub(crate) fn handle_count(&self) -> usize {
        Arc::strong_count(&self.cell)
    }
}

// ── Awaiting ──────────────────────────────────────────────────────────────────

/// Future returned by `AsyncResult::into_future`.
pub struct Settlement<T> {
    rx: Result<oneshot::Receiver<Result<T, Error>>, Option<Error>>,
}

impl<T: Send + 'static> IntoFuture for AsyncResult<T> {
    type Output = Result<T, Error>;
    type IntoFuture = Settlement<T>;

    fn into_future(self) -> Settlement<T> {
        let (tx, rx) = oneshot::channel();
        let rx = self
            .on_settle(move |outcome| {
                let _ = tx.send(outcome);
            })
            .map(|()| rx)
            .map_err(Some);
        Settlement { rx }
    }
}

impl<T> Future for Settlement<T> {
    type Output = Result<T, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.rx {
            Ok(rx) => Pin::new(rx).poll(cx).map(|r| r.unwrap_or(Err(Error::Discarded))),
            Err(e) => Poll::Ready(Err(e.take().unwrap_or(Error::AlreadyObserved))),
        }
    }
}

// ── Continuation ──────────────────────────────────────────────────────────────

/// Single-use handle that resumes a suspended caller.
///
/// `resume` consumes the handle, so a continuation cannot be resumed twice.
/// Dropping it unresumed fails the caller with [`Error::Discarded`]; the
/// caller is never left pending because a callback chain was lost.
pub struct Continuation<T: Send + 'static> {
    caller: Option<AsyncResult<T>>,
}

impl<T: Send + 'static> Continuation<T> {
    pub fn new(caller: AsyncResult<T>) -> Self {
        Self { caller: Some(caller) }
    }

    /// Delivers `outcome` to the caller.
    ///
    /// A caller that has been abandoned absorbs the outcome silently.
    pub fn resume(mut self, outcome: Result<T, Error>) {
        if let Some(caller) = self.caller.take() {
            // `settle` has already logged a double resume; nothing else to do.
            let _ = caller.settle(outcome);
        }
    }
}

impl<T: Send + 'static> Drop for Continuation<T> {
    fn drop(&mut self) {
        if let Some(caller) = self.caller.take() {
            warn!("continuation dropped without being resumed");
            let _ = caller.settle(Err(Error::Discarded));
        }
    }
}
