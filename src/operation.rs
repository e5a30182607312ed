//! Target operations and type erasure.
//!
//! # How targets are stored
//!
//! The dispatcher keeps operations of *different* concrete types in one
//! table, so each is stored behind `Arc<dyn Operation>`:
//!
//! ```text
//! async fn count(args: Args) -> Result<i64, Error> { … }   ← user writes this
//!        ↓ operation::from_async(runtime, count)
//! AsyncFn { f: count, runtime }                           ← typed wrapper
//!        ↓  stored as BoxedOperation = Arc<dyn Operation>
//! op.call(args)  at dispatch time                         ← one vtable call
//!        ↓
//! runtime.spawn(async { result.settle(count(args).await.into_outcome()) })
//! ```
//!
//! An operation answers with an [`AsyncResult`] rather than a future: it may
//! settle inline (a cached value) or later from any thread. Plain closures
//! `Fn(Args) -> AsyncResult<Value>` are operations too.

use std::future::Future;
use std::sync::Arc;

use tokio::runtime::Handle;

use crate::async_result::{AsyncResult, Continuation};
use crate::value::{Args, IntoOutcome, Value};

/// A suspending call that interceptors can wrap.
pub trait Operation: Send + Sync + 'static {
    fn call(&self, args: Args) -> AsyncResult<Value>;
}

/// A type-erased operation shared across concurrent dispatches.
pub type BoxedOperation = Arc<dyn Operation>;

impl<F> Operation for F
where
    F: Fn(Args) -> AsyncResult<Value> + Send + Sync + 'static,
{
    fn call(&self, args: Args) -> AsyncResult<Value> {
        self(args)
    }
}

/// Adapts an `async fn(Args) -> impl IntoOutcome` into an [`Operation`].
///
/// Each call spawns the future on `runtime` and settles the returned result
/// when it completes.
pub fn from_async<F, Fut>(runtime: Handle, f: F) -> impl Operation
where
    F: Fn(Args) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: IntoOutcome + Send + 'static,
{
    AsyncFn { f, runtime }
}

struct AsyncFn<F> {
    f: F,
    runtime: Handle,
}

impl<F, Fut> Operation for AsyncFn<F>
where
    F: Fn(Args) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: IntoOutcome + Send + 'static,
{
    fn call(&self, args: Args) -> AsyncResult<Value> {
        let result = AsyncResult::pending();
        // Dropped with the task if the future panics or the runtime shuts
        // down, which fails the caller instead of leaving it pending.
        let caller = Continuation::new(result.clone());
        let fut = (self.f)(args);
        self.runtime.spawn(async move {
            caller.resume(fut.await.into_outcome());
        });
        result
    }
}
