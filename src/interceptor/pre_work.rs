//! Built-in pre-work.
//!
//! | Pre-work | What it does before the target runs |
//! |---|---|
//! | [`Authorizer`] | non-blocking authorization query, `false` ⇒ [`Error::Denied`] |
//! | [`PreAuthorize`] | blocking `authorize()` evaluated inline, method-security style |
//! | [`TracedQuery`] | logs the current thread, then runs a scalar query |
//! | any `Fn(&InterceptionContext) -> AsyncResult<()>` | whatever the closure does |

use std::sync::Arc;
use std::thread;

use tracing::info;

use super::context::InterceptionContext;
use crate::async_result::AsyncResult;
use crate::authorizer::Authorizer;
use crate::error::Error;
use crate::query::QueryExecutor;

/// Side-effecting work an interceptor runs before letting the call through.
///
/// A failed settlement stops the chain; its error is what the caller sees.
pub trait PreWork: Send + Sync + 'static {
    fn run(&self, ctx: &InterceptionContext) -> AsyncResult<()>;
}

impl<F> PreWork for F
where
    F: Fn(&InterceptionContext) -> AsyncResult<()> + Send + Sync + 'static,
{
    fn run(&self, ctx: &InterceptionContext) -> AsyncResult<()> {
        self(ctx)
    }
}

impl PreWork for Authorizer {
    fn run(&self, _ctx: &InterceptionContext) -> AsyncResult<()> {
        self.guard()
    }
}

/// Evaluates [`Authorizer::authorize`] synchronously and hands back an
/// already-settled result.
///
/// The thread that runs this pre-work is blocked for the duration of the
/// authorization query, whatever strategy the interceptor uses.
pub struct PreAuthorize(pub Arc<Authorizer>);

impl PreWork for PreAuthorize {
    fn run(&self, ctx: &InterceptionContext) -> AsyncResult<()> {
        info!(operation = ctx.operation(), "pre-authorizing");
        if self.0.authorize() {
            AsyncResult::resolved(())
        } else {
            AsyncResult::failed(Error::Denied)
        }
    }
}

/// Logs which thread is running, then issues a scalar query and discards its
/// value. The query's failure fails the pre-work.
pub struct TracedQuery {
    executor: QueryExecutor,
    sql: String,
}

impl TracedQuery {
    pub fn new(executor: QueryExecutor, sql: impl Into<String>) -> Self {
        Self { executor, sql: sql.into() }
    }
}

impl PreWork for TracedQuery {
    fn run(&self, ctx: &InterceptionContext) -> AsyncResult<()> {
        info!(
            operation = ctx.operation(),
            thread = thread::current().name().unwrap_or("<unnamed>"),
            origin = ctx.origin().name.as_deref().unwrap_or("<unnamed>"),
            "running traced query",
        );
        self.executor.run_scalar_query(&self.sql).then(|outcome| outcome.map(drop))
    }
}
