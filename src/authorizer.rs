//! Query-backed authorization predicate.
//!
//! [`Authorizer::authorize`] answers with a plain `bool`, which means it must
//! block until its query finishes. That is what method-security style guards
//! need (they cannot suspend) and it is also exactly the hazard this crate
//! exists to contain: the thread that calls it does nothing else meanwhile.
//! Every blocking call logs how long it held its thread.
//!
//! [`Authorizer::check`] is the non-blocking form used when the authorizer
//! runs as interceptor pre-work.

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use tracing::{info, warn};

use crate::async_result::AsyncResult;
use crate::error::Error;
use crate::query::QueryExecutor;

type Policy = Arc<dyn Fn(i64) -> bool + Send + Sync + 'static>;

/// Decides whether a guarded operation may run.
#[derive(Clone)]
pub struct Authorizer {
    executor: QueryExecutor,
    sql: String,
    policy: Policy,
}

impl fmt::Debug for Authorizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authorizer").field("sql", &self.sql).finish_non_exhaustive()
    }
}

impl Authorizer {
    /// An authorizer that runs `sql` and allows whenever the query succeeds.
    ///
    /// The allow-all policy is a hook; install a real one with
    /// [`with_policy`](Self::with_policy).
    pub fn new(executor: QueryExecutor, sql: impl Into<String>) -> Self {
        Self { executor, sql: sql.into(), policy: Arc::new(|_| true) }
    }

    /// Replaces the decision made from the query's scalar result.
    pub fn with_policy(mut self, policy: impl Fn(i64) -> bool + Send + Sync + 'static) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    /// Non-blocking check. Always resolves; query errors resolve to `false`.
    pub fn check(&self) -> AsyncResult<bool> {
        let policy = Arc::clone(&self.policy);
        let sql = self.sql.clone();
        self.executor.run_scalar_query(&self.sql).then(move |outcome| {
            Ok(match outcome {
                Ok(scalar) => policy(scalar),
                Err(e) => {
                    warn!(%sql, error = %e, "authorization query failed, denying");
                    false
                }
            })
        })
    }

    /// Blocking check: parks the calling thread until the query settles.
    pub fn authorize(&self) -> bool {
        let started = Instant::now();
        let allowed = self.check().wait().unwrap_or_else(|e| {
            warn!(error = %e, "authorization result lost, denying");
            false
        });
        info!(
            thread = thread::current().name().unwrap_or("<unnamed>"),
            blocked_us = started.elapsed().as_micros() as u64,
            allowed,
            "authorization blocked calling thread",
        );
        allowed
    }

    /// Maps the check into pre-work: `false` becomes [`Error::Denied`].
    pub(crate) fn guard(&self) -> AsyncResult<()> {
        self.check().then(|outcome| match outcome {
            Ok(true) => Ok(()),
            Ok(false) => Err(Error::Denied),
            Err(e) => Err(e),
        })
    }
}
