//! Scalar queries adapted into [`AsyncResult`]s.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::runtime::Handle;
use tracing::{debug, trace};

use crate::async_result::{AsyncResult, Continuation};
use crate::error::Error;
use crate::source::DataSource;

/// Issues single-value queries against a [`DataSource`].
///
/// The row stream is driven on `runtime`, the data side's own reactor. The
/// caller's thread only creates the pending result and returns.
#[derive(Clone)]
pub struct QueryExecutor {
    source: Arc<dyn DataSource>,
    runtime: Handle,
}

impl QueryExecutor {
    pub fn new(source: Arc<dyn DataSource>, runtime: Handle) -> Self {
        Self { source, runtime }
    }

    /// Runs `sql` and settles with the first column of its first row.
    ///
    /// Zero rows fail with [`Error::NoRows`]; a stream error fails with
    /// [`Error::Query`]. Rows after the first are drained and dropped so the
    /// source can release the cursor.
    pub fn run_scalar_query(&self, sql: &str) -> AsyncResult<i64> {
        let result = AsyncResult::pending();
        // If the data runtime drops this task before the first row, the
        // continuation's drop fails the caller.
        let caller = Continuation::new(result.clone());
        let mut rows = self.source.query(sql);
        let sql = sql.to_owned();

        self.runtime.spawn(async move {
            let outcome = match rows.next().await {
                Some(Ok(value)) => Ok(value),
                Some(Err(cause)) => Err(Error::Query(cause)),
                None => Err(Error::NoRows),
            };
            debug!(%sql, ok = outcome.is_ok(), "scalar query settled");
            caller.resume(outcome);

            let mut drained = 0_usize;
            while rows.next().await.is_some() {
                drained += 1;
            }
            if drained > 0 {
                trace!(%sql, drained, "discarded trailing rows");
            }
        });

        result
    }

    /// The runtime queries are driven on.
    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }
}
