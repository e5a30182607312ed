//! The data-access seam.
//!
//! The interception core only needs "submit SQL, get rows back later". A real
//! deployment plugs a driver in behind [`DataSource`]; [`MemorySource`] is the
//! in-process stand-in used by the demo and the tests.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::stream::{self, Stream, StreamExt};
use parking_lot::Mutex;

use crate::error::BoxError;

/// Rows produced by a query: the first column of each row.
pub type RowStream = Pin<Box<dyn Stream<Item = Result<i64, BoxError>> + Send + 'static>>;

/// A non-blocking query API.
///
/// `query` must return immediately. The stream is polled on the data runtime
/// owned by [`QueryExecutor`](crate::QueryExecutor).
pub trait DataSource: Send + Sync + 'static {
    fn query(&self, sql: &str) -> RowStream;
}

/// Scripted in-memory data source.
///
/// Every query yields the same rows after the configured latency, or a single
/// error when a failure is set. Issued statements and yielded rows are
/// counted so tests can assert what was (not) touched.
#[derive(Default)]
pub struct MemorySource {
    rows: Vec<i64>,
    latency: Duration,
    failure: Option<String>,
    issued: Mutex<Vec<String>>,
    yielded: Arc<AtomicUsize>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows returned by every query.
    pub fn rows(mut self, rows: impl IntoIterator<Item = i64>) -> Self {
        self.rows = rows.into_iter().collect();
        self
    }

    /// Delay before the first row (or the failure) is produced.
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Makes every query fail with `message` instead of producing rows.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Statements issued so far, in order.
    pub fn issued(&self) -> Vec<String> {
        self.issued.lock().clone()
    }

    /// Rows pulled out of result streams so far, including drained ones.
    pub fn yielded(&self) -> usize {
        self.yielded.load(Ordering::SeqCst)
    }
}

impl DataSource for MemorySource {
    fn query(&self, sql: &str) -> RowStream {
        self.issued.lock().push(sql.to_owned());

        let latency = self.latency;
        let rows = self.rows.clone();
        let failure = self.failure.clone();
        let yielded = Arc::clone(&self.yielded);

        let batch = async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            let items: Vec<Result<i64, BoxError>> = match failure {
                Some(message) => vec![Err(message.into())],
                None => rows.into_iter().map(Ok).collect(),
            };
            stream::iter(items)
        };

        Box::pin(stream::once(batch).flatten().inspect(move |item| {
            if item.is_ok() {
                yielded.fetch_add(1, Ordering::SeqCst);
            }
        }))
    }
}
