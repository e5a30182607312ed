//! Unified error type.

use std::time::Duration;

use crate::interceptor::Phase;

/// Boxed cause carried by [`Error::Query`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Every way an interception, a query or a dispatch can fail.
///
/// Errors are delivered through [`AsyncResult`](crate::AsyncResult) as a
/// `Failed` settlement. Nothing in this crate retries; the first failure in a
/// chain is the one the caller sees.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The data source reported an I/O or query failure.
    #[error("query failed: {0}")]
    Query(#[source] BoxError),

    /// The query stream completed without producing a row.
    #[error("query returned no rows")]
    NoRows,

    /// `dispatch` was called with a name that has no descriptor.
    #[error("unknown operation `{0}`")]
    UnknownOperation(String),

    /// An authorization pre-work evaluated to `false`.
    #[error("authorization denied")]
    Denied,

    /// A pending result was forced to fail after the given delay.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// A result was settled a second time. Indicates a reused continuation.
    #[error("result settled more than once")]
    DoubleResume,

    /// A second resumption callback was attached to the same result.
    #[error("result already has a consumer")]
    AlreadyObserved,

    /// An interceptor stage was driven through an illegal transition.
    #[error("interceptor `{interceptor}` re-entered: {from:?} -> {to:?}")]
    ReentrantIntercept {
        interceptor: String,
        from: Phase,
        to: Phase,
    },

    /// The continuation was dropped before anyone resumed it.
    #[error("continuation discarded before resumption")]
    Discarded,

    /// A configuration value could not be parsed.
    #[error("config: {0}")]
    Config(String),

    /// Binding or accepting on the HTTP listener failed.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wraps any data-source failure as [`Error::Query`].
    pub fn query(cause: impl Into<BoxError>) -> Self {
        Self::Query(cause.into())
    }

    /// `true` for errors that mean continuation safety was violated.
    ///
    /// These are bugs in the caller or in an interceptor, not runtime
    /// conditions, and are always logged at error level.
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self,
            Self::DoubleResume | Self::AlreadyObserved | Self::ReentrantIntercept { .. }
        )
    }
}
