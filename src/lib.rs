//! # interpose
//!
//! Run cross-cutting work (authorization, auditing, counters) in front of a
//! suspending call without blocking the thread that drives it, and without
//! losing or duplicating the caller's continuation.
//!
//! ## The pieces
//!
//! - [`AsyncResult`]: a value that settles exactly once, with exactly one
//!   consumer. Attaching to a settled result resumes inline.
//! - [`QueryExecutor`]: one scalar query against a [`DataSource`], as an
//!   `AsyncResult<i64>`.
//! - [`Authorizer`]: a query-backed predicate, blocking (`authorize`) or not
//!   (`check`).
//! - [`Interceptor`]: pre-work plus a [`Strategy`]: suspend on it, or block
//!   the calling thread on it.
//! - [`Dispatcher`]: operation names to targets and interceptor chains.
//! - [`Router`] / [`Server`]: an HTTP front that feeds the dispatcher.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use interpose::{Args, Authorizer, Dispatcher, Interceptor, MemorySource, QueryExecutor, operation};
//! use tokio::runtime::Handle;
//!
//! # async fn run() {
//! let source = Arc::new(MemorySource::new().rows([12]));
//! let exec = QueryExecutor::new(source, Handle::current());
//! let auth = Authorizer::new(exec.clone(), "select count(*) from batch");
//!
//! let count = {
//!     let exec = exec.clone();
//!     operation::from_async(Handle::current(), move |_: Args| {
//!         let exec = exec.clone();
//!         async move { exec.run_scalar_query("select count(*) from batch").await }
//!     })
//! };
//!
//! let dispatcher = Dispatcher::builder()
//!     .guarded("count", count, [Interceptor::new("authorize", auth)])
//!     .build();
//!
//! let n = dispatcher.dispatch("count", Args::new()).await;
//! # }
//! ```

mod async_result;
mod authorizer;
mod config;
mod dispatcher;
mod error;
mod query;
mod response;
mod router;
mod server;
mod source;
mod value;

pub mod interceptor;
pub mod operation;

pub use async_result::{AsyncResult, Continuation, Settlement, Status};
pub use authorizer::Authorizer;
pub use config::Config;
pub use dispatcher::{Dispatcher, DispatcherBuilder, Kind, OperationDescriptor};
pub use error::{BoxError, Error};
pub use interceptor::{
    InterceptionContext, Interceptor, Origin, Phase, PreAuthorize, PreWork, Proceed, Strategy,
    TracedQuery,
};
pub use operation::{BoxedOperation, Operation};
pub use query::QueryExecutor;
pub use router::Router;
pub use server::Server;
pub use source::{DataSource, MemorySource, RowStream};
pub use value::{Args, IntoOutcome, Value};
