//! Blocking vs non-blocking interception over HTTP.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example trial
//!   INTERPOSE_STRATEGY=blocking RUST_LOG=info cargo run --example trial
//!
//! Try:
//!   curl http://localhost:8080/nonblocking         # fast path: count
//!   curl http://localhost:8080/blocking/aop        # traced query, then the name of the thread the target ran on
//!   curl http://localhost:8080/blocking/security   # blocking pre-authorization, then count
//!   curl http://localhost:8080/blocking/both       # both
//!
//! Requests run on `http-worker` threads, queries on `db-reactor` threads.
//! Under the non-blocking strategy `/blocking/aop` answers `db-reactor`: the
//! target resumed wherever its pre-work settled. Under the blocking strategy
//! it answers `http-worker`, and the log shows how long that worker sat idle.

use std::sync::Arc;
use std::thread;

use http::Method;
use interpose::{
    Args, AsyncResult, Authorizer, Config, Dispatcher, Interceptor, MemorySource, PreAuthorize,
    QueryExecutor, Router, Server, TracedQuery, Value, operation,
};
use tokio::runtime::{Builder, Handle};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_thread_names(true)
        .init();

    let config = Config::from_env()?;
    tracing::info!(?config, "configuration loaded");

    let db = Builder::new_multi_thread()
        .worker_threads(config.db_threads)
        .thread_name("db-reactor")
        .enable_all()
        .build()?;
    let http = Builder::new_multi_thread()
        .thread_name("http-worker")
        .enable_all()
        .build()?;

    let source = MemorySource::new().rows([42]).latency(config.query_latency);
    let exec = QueryExecutor::new(Arc::new(source), db.handle().clone());
    let dispatcher = Arc::new(dispatcher(&config, &exec, http.handle()));

    let router = Router::new()
        .route(Method::GET, "/nonblocking",       "count")
        .route(Method::GET, "/blocking/aop",      "thread-name")
        .route(Method::GET, "/blocking/security", "secured-count")
        .route(Method::GET, "/blocking/both",     "both");

    http.block_on(Server::bind(config.bind).serve(router, dispatcher))?;
    Ok(())
}

fn dispatcher(config: &Config, exec: &QueryExecutor, http: &Handle) -> Dispatcher {
    let authorizer = Arc::new(Authorizer::new(exec.clone(), config.count_sql.clone()));

    let traced = || {
        let interceptor = Interceptor::new("traced-query", TracedQuery::new(exec.clone(), config.count_sql.clone()))
            .with_strategy(config.strategy);
        match config.prework_timeout {
            Some(after) => interceptor.with_timeout(exec.runtime().clone(), after),
            None => interceptor,
        }
    };
    let pre_authorize = || Interceptor::new("pre-authorize", PreAuthorize(Arc::clone(&authorizer)));

    let count = || {
        let exec = exec.clone();
        let sql = config.count_sql.clone();
        operation::from_async(http.clone(), move |_: Args| {
            let exec = exec.clone();
            let sql = sql.clone();
            async move { exec.run_scalar_query(&sql).await }
        })
    };

    // The target reports the thread it was resumed on.
    let thread_name = |_: Args| {
        let name = thread::current().name().unwrap_or("<unnamed>").to_owned();
        AsyncResult::resolved(Value::from(name))
    };

    Dispatcher::builder()
        .fast("count", count())
        .guarded("thread-name", thread_name, [traced()])
        .guarded("secured-count", count(), [pre_authorize()])
        .guarded("both", count(), [pre_authorize(), traced()])
        .build()
}
