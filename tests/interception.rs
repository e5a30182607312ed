//! Chain ordering, short-circuiting, dispatch and end-to-end authorization.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use interpose::{
    Args, AsyncResult, Authorizer, Dispatcher, Error, InterceptionContext, Interceptor, Kind,
    MemorySource, QueryExecutor, Status, Value, operation,
};
use tokio::runtime::Handle;

const COUNT_SQL: &str = "select count(*) from batch";

type Log = Arc<Mutex<Vec<String>>>;

/// Pre-work that records its start, then settles from another thread a
/// little later and records that too.
fn logged_stage(log: &Log, name: &'static str) -> Interceptor {
    let log = Arc::clone(log);
    Interceptor::new(name, move |_: &InterceptionContext| {
        log.lock().unwrap().push(format!("{name} start"));
        let result = AsyncResult::pending();
        let settle = result.clone();
        let log = Arc::clone(&log);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(5));
            log.lock().unwrap().push(format!("{name} settled"));
            settle.resolve(()).unwrap();
        });
        result
    })
}

fn flagged_target(flag: &Arc<AtomicBool>, value: Value) -> impl Fn(Args) -> AsyncResult<Value> + Send + Sync + 'static {
    let flag = Arc::clone(flag);
    move |_: Args| {
        flag.store(true, Ordering::SeqCst);
        AsyncResult::resolved(value.clone())
    }
}

#[test]
fn chain_runs_each_pre_work_to_settlement_before_the_next() {
    let log: Log = Arc::default();
    let target_log = Arc::clone(&log);

    let dispatcher = Dispatcher::builder()
        .guarded(
            "op",
            move |_: Args| {
                target_log.lock().unwrap().push("target".to_owned());
                AsyncResult::resolved(Value::Unit)
            },
            [logged_stage(&log, "first"), logged_stage(&log, "second"), logged_stage(&log, "third")],
        )
        .build();

    dispatcher.dispatch("op", Args::new()).wait().unwrap();

    assert_eq!(
        *log.lock().unwrap(),
        [
            "first start", "first settled",
            "second start", "second settled",
            "third start", "third settled",
            "target",
        ]
    );
}

#[test]
fn failure_in_the_middle_short_circuits_the_rest() {
    let third_ran = Arc::new(AtomicBool::new(false));
    let target_ran = Arc::new(AtomicBool::new(false));
    let third = Arc::clone(&third_ran);

    let dispatcher = Dispatcher::builder()
        .guarded(
            "op",
            flagged_target(&target_ran, Value::Unit),
            [
                Interceptor::new("first", |_: &InterceptionContext| AsyncResult::resolved(())),
                Interceptor::new("second", |_: &InterceptionContext| AsyncResult::failed(Error::Denied)),
                Interceptor::new("third", move |_: &InterceptionContext| {
                    third.store(true, Ordering::SeqCst);
                    AsyncResult::resolved(())
                }),
            ],
        )
        .build();

    assert!(matches!(dispatcher.dispatch("op", Args::new()).wait(), Err(Error::Denied)));
    assert!(!third_ran.load(Ordering::SeqCst));
    assert!(!target_ran.load(Ordering::SeqCst));
}

#[test]
fn fast_path_resumes_on_the_calling_thread() {
    let ran_on = Arc::new(Mutex::new(None));
    let record = Arc::clone(&ran_on);

    let dispatcher = Dispatcher::builder()
        .guarded(
            "op",
            move |_: Args| {
                *record.lock().unwrap() = Some(thread::current().id());
                AsyncResult::resolved(Value::Int(1))
            },
            [Interceptor::new("settled", |_: &InterceptionContext| AsyncResult::resolved(()))],
        )
        .build();

    let result = dispatcher.dispatch("op", Args::new());

    // No suspension anywhere: settled before `dispatch` returned, on this stack.
    assert_eq!(result.status(), Status::Resolved);
    assert_eq!(*ran_on.lock().unwrap(), Some(thread::current().id()));
}

#[test]
fn unknown_operation_touches_nothing() {
    let source = Arc::new(MemorySource::new().rows([1]));
    let db = tokio::runtime::Builder::new_multi_thread().worker_threads(1).enable_all().build().unwrap();
    let exec = QueryExecutor::new(source.clone(), db.handle().clone());
    let interceptor_ran = Arc::new(AtomicBool::new(false));
    let ran = Arc::clone(&interceptor_ran);

    let dispatcher = Dispatcher::builder()
        .guarded(
            "known",
            |_: Args| AsyncResult::resolved(Value::Unit),
            [
                Interceptor::new("flag", move |_: &InterceptionContext| {
                    ran.store(true, Ordering::SeqCst);
                    AsyncResult::resolved(())
                }),
                Interceptor::new("authorize", Authorizer::new(exec, COUNT_SQL)),
            ],
        )
        .build();

    let result = dispatcher.dispatch("unknown", Args::new());
    assert_eq!(result.status(), Status::Failed);
    match result.wait() {
        Err(Error::UnknownOperation(name)) => assert_eq!(name, "unknown"),
        other => panic!("expected UnknownOperation, got {other:?}"),
    }
    assert!(!interceptor_ran.load(Ordering::SeqCst));
    assert!(source.issued().is_empty());
}

#[test]
fn descriptors_report_kind() {
    let dispatcher = Dispatcher::builder()
        .fast("plain", |_: Args| AsyncResult::resolved(Value::Unit))
        .guarded(
            "guarded",
            |_: Args| AsyncResult::resolved(Value::Unit),
            [Interceptor::new("noop", |_: &InterceptionContext| AsyncResult::resolved(()))],
        )
        .build();

    assert_eq!(dispatcher.descriptor("plain").unwrap().kind(), Kind::FastPath);
    assert_eq!(dispatcher.descriptor("guarded").unwrap().kind(), Kind::Guarded);
    assert!(dispatcher.descriptor("missing").is_none());
    assert_eq!(dispatcher.descriptors().count(), 2);
}

#[test]
#[should_panic(expected = "registered twice")]
fn duplicate_registration_panics() {
    let _ = Dispatcher::builder()
        .fast("op", |_: Args| AsyncResult::resolved(Value::Unit))
        .fast("op", |_: Args| AsyncResult::resolved(Value::Unit));
}

#[test]
#[should_panic(expected = "has no interceptors")]
fn guarded_without_interceptors_panics() {
    let _ = Dispatcher::builder().guarded(
        "op",
        |_: Args| AsyncResult::resolved(Value::Unit),
        Vec::<Interceptor>::new(),
    );
}

// ── End to end ────────────────────────────────────────────────────────────────

fn guarded_count(source: MemorySource, target_ran: &Arc<AtomicBool>) -> Dispatcher {
    let exec = QueryExecutor::new(Arc::new(source), Handle::current());
    let auth = Authorizer::new(exec.clone(), COUNT_SQL);
    let flag = Arc::clone(target_ran);

    let count = operation::from_async(Handle::current(), move |_: Args| {
        flag.store(true, Ordering::SeqCst);
        let exec = exec.clone();
        async move { exec.run_scalar_query(COUNT_SQL).await }
    });

    Dispatcher::builder()
        .guarded("guarded-op", count, [Interceptor::new("authorize", auth)])
        .build()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn authorized_dispatch_yields_target_result() {
    let target_ran = Arc::new(AtomicBool::new(false));
    let source = MemorySource::new().rows([12]).latency(Duration::from_millis(10));
    let dispatcher = guarded_count(source, &target_ran);

    let value = dispatcher.dispatch("guarded-op", Args::new()).await.unwrap();
    assert_eq!(value, Value::Int(12));
    assert!(target_ran.load(Ordering::SeqCst));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn zero_rows_deny_and_skip_target() {
    let target_ran = Arc::new(AtomicBool::new(false));
    let dispatcher = guarded_count(MemorySource::new(), &target_ran);

    let outcome = dispatcher.dispatch("guarded-op", Args::new()).await;
    assert!(matches!(outcome, Err(Error::Denied)));
    assert!(!target_ran.load(Ordering::SeqCst));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn query_error_denies() {
    let target_ran = Arc::new(AtomicBool::new(false));
    let dispatcher = guarded_count(MemorySource::new().failing("pool exhausted"), &target_ran);

    assert!(matches!(dispatcher.dispatch("guarded-op", Args::new()).await, Err(Error::Denied)));
    assert!(!target_ran.load(Ordering::SeqCst));
}

// ── Timeouts and abandonment ──────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pending_pre_work_times_out() {
    let target_ran = Arc::new(AtomicBool::new(false));
    let stuck = AsyncResult::<()>::pending();
    let pre = stuck.clone();

    let dispatcher = Dispatcher::builder()
        .guarded(
            "op",
            flagged_target(&target_ran, Value::Unit),
            [Interceptor::new("stuck", move |_: &InterceptionContext| pre.clone())
                .with_timeout(Handle::current(), Duration::from_millis(20))],
        )
        .build();

    let outcome = dispatcher.dispatch("op", Args::new()).await;
    assert!(matches!(outcome, Err(Error::Timeout(_))));
    assert!(!target_ran.load(Ordering::SeqCst));

    // The real producer finishing late is absorbed, not reported.
    assert!(stuck.resolve(()).is_ok());
}

#[test]
fn abandoned_caller_still_lets_pre_work_settle_once() {
    let target_ran = Arc::new(AtomicBool::new(false));
    let gate = AsyncResult::<()>::pending();
    let pre = gate.clone();

    let dispatcher = Dispatcher::builder()
        .guarded(
            "op",
            flagged_target(&target_ran, Value::Int(3)),
            [Interceptor::new("gate", move |_: &InterceptionContext| pre.clone())],
        )
        .build();

    let result = dispatcher.dispatch("op", Args::new());
    result.abandon();

    assert!(gate.resolve(()).is_ok());
    assert_eq!(result.status(), Status::Abandoned);
    assert!(target_ran.load(Ordering::SeqCst));
    assert!(matches!(gate.resolve(()), Err(Error::DoubleResume)));
}
