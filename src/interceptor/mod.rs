//! Interceptors: pre-work wrapped around a suspending call.
//!
//! # One stage
//!
//! ```text
//!            run pre-work
//! Created ──────────────► AwaitingPreWork ──pre-work Ok──► Resuming ──target settles──► Done
//!                               │                             │
//!                               └──────pre-work Err──────┐    └──target Err──┐
//!                                                        ▼                   ▼
//!                                                      Failed              Failed
//! ```
//!
//! With [`Strategy::NonBlocking`] the stage attaches itself as the pre-work's
//! continuation and returns the caller's (still pending) result straight
//! away. If the pre-work had already settled the continuation fires inline,
//! so the fast path costs no thread hop. Otherwise it fires later on the
//! thread that settles the pre-work, and the target runs there.
//!
//! [`Strategy::Blocking`] is the degraded reference: it parks the calling
//! thread on the pre-work and then runs the target on that same thread. It is
//! kept so the two can be compared side by side.
//!
//! # A chain
//!
//! The context carries the interceptors still to run. Each stage's "proceed"
//! pops the next one, so stage *n + 1* cannot start before stage *n*'s
//! pre-work has settled, and a failed stage simply never proceeds.

mod context;
mod pre_work;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, error, info};

pub use context::{InterceptionContext, Origin};
pub use pre_work::{PreAuthorize, PreWork, TracedQuery};

use crate::async_result::{AsyncResult, Continuation};
use crate::error::Error;
use crate::operation::BoxedOperation;
use crate::value::Value;

/// Where a stage is in its life.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    Created,
    AwaitingPreWork,
    Resuming,
    Done,
    Failed,
}

impl Phase {
    fn can_advance(self, to: Phase) -> bool {
        matches!(
            (self, to),
            (Phase::Created, Phase::AwaitingPreWork)
                | (Phase::AwaitingPreWork, Phase::Resuming | Phase::Failed)
                | (Phase::Resuming, Phase::Done | Phase::Failed)
        )
    }
}

/// How a stage waits for its pre-work.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Strategy {
    /// Suspend: register a continuation and return.
    #[default]
    NonBlocking,
    /// Park the calling thread until the pre-work settles.
    Blocking,
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "non-blocking" | "nonblocking" => Ok(Self::NonBlocking),
            "blocking"                     => Ok(Self::Blocking),
            other => Err(Error::Config(format!("unknown interceptor strategy `{other}`"))),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NonBlocking => "non-blocking",
            Self::Blocking    => "blocking",
        })
    }
}

/// Continues a chain after a stage lets the call through.
pub type Proceed = Box<dyn FnOnce(InterceptionContext) -> AsyncResult<Value> + Send + 'static>;

/// One piece of cross-cutting logic in front of an operation.
pub struct Interceptor {
    name: String,
    pre_work: Arc<dyn PreWork>,
    strategy: Strategy,
    timeout: Option<(Handle, Duration)>,
}

impl fmt::Debug for Interceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interceptor")
            .field("name", &self.name)
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

impl Interceptor {
    /// A non-blocking interceptor.
    pub fn new(name: impl Into<String>, pre_work: impl PreWork) -> Self {
        Self {
            name: name.into(),
            pre_work: Arc::new(pre_work),
            strategy: Strategy::NonBlocking,
            timeout: None,
        }
    }

    /// The degraded reference variant: blocks the calling thread on pre-work.
    pub fn blocking(name: impl Into<String>, pre_work: impl PreWork) -> Self {
        Self::new(name, pre_work).with_strategy(Strategy::Blocking)
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Fails pre-work still pending after `after` with [`Error::Timeout`].
    /// The timer runs on `runtime`.
    pub fn with_timeout(mut self, runtime: Handle, after: Duration) -> Self {
        self.timeout = Some((runtime, after));
        self
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn strategy(&self) -> Strategy { self.strategy }

    /// Runs this stage for `ctx` and, if its pre-work succeeds, `proceed`.
    ///
    /// Returns the caller's result. Under [`Strategy::NonBlocking`] it is
    /// usually still pending when this returns.
    pub fn intercept(self: &Arc<Self>, ctx: InterceptionContext, proceed: Proceed) -> AsyncResult<Value> {
        let result = AsyncResult::pending();
        let stage = Arc::new(Stage::new(&self.name));
        if let Err(e) = stage.advance(Phase::AwaitingPreWork) {
            let _ = result.fail(e);
            return result;
        }
        let caller = CallerSlot::new(result.clone());

        debug!(interceptor = %self.name, operation = ctx.operation(), strategy = %self.strategy, "running pre-work");
        let pre_work = self.pre_work.run(&ctx);
        if let Some((runtime, after)) = &self.timeout {
            if !pre_work.is_settled() {
                pre_work.expire_after(runtime, *after);
            }
        }

        let this = Arc::clone(self);
        let slot = caller.clone();
        let resume = move |outcome: Result<(), Error>| {
            if let Some(caller) = slot.take() {
                this.resume(&stage, ctx, proceed, caller, outcome);
            }
        };

        match self.strategy {
            Strategy::NonBlocking => {
                if let Err(e) = pre_work.on_settle(resume) {
                    error!(interceptor = %self.name, error = %e, "could not attach to pre-work");
                    caller.fail(e);
                }
            }
            Strategy::Blocking => {
                let started = Instant::now();
                let outcome = pre_work.wait();
                info!(
                    interceptor = %self.name,
                    thread = thread::current().name().unwrap_or("<unnamed>"),
                    blocked_us = started.elapsed().as_micros() as u64,
                    "pre-work blocked calling thread",
                );
                resume(outcome);
            }
        }

        result
    }

    fn resume(
        &self,
        stage: &Arc<Stage>,
        ctx: InterceptionContext,
        proceed: Proceed,
        caller: Continuation<Value>,
        outcome: Result<(), Error>,
    ) {
        if let Err(e) = outcome {
            debug!(interceptor = %self.name, error = %e, "pre-work failed, skipping target");
            let outcome = stage.advance(Phase::Failed).and(Err(e));
            caller.resume(outcome);
            return;
        }
        if let Err(e) = stage.advance(Phase::Resuming) {
            caller.resume(Err(e));
            return;
        }

        let next = proceed(ctx);
        let caller = CallerSlot::from(caller);
        let slot = caller.clone();
        let stage = Arc::clone(stage);
        let attached = next.on_settle(move |outcome| {
            let Some(caller) = slot.take() else { return };
            let phase = if outcome.is_ok() { Phase::Done } else { Phase::Failed };
            match stage.advance(phase) {
                Ok(()) => caller.resume(outcome),
                Err(e) => caller.resume(Err(e)),
            }
        });
        if let Err(e) = attached {
            error!(interceptor = %self.name, error = %e, "could not attach to target");
            caller.fail(e);
        }
    }
}

/// The caller's continuation, reachable both from the callback handed to a
/// result and from the code that hands it over. Whoever takes it first
/// resumes the caller; if nobody does, dropping the last handle fails it.
#[derive(Clone)]
struct CallerSlot(Arc<Mutex<Option<Continuation<Value>>>>);

impl CallerSlot {
    fn new(result: AsyncResult<Value>) -> Self {
        Self::from(Continuation::new(result))
    }

    fn take(&self) -> Option<Continuation<Value>> {
        self.0.lock().take()
    }

    fn fail(&self, error: Error) {
        if let Some(caller) = self.take() {
            caller.resume(Err(error));
        }
    }
}

impl From<Continuation<Value>> for CallerSlot {
    fn from(caller: Continuation<Value>) -> Self {
        Self(Arc::new(Mutex::new(Some(caller))))
    }
}

/// Phase bookkeeping for one `intercept` call.
struct Stage {
    interceptor: String,
    phase: Mutex<Phase>,
}

impl Stage {
    fn new(interceptor: &str) -> Self {
        Self { interceptor: interceptor.to_owned(), phase: Mutex::new(Phase::Created) }
    }

    fn advance(&self, to: Phase) -> Result<(), Error> {
        let mut phase = self.phase.lock();
        let from = *phase;
        if !from.can_advance(to) {
            error!(interceptor = %self.interceptor, ?from, ?to, "illegal interceptor transition");
            return Err(Error::ReentrantIntercept { interceptor: self.interceptor.clone(), from, to });
        }
        *phase = to;
        Ok(())
    }
}

/// Runs the rest of `ctx`'s chain, then `target`.
pub(crate) fn proceed(mut ctx: InterceptionContext, target: BoxedOperation) -> AsyncResult<Value> {
    match ctx.next_interceptor() {
        Some(next) => next.intercept(ctx, Box::new(move |ctx| proceed(ctx, target))),
        None => {
            debug!(operation = ctx.operation(), "chain passed, invoking target");
            target.call(ctx.into_args())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;
    use crate::value::Args;

    fn context(chain: &[Arc<Interceptor>]) -> InterceptionContext {
        InterceptionContext::new(Arc::from("op"), Args::new(), chain)
    }

    fn echo_target() -> BoxedOperation {
        Arc::new(|_: Args| AsyncResult::resolved(Value::from("target")))
    }

    #[test]
    fn settled_pre_work_resumes_inline() {
        let chain = [Arc::new(Interceptor::new("ok", |_: &InterceptionContext| AsyncResult::resolved(())))];
        let result = proceed(context(&chain), echo_target());
        // Nothing suspended, so the caller's result is already settled.
        assert!(result.is_settled());
        assert_eq!(result.wait().unwrap(), Value::from("target"));
    }

    #[test]
    fn pending_pre_work_suspends_and_resumes_on_settling_thread() {
        let gate = AsyncResult::<()>::pending();
        let pre = gate.clone();
        let chain = [Arc::new(Interceptor::new("gate", move |_: &InterceptionContext| pre.clone()))];

        let (tx, rx) = mpsc::channel();
        let target: BoxedOperation = Arc::new(move |_: Args| {
            tx.send(thread::current().id()).unwrap();
            AsyncResult::resolved(Value::Unit)
        });

        let result = proceed(context(&chain), target);
        assert!(!result.is_settled());

        let settler = thread::spawn(move || {
            gate.resolve(()).unwrap();
            thread::current().id()
        })
        .join()
        .unwrap();

        assert_eq!(rx.recv().unwrap(), settler);
        assert_eq!(result.wait().unwrap(), Value::Unit);
    }

    #[test]
    fn failed_pre_work_skips_target() {
        let chain = [Arc::new(Interceptor::new("deny", |_: &InterceptionContext| AsyncResult::failed(Error::Denied)))];
        let target: BoxedOperation = Arc::new(|_: Args| -> AsyncResult<Value> {
            panic!("target must not run");
        });
        assert!(matches!(proceed(context(&chain), target).wait(), Err(Error::Denied)));
    }

    #[test]
    fn target_failure_reaches_caller() {
        let chain = [Arc::new(Interceptor::new("ok", |_: &InterceptionContext| AsyncResult::resolved(())))];
        let target: BoxedOperation = Arc::new(|_: Args| AsyncResult::failed(Error::NoRows));
        assert!(matches!(proceed(context(&chain), target).wait(), Err(Error::NoRows)));
    }

    #[test]
    fn stage_rejects_reentry() {
        let stage = Stage::new("once");
        stage.advance(Phase::AwaitingPreWork).unwrap();
        stage.advance(Phase::Resuming).unwrap();
        stage.advance(Phase::Done).unwrap();

        match stage.advance(Phase::AwaitingPreWork) {
            Err(Error::ReentrantIntercept { from, to, .. }) => {
                assert_eq!(from, Phase::Done);
                assert_eq!(to, Phase::AwaitingPreWork);
            }
            other => panic!("expected re-entry error, got {other:?}"),
        }
    }

    #[test]
    fn pre_work_double_attach_reports_already_observed_under_both_strategies() {
        for strategy in [Strategy::NonBlocking, Strategy::Blocking] {
            // Pre-work that hands out a result someone else already consumes.
            let shared = AsyncResult::<()>::pending();
            shared.on_settle(|_| {}).unwrap();
            let pre = shared.clone();
            let chain = [Arc::new(
                Interceptor::new("leaky", move |_: &InterceptionContext| pre.clone()).with_strategy(strategy),
            )];

            let outcome = proceed(context(&chain), echo_target()).wait();
            assert!(matches!(outcome, Err(Error::AlreadyObserved)), "{strategy}: got {outcome:?}");
        }
    }

    #[tokio::test]
    async fn settled_pre_work_arms_no_timer() {
        let done = AsyncResult::resolved(());
        let pre = done.clone();
        let chain = [Arc::new(
            Interceptor::new("settled", move |_: &InterceptionContext| pre.clone())
                .with_timeout(Handle::current(), Duration::from_secs(60)),
        )];

        proceed(context(&chain), echo_target()).wait().unwrap();
        // `done` plus the closure's copy; a timer task would hold a third.
        assert_eq!(done.handle_count(), 2);
    }

    #[tokio::test]
    async fn pending_pre_work_arms_the_timer() {
        let gate = AsyncResult::<()>::pending();
        let pre = gate.clone();
        let chain = [Arc::new(
            Interceptor::new("gate", move |_: &InterceptionContext| pre.clone())
                .with_timeout(Handle::current(), Duration::from_millis(10)),
        )];

        let outcome = proceed(context(&chain), echo_target()).await;
        assert!(matches!(outcome, Err(Error::Timeout(_))));
    }

    #[test]
    fn context_shrinks_as_the_chain_advances() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let stage = |name: &'static str| {
            let seen = Arc::clone(&seen);
            Arc::new(Interceptor::new(name, move |ctx: &InterceptionContext| {
                seen.lock().push(ctx.remaining().collect::<Vec<_>>().join(","));
                AsyncResult::resolved(())
            }))
        };
        let chain = [stage("a"), stage("b"), stage("c")];

        proceed(context(&chain), echo_target()).wait().unwrap();
        assert_eq!(*seen.lock(), ["b,c", "c", ""]);
    }

    #[test]
    fn strategy_parses_from_config_strings() {
        assert_eq!("blocking".parse::<Strategy>().unwrap(), Strategy::Blocking);
        assert_eq!("non-blocking".parse::<Strategy>().unwrap(), Strategy::NonBlocking);
        assert!("sometimes".parse::<Strategy>().is_err());
    }
}
