//! Per-invocation interception state.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use super::Interceptor;
use crate::value::Args;

/// The thread a dispatch started on. Diagnostics only.
#[derive(Clone, Debug)]
pub struct Origin {
    pub id: ThreadId,
    pub name: Option<String>,
}

impl Origin {
    pub(crate) fn current() -> Self {
        let current = thread::current();
        Self { id: current.id(), name: current.name().map(str::to_owned) }
    }
}

/// Everything one in-flight guarded dispatch carries through its chain.
///
/// Owned by exactly one request. Each interceptor takes it by value and hands
/// it on to the next stage, so nothing else can observe or reuse it.
pub struct InterceptionContext {
    operation: Arc<str>,
    args: Args,
    remaining: VecDeque<Arc<Interceptor>>,
    origin: Origin,
}

impl InterceptionContext {
    pub fn new(operation: Arc<str>, args: Args, chain: &[Arc<Interceptor>]) -> Self {
        Self {
            operation,
            args,
            remaining: chain.iter().cloned().collect(),
            origin: Origin::current(),
        }
    }

    pub fn operation(&self) -> &str { &self.operation }
    pub fn args(&self) -> &Args { &self.args }
    pub fn origin(&self) -> &Origin { &self.origin }

    /// Names of the interceptors that have not run yet.
    pub fn remaining(&self) -> impl Iterator<Item = &str> {
        self.remaining.iter().map(|i| i.name())
    }

    pub(super) fn next_interceptor(&mut self) -> Option<Arc<Interceptor>> {
        self.remaining.pop_front()
    }

    pub(super) fn into_args(self) -> Args {
        self.args
    }
}
