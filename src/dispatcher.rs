//! Operation table and dispatch.
//!
//! Built once at startup; read-only afterwards and shared behind an `Arc`
//! across every request, so lookups take no lock.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::async_result::AsyncResult;
use crate::error::Error;
use crate::interceptor::{self, InterceptionContext, Interceptor};
use crate::operation::{BoxedOperation, Operation};
use crate::value::{Args, Value};

/// Whether an operation runs behind interceptors.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Kind {
    /// No pre-work: the target is invoked directly.
    FastPath,
    /// One or more interceptors run before the target.
    Guarded,
}

/// Static metadata for one registered operation.
#[derive(Clone, Debug)]
pub struct OperationDescriptor {
    name: Arc<str>,
    kind: Kind,
}

impl OperationDescriptor {
    pub fn name(&self) -> &str { &self.name }
    pub fn kind(&self) -> Kind { self.kind }
}

struct Entry {
    descriptor: OperationDescriptor,
    target: BoxedOperation,
    chain: Vec<Arc<Interceptor>>,
}

/// Maps operation names to targets and their interceptor chains.
///
/// ```rust,no_run
/// # use interpose::{Args, AsyncResult, Dispatcher, Interceptor, InterceptionContext, Value};
/// let dispatcher = Dispatcher::builder()
///     .fast("ping", |_: Args| AsyncResult::resolved(Value::from("pong")))
///     .guarded(
///         "secret",
///         |_: Args| AsyncResult::resolved(Value::from(42_i64)),
///         [Interceptor::new("audit", |_: &InterceptionContext| AsyncResult::resolved(()))],
///     )
///     .build();
///
/// let pong = dispatcher.dispatch("ping", Args::new());
/// ```
pub struct Dispatcher {
    entries: HashMap<Arc<str>, Entry>,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder { entries: HashMap::new() }
    }

    /// Invokes `operation` with `args`, through its interceptor chain if it
    /// is guarded.
    ///
    /// Unknown names fail with [`Error::UnknownOperation`] before anything
    /// else is touched.
    pub fn dispatch(&self, operation: &str, args: Args) -> AsyncResult<Value> {
        let Some(entry) = self.entries.get(operation) else {
            warn!(operation, "dispatch to unknown operation");
            return AsyncResult::failed(Error::UnknownOperation(operation.to_owned()));
        };

        match entry.descriptor.kind {
            Kind::FastPath => {
                debug!(operation, "fast-path dispatch");
                entry.target.call(args)
            }
            Kind::Guarded => {
                debug!(operation, interceptors = entry.chain.len(), "guarded dispatch");
                let ctx = InterceptionContext::new(Arc::clone(&entry.descriptor.name), args, &entry.chain);
                interceptor::proceed(ctx, Arc::clone(&entry.target))
            }
        }
    }

    pub fn descriptor(&self, operation: &str) -> Option<&OperationDescriptor> {
        self.entries.get(operation).map(|e| &e.descriptor)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &OperationDescriptor> {
        self.entries.values().map(|e| &e.descriptor)
    }
}

/// Collects registrations for a [`Dispatcher`].
///
/// Registration mistakes are configuration bugs and panic at startup, the
/// same way an invalid route does.
pub struct DispatcherBuilder {
    entries: HashMap<Arc<str>, Entry>,
}

impl DispatcherBuilder {
    /// Registers an operation that runs with no interceptors.
    pub fn fast(self, name: &str, target: impl Operation) -> Self {
        self.add(name, Kind::FastPath, Arc::new(target), Vec::new())
    }

    /// Registers an operation behind `interceptors`, run in the given order.
    ///
    /// # Panics
    ///
    /// Panics if `interceptors` is empty or `name` is already registered.
    pub fn guarded(
        self,
        name: &str,
        target: impl Operation,
        interceptors: impl IntoIterator<Item = Interceptor>,
    ) -> Self {
        let chain: Vec<_> = interceptors.into_iter().map(Arc::new).collect();
        self.guarded_shared(name, Arc::new(target), chain)
    }

    /// Like [`guarded`](Self::guarded), for interceptors shared between
    /// several operations.
    pub fn guarded_shared(self, name: &str, target: BoxedOperation, chain: Vec<Arc<Interceptor>>) -> Self {
        assert!(!chain.is_empty(), "guarded operation `{name}` has no interceptors");
        self.add(name, Kind::Guarded, target, chain)
    }

    fn add(mut self, name: &str, kind: Kind, target: BoxedOperation, chain: Vec<Arc<Interceptor>>) -> Self {
        assert!(!self.entries.contains_key(name), "operation `{name}` registered twice");
        let name: Arc<str> = Arc::from(name);
        let descriptor = OperationDescriptor { name: Arc::clone(&name), kind };
        self.entries.insert(name, Entry { descriptor, target, chain });
        self
    }

    pub fn build(self) -> Dispatcher {
        Dispatcher { entries: self.entries }
    }
}
