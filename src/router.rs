//! Radix-tree request router.
//!
//! One tree per HTTP method. O(path-length) lookup. A route resolves to an
//! operation *name*; the [`Dispatcher`](crate::Dispatcher) decides what that
//! name runs and what intercepts it.

use std::collections::HashMap;

use http::Method;
use matchit::Router as MatchitRouter;

use crate::value::Args;

/// Maps `method + path` to an operation name.
///
/// Build it once at startup; pass it to [`Server::serve`](crate::Server::serve).
/// Each [`Router::route`] call returns `self` so registrations chain.
pub struct Router {
    routes: HashMap<Method, MatchitRouter<String>>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: HashMap::new() }
    }

    /// Routes `method path` to `operation`. Returns `self` for chaining.
    ///
    /// Path parameters use `{name}` syntax and arrive as [`Args`]:
    ///
    /// ```rust,no_run
    /// # use interpose::Router;
    /// # use http::Method;
    /// Router::new()
    ///     .route(Method::GET, "/nonblocking",    "count")
    ///     .route(Method::GET, "/batches/{id}",   "batch");
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if `path` is malformed or conflicts with an existing route.
    pub fn route(mut self, method: Method, path: &str, operation: &str) -> Self {
        self.routes
            .entry(method)
            .or_default()
            .insert(path, operation.to_owned())
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    pub(crate) fn lookup(&self, method: &Method, path: &str) -> Option<(&str, Args)> {
        let tree = self.routes.get(method)?;
        let matched = tree.at(path).ok()?;
        let args = matched.params.iter().collect();
        Some((matched.value.as_str(), args))
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}
