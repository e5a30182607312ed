//! Operation inputs ([`Args`]) and outputs ([`Value`]).

use std::collections::HashMap;
use std::fmt;

use crate::error::Error;

/// Named arguments an operation is invoked with.
///
/// The HTTP front fills these from path parameters (`/users/{id}` → `id`).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Args {
    values: HashMap<String, String>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize { self.values.len() }
    pub fn is_empty(&self) -> bool { self.values.is_empty() }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Args {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self { values: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect() }
    }
}

/// What a target operation produces.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Value {
    Int(i64),
    Text(String),
    Unit,
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n)  => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
            Self::Unit    => Ok(()),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self { Self::Int(n) }
}

impl From<String> for Value {
    fn from(s: String) -> Self { Self::Text(s) }
}

impl From<&'static str> for Value {
    fn from(s: &'static str) -> Self { Self::Text(s.to_owned()) }
}

impl From<()> for Value {
    fn from((): ()) -> Self { Self::Unit }
}

// ── IntoOutcome ───────────────────────────────────────────────────────────────

/// Conversion of an `async fn` operation's return value into an outcome.
///
/// Lets operations return a bare value when they cannot fail, or
/// `Result<_, Error>` when they can:
///
/// ```rust,ignore
/// async fn count(_: Args) -> Result<i64, Error> { exec.run_scalar_query(SQL).await }
/// async fn thread_name(_: Args) -> String { current_thread_name() }
/// ```
pub trait IntoOutcome {
    fn into_outcome(self) -> Result<Value, Error>;
}

impl IntoOutcome for Value {
    fn into_outcome(self) -> Result<Value, Error> { Ok(self) }
}

impl IntoOutcome for i64 {
    fn into_outcome(self) -> Result<Value, Error> { Ok(self.into()) }
}

impl IntoOutcome for String {
    fn into_outcome(self) -> Result<Value, Error> { Ok(self.into()) }
}

impl IntoOutcome for &'static str {
    fn into_outcome(self) -> Result<Value, Error> { Ok(self.into()) }
}

impl IntoOutcome for () {
    fn into_outcome(self) -> Result<Value, Error> { Ok(Value::Unit) }
}

impl<T: Into<Value>> IntoOutcome for Result<T, Error> {
    fn into_outcome(self) -> Result<Value, Error> { self.map(Into::into) }
}
