//! Environment-driven configuration.
//!
//! | Variable | Default | Meaning |
//! |---|---|---|
//! | `INTERPOSE_BIND` | `127.0.0.1:8080` | HTTP listen address |
//! | `INTERPOSE_COUNT_SQL` | `select count(*) from batch` | scalar query used by authorization and tracing pre-work |
//! | `INTERPOSE_STRATEGY` | `non-blocking` | how the tracing interceptor waits: `blocking` or `non-blocking` |
//! | `INTERPOSE_PREWORK_TIMEOUT_MS` | unset | fail pre-work still pending after this many ms |
//! | `INTERPOSE_QUERY_LATENCY_MS` | `20` | simulated latency of the in-memory data source |
//! | `INTERPOSE_DB_THREADS` | `2` | worker threads of the data runtime |

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::error::Error;
use crate::interceptor::Strategy;

/// Settings for an interpose deployment.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind: SocketAddr,
    pub count_sql: String,
    pub strategy: Strategy,
    pub prework_timeout: Option<Duration>,
    pub query_latency: Duration,
    pub db_threads: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            count_sql: "select count(*) from batch".to_owned(),
            strategy: Strategy::NonBlocking,
            prework_timeout: None,
            query_latency: Duration::from_millis(20),
            db_threads: 2,
        }
    }
}

impl Config {
    /// Reads `INTERPOSE_*` variables from the process environment.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through `lookup`; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let defaults = Self::default();
        Ok(Self {
            bind: parse(&lookup, "INTERPOSE_BIND")?.unwrap_or(defaults.bind),
            count_sql: lookup("INTERPOSE_COUNT_SQL").unwrap_or(defaults.count_sql),
            strategy: parse(&lookup, "INTERPOSE_STRATEGY")?.unwrap_or(defaults.strategy),
            prework_timeout: parse(&lookup, "INTERPOSE_PREWORK_TIMEOUT_MS")?.map(Duration::from_millis),
            query_latency: parse(&lookup, "INTERPOSE_QUERY_LATENCY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.query_latency),
            db_threads: parse(&lookup, "INTERPOSE_DB_THREADS")?.unwrap_or(defaults.db_threads),
        })
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, Error>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key)
        .map(|raw| raw.trim().parse().map_err(|e| Error::Config(format!("{key}={raw}: {e}"))))
        .transpose()
}
