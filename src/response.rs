//! Rendering dispatch outcomes as HTTP responses.
//!
//! | Outcome | Status |
//! |---|---|
//! | `Ok(Value::Int \| Value::Text)` | 200, `text/plain` body |
//! | `Ok(Value::Unit)` | 204 |
//! | `UnknownOperation`, `NoRows` | 404 |
//! | `Denied` | 403 |
//! | `Query` | 502 |
//! | `Timeout` | 504 |
//! | anything else | 500 |

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderValue};
use http::StatusCode;
use http_body_util::Full;
use tracing::error;

use crate::error::Error;
use crate::value::Value;

pub(crate) type HttpResponse = http::Response<Full<Bytes>>;

pub(crate) fn render(outcome: Result<Value, Error>) -> HttpResponse {
    match outcome {
        Ok(Value::Unit) => status(StatusCode::NO_CONTENT),
        Ok(value) => text(StatusCode::OK, value.to_string()),
        Err(e) => {
            let code = status_for(&e);
            if code == StatusCode::INTERNAL_SERVER_ERROR {
                error!(error = %e, programming = e.is_programming_error(), "dispatch failed");
            }
            text(code, e.to_string())
        }
    }
}

pub(crate) fn status(code: StatusCode) -> HttpResponse {
    let mut res = http::Response::new(Full::new(Bytes::new()));
    *res.status_mut() = code;
    res
}

fn text(code: StatusCode, body: String) -> HttpResponse {
    let mut res = http::Response::new(Full::new(Bytes::from(body)));
    *res.status_mut() = code;
    res.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    res
}

fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::UnknownOperation(_) | Error::NoRows => StatusCode::NOT_FOUND,
        Error::Denied     => StatusCode::FORBIDDEN,
        Error::Query(_)   => StatusCode::BAD_GATEWAY,
        Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _                 => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
