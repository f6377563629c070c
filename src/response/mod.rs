//! # Response Materializer
//!
//! Turns the pipeline's final value into an HTTP response. A mapping with
//! a `__response` envelope can steer the status code, add headers, and
//! pick a different field of the outer mapping as the body; the envelope
//! itself is never emitted to the client.

use axum::body::Body;
use axum::http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::Response;
use serde_json::Value;
use tracing::warn;

use crate::value::{as_int, as_string, as_strings};

/// Key of the response envelope in a mapping-shaped final value.
pub const RESPONSE_KEY: &str = "__response";

/// Materialize the final pipeline value into a JSON response.
///
/// Every number in the body must have an exact JSON form; a body that
/// would lose data on the wire is an internal error, never a silently
/// corrupted response.
pub fn materialize(final_value: Value) -> Response {
    let (status, headers, body) = interpret(final_value);

    if let Err(number) = check_numbers(&body) {
        warn!(number = %number, "response body contains a number with no exact JSON form");
        return plain_status(StatusCode::INTERNAL_SERVER_ERROR);
    }

    let bytes = match serde_json::to_vec(&body) {
        Ok(b) => b,
        Err(e) => {
            warn!(error = %e, "failed to serialize response body");
            return plain_status(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    let mut builder = Response::builder().status(status);
    if let Some(hs) = builder.headers_mut() {
        for (name, value) in headers {
            hs.append(name, value);
        }
        // JSON unless the envelope supplied its own content type.
        if !hs.contains_key(CONTENT_TYPE) {
            hs.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
    }
    match builder.body(Body::from(bytes)) {
        Ok(resp) => resp,
        Err(e) => {
            warn!(error = %e, "failed to build response");
            plain_status(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn interpret(final_value: Value) -> (StatusCode, Vec<(HeaderName, HeaderValue)>, Value) {
    let mut outer = match final_value {
        Value::Object(outer) => outer,
        other => return (StatusCode::OK, Vec::new(), other),
    };
    // Only a mapping-valued __response is an envelope; anything else is
    // ordinary data and passes through untouched.
    if !matches!(outer.get(RESPONSE_KEY), Some(Value::Object(_))) {
        return (StatusCode::OK, Vec::new(), Value::Object(outer));
    }
    let Some(Value::Object(envelope)) = outer.remove(RESPONSE_KEY) else {
        return (StatusCode::OK, Vec::new(), Value::Object(outer));
    };

    let status = envelope
        .get("status")
        .map(status_from)
        .unwrap_or(StatusCode::OK);
    let headers = envelope
        .get("headers")
        .map(headers_from)
        .unwrap_or_default();

    let body = match envelope.get("data_key").and_then(as_string) {
        Some(key) => outer.remove(&key).unwrap_or(Value::Null),
        None => Value::Object(outer),
    };

    (status, headers, body)
}

/// Coerce an envelope status. Anything that does not coerce to a valid
/// wire status becomes a 500; a malformed status line is never emitted.
fn status_from(v: &Value) -> StatusCode {
    let Some(code) = as_int(v).filter(|c| *c >= 1) else {
        warn!(status = %v, "response envelope status is not a positive integer");
        return StatusCode::INTERNAL_SERVER_ERROR;
    };
    match u16::try_from(code).ok().and_then(|c| StatusCode::from_u16(c).ok()) {
        Some(status) => status,
        None => {
            warn!(status = code, "response envelope status out of range");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Expand envelope headers. Each value is added, not set, so multi-valued
/// headers survive; entries that cannot form a legal header are logged
/// and skipped.
fn headers_from(v: &Value) -> Vec<(HeaderName, HeaderValue)> {
    let Value::Object(map) = v else {
        warn!("response envelope headers is not a mapping");
        return Vec::new();
    };
    let mut out = Vec::new();
    for (name, value) in map {
        let Ok(header) = HeaderName::from_bytes(name.as_bytes()) else {
            warn!(header = %name, "invalid response header name");
            continue;
        };
        let Some(values) = as_strings(value) else {
            continue;
        };
        for s in values {
            match HeaderValue::from_str(&s) {
                Ok(hv) => out.push((header.clone(), hv)),
                Err(_) => warn!(header = %name, "invalid response header value"),
            }
        }
    }
    out
}

/// Walk the body and verify every number round-trips through JSON
/// losslessly: an integer within `i64`/`u64` bounds or a finite float.
/// Returns the offending number's rendering otherwise.
fn check_numbers(v: &Value) -> Result<(), String> {
    match v {
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() || n.as_f64().is_some_and(f64::is_finite) {
                Ok(())
            } else {
                Err(n.to_string())
            }
        }
        Value::Array(items) => items.iter().try_for_each(check_numbers),
        Value::Object(map) => map.values().try_for_each(check_numbers),
        _ => Ok(()),
    }
}

fn plain_status(status: StatusCode) -> Response {
    let mut resp = Response::new(Body::from("internal server error\n"));
    *resp.status_mut() = status;
    resp
}
