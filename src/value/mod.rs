//! # Value Coercions
//!
//! Every component exchanges data as `serde_json::Value`: parameters,
//! resolved arguments, scanned rows, mapping inputs and outputs, and the
//! response body. This module provides the small set of coercions the SQL
//! and HTTP edges need on top of that universe.
//!
//! Integers wider than `i64` ride in serde_json's `u64` arm; anything that
//! does not fit `i64` is out of range for `as_int`. Integers wider than
//! `u64` have no in-memory form at all: the JSON parser approximates such
//! literals as floats before any value reaches this module.

use serde_json::Value;

/// Coerce a value to a 64-bit signed integer.
///
/// Accepts integers, floats (truncated toward zero), and strings (parsed
/// with auto-base detection, so `"0x10"` is 16). Everything else is `None`.
pub fn as_int(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i)
            } else if let Some(f) = n.as_f64() {
                float_to_int(f)
            } else {
                // u64 beyond i64::MAX
                None
            }
        }
        Value::String(s) => parse_int_auto_base(s),
        _ => None,
    }
}

/// Coerce a value to a string.
///
/// Strings pass through, numbers and booleans render in their canonical
/// decimal/JSON form, sequences and mappings serialize as JSON. Null is
/// not a string.
pub fn as_string(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(_) | Value::Object(_) => serde_json::to_string(v).ok(),
    }
}

/// Coerce a value to a non-empty list of strings.
///
/// Sequences coerce element-wise, dropping elements that are not
/// string-coercible; scalars become singletons. Returns `None` when the
/// result would be empty.
pub fn as_strings(v: &Value) -> Option<Vec<String>> {
    let out: Vec<String> = match v {
        Value::Array(items) => items.iter().filter_map(as_string).collect(),
        other => as_string(other).into_iter().collect(),
    };
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

fn float_to_int(f: f64) -> Option<i64> {
    let t = f.trunc();
    // i64::MAX as f64 rounds up, so compare in f64 space against the
    // largest exactly-representable bound.
    if t.is_finite() && t >= i64::MIN as f64 && t < i64::MAX as f64 {
        Some(t as i64)
    } else {
        None
    }
}

/// Parse an integer with auto-base detection, like `strconv.ParseInt(s, 0, 64)`.
fn parse_int_auto_base(s: &str) -> Option<i64> {
    let s = s.trim();
    let (neg, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let (base, digits) = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        (16, hex)
    } else if let Some(oct) = digits.strip_prefix("0o").or_else(|| digits.strip_prefix("0O")) {
        (8, oct)
    } else if let Some(bin) = digits.strip_prefix("0b").or_else(|| digits.strip_prefix("0B")) {
        (2, bin)
    } else {
        (10, digits)
    };
    let magnitude = i128::from_str_radix(digits, base).ok()?;
    let signed = if neg { -magnitude } else { magnitude };
    i64::try_from(signed).ok()
}
