//! # Placeholder Expansion
//!
//! Steps are written with `?` placeholders regardless of backend. Before
//! execution each query is rewritten: list-typed arguments expand into one
//! placeholder per element (so `IN (?)` works), and placeholders are
//! re-emitted in the driver's preferred style.
//!
//! Placeholders inside single-quoted SQL strings are left alone.

use serde_json::Value;

use super::errors::{DbError, DbResult};

/// Positional placeholder style for a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BindStyle {
    /// `?` (sqlite, mysql)
    #[default]
    Question,
    /// `$1`, `$2`, … (postgres)
    Dollar,
    /// `@p1`, `@p2`, … (mssql)
    AtP,
}

impl BindStyle {
    /// Derive the style from a database URL scheme.
    pub fn from_url(url: &str) -> Self {
        let scheme = url.split("://").next().unwrap_or("");
        match scheme {
            "postgres" | "postgresql" => BindStyle::Dollar,
            "mssql" | "sqlserver" => BindStyle::AtP,
            _ => BindStyle::Question,
        }
    }

    fn push(self, out: &mut String, n: usize) {
        match self {
            BindStyle::Question => out.push('?'),
            BindStyle::Dollar => {
                out.push('$');
                out.push_str(&n.to_string());
            }
            BindStyle::AtP => {
                out.push_str("@p");
                out.push_str(&n.to_string());
            }
        }
    }
}

/// Rewrite `sql`, expanding list arguments and re-emitting placeholders in
/// `style`. Returns the rewritten text and the flattened argument list, in
/// placeholder order.
pub fn expand(sql: &str, args: &[Value], style: BindStyle) -> DbResult<(String, Vec<Value>)> {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut flat = Vec::with_capacity(args.len());
    let mut next_arg = 0usize;
    let mut position = 0usize;
    let mut in_string = false;

    for ch in sql.chars() {
        if in_string {
            out.push(ch);
            if ch == '\'' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '\'' => {
                in_string = true;
                out.push(ch);
            }
            '?' => {
                let arg = args.get(next_arg).ok_or(DbError::ArgCount {
                    placeholders: count_placeholders(sql),
                    args: args.len(),
                })?;
                match arg {
                    Value::Array(items) => {
                        if items.is_empty() {
                            return Err(DbError::EmptyList { index: next_arg });
                        }
                        for (i, item) in items.iter().enumerate() {
                            if i > 0 {
                                out.push_str(", ");
                            }
                            position += 1;
                            style.push(&mut out, position);
                            flat.push(item.clone());
                        }
                    }
                    other => {
                        position += 1;
                        style.push(&mut out, position);
                        flat.push(other.clone());
                    }
                }
                next_arg += 1;
            }
            _ => out.push(ch),
        }
    }

    if next_arg != args.len() {
        return Err(DbError::ArgCount {
            placeholders: next_arg,
            args: args.len(),
        });
    }
    Ok((out, flat))
}

fn count_placeholders(sql: &str) -> usize {
    let mut count = 0;
    let mut in_string = false;
    for ch in sql.chars() {
        match ch {
            '\'' => in_string = !in_string,
            '?' if !in_string => count += 1,
            _ => {}
        }
    }
    count
}
