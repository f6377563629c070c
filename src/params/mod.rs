//! # Parameter Extraction & Mapping
//!
//! Builds the per-request parameter set from router path captures and the
//! raw query string, then applies the endpoint's per-parameter mapping
//! chains in place. Downstream consumers only ever see the post-mapping
//! values.

use std::collections::HashMap;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::ParamMapping;
use crate::expr::ExprError;

/// Result type for parameter operations
pub type ParamResult<T> = Result<T, ParamError>;

/// A parameter mapping chain failed; reported to the client as a 400 with
/// the parameter named.
#[derive(Debug, Error)]
pub enum ParamError {
    #[error("error mapping path parameter {name:?}: {source}")]
    Path {
        name: String,
        #[source]
        source: ExprError,
    },

    #[error("error mapping query parameter {name:?}: {source}")]
    Query {
        name: String,
        #[source]
        source: ExprError,
    },
}

/// Path and query parameters, kept separate.
///
/// Path values start as single strings (the router guarantees one
/// occurrence per name); query values start as sequences of strings in
/// original order. After mapping, either kind may hold any value shape.
#[derive(Debug, Clone, Default)]
pub struct ParameterSet {
    pub path: Map<String, Value>,
    pub query: Map<String, Value>,
}

impl ParameterSet {
    /// Build the initial set from router captures and the raw query string.
    ///
    /// A query parameter appearing zero times is absent, not an empty
    /// sequence. Undecodable query strings yield an empty query map.
    pub fn new<I>(path_captures: I, query_string: Option<&str>) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut path = Map::new();
        for (name, value) in path_captures {
            path.insert(name, Value::String(value));
        }

        let mut query = Map::new();
        if let Some(qs) = query_string {
            let pairs: Vec<(String, String)> =
                serde_urlencoded::from_str(qs).unwrap_or_default();
            for (name, value) in pairs {
                let entry = query
                    .entry(name)
                    .or_insert_with(|| Value::Array(Vec::new()));
                if let Value::Array(items) = entry {
                    items.push(Value::String(value));
                }
            }
        }

        Self { path, query }
    }

    /// Apply the endpoint's parameter mapping chains in place.
    ///
    /// Declared mappings whose parameter is absent are skipped; a chain
    /// failure aborts with the parameter name attached.
    pub async fn apply_mappings(
        &mut self,
        path_params: &HashMap<String, ParamMapping>,
        query_params: &HashMap<String, ParamMapping>,
    ) -> ParamResult<()> {
        for (name, pd) in path_params {
            let Some(current) = self.path.get(name).cloned() else {
                continue;
            };
            let mapped = pd
                .map
                .apply(current, Value::Null)
                .await
                .map_err(|source| ParamError::Path {
                    name: name.clone(),
                    source,
                })?;
            self.path.insert(name.clone(), mapped);
        }

        for (name, pd) in query_params {
            let Some(current) = self.query.get(name).cloned() else {
                continue;
            };
            let mapped = pd
                .map
                .apply(current, Value::Null)
                .await
                .map_err(|source| ParamError::Query {
                    name: name.clone(),
                    source,
                })?;
            self.query.insert(name.clone(), mapped);
        }

        Ok(())
    }
}
