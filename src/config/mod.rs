//! # Configuration
//!
//! The declarative surface: bind addresses, named databases, and endpoint
//! definitions mapping (method, path) to a pipeline of transactions and
//! steps. Config is loaded from JSON, expressions compile during
//! deserialization, and `Config::validate` collects every structural
//! violation before the server starts.

mod errors;

pub use errors::{ConfigError, ConfigResult};

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;

use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::db::QueryOptions;
use crate::expr::{Expr, Mapping};

/// Top-level program configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Listen addresses; defaults to 127.0.0.1:8080 when empty.
    #[serde(default)]
    pub bind: Vec<String>,

    /// Named databases referenced by endpoint transactions.
    #[serde(default)]
    pub databases: HashMap<String, DatabaseDef>,

    /// Endpoint definitions, in declaration order.
    #[serde(default)]
    pub endpoints: Vec<EndpointDef>,
}

const DEFAULT_BIND: &str = "127.0.0.1:8080";

impl Config {
    /// Load and parse a config file. Validation is a separate step so the
    /// caller can print a parsed-but-invalid config.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let data = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        serde_json::from_str(&data).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// The bind list with the default applied.
    pub fn effective_bind(&self) -> Vec<String> {
        if self.bind.is_empty() {
            vec![DEFAULT_BIND.to_string()]
        } else {
            self.bind.clone()
        }
    }

    /// Check structural invariants, collecting every violation rather than
    /// stopping at the first.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut problems = Vec::new();
        let bind_count = self.effective_bind().len();

        for (i, ep) in self.endpoints.iter().enumerate() {
            let ident = format!("endpoint={} method={:?} path={:?}", i, ep.method, ep.path);
            ep.validate(&mut problems, &ident, bind_count, &self.databases);
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation { problems })
        }
    }
}

/// A named database: connection URL, pool limits, and query options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseDef {
    pub url: String,

    /// Maximum open connections; 0 means the driver default.
    #[serde(default)]
    pub max_open: u32,
    /// Seconds a connection may sit idle before being closed.
    #[serde(default)]
    pub max_idle_time_seconds: u64,
    /// Seconds a connection may live before being recycled.
    #[serde(default)]
    pub max_life_time_seconds: u64,

    #[serde(default)]
    pub options: QueryOptions,
}

/// One HTTP endpoint bound to a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointDef {
    /// Listener indices this endpoint is served on; empty means all.
    #[serde(default)]
    pub bind: Vec<usize>,

    pub method: String,
    pub path: String,

    /// How the request body is read into the pipeline.
    #[serde(default)]
    pub body_type: BodyType,

    #[serde(default)]
    pub path_params: HashMap<String, ParamMapping>,
    #[serde(default)]
    pub query_params: HashMap<String, ParamMapping>,

    pub query: QueryDef,
}

impl EndpointDef {
    /// Whether this endpoint is served on the given listener index.
    pub fn serves_binding(&self, binding: usize) -> bool {
        self.bind.is_empty() || self.bind.contains(&binding)
    }

    fn validate(
        &self,
        problems: &mut Vec<String>,
        ident: &str,
        bind_count: usize,
        databases: &HashMap<String, DatabaseDef>,
    ) {
        if self.method.is_empty() {
            problems.push(format!("{ident}: method is empty"));
        }
        if self.path.is_empty() {
            problems.push(format!("{ident}: path is empty"));
        } else if !self.path.starts_with('/') {
            problems.push(format!("{ident}: path must start with '/'"));
        }
        for b in &self.bind {
            if *b >= bind_count {
                problems.push(format!("{ident}: refers to undefined binding {b}"));
            }
        }
        self.query.validate(problems, ident, databases);
    }
}

/// Request body handling mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyType {
    #[default]
    Json,
    Form,
    String,
    None,
}

/// Mapping chain applied to a path or query parameter after extraction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParamMapping {
    #[serde(default)]
    pub map: Mapping,
}

/// The pipeline: declared transactions plus ordered steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryDef {
    pub transactions: Vec<TransactionDef>,
    pub steps: Vec<StepDef>,
}

impl QueryDef {
    fn validate(
        &self,
        problems: &mut Vec<String>,
        ident: &str,
        databases: &HashMap<String, DatabaseDef>,
    ) {
        if self.transactions.is_empty() {
            problems.push(format!("{ident}: no transaction(s) defined"));
        }
        if self.steps.is_empty() {
            problems.push(format!("{ident}: no step(s) defined"));
        }
        for (t, td) in self.transactions.iter().enumerate() {
            if !databases.contains_key(&td.db) {
                problems.push(format!(
                    "{ident}: transaction {t} refers to undefined database {:?}",
                    td.db
                ));
            }
        }

        let mut referenced = BTreeSet::new();
        for (s, sd) in self.steps.iter().enumerate() {
            referenced.insert(sd.transaction);
            if sd.transaction >= self.transactions.len() {
                problems.push(format!(
                    "{ident}: step {s} refers to undefined transaction {}",
                    sd.transaction
                ));
            }
        }
        let unused: Vec<String> = (0..self.transactions.len())
            .filter(|t| !referenced.contains(t))
            .map(|t| t.to_string())
            .collect();
        if !unused.is_empty() {
            problems.push(format!(
                "{ident}: unused transaction(s) in query: {{{}}}",
                unused.join(",")
            ));
        }
    }
}

/// A declared database scope within an endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionDef {
    pub db: String,
    #[serde(default)]
    pub isolation: IsolationLevel,
}

/// One SQL execution plus its result mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDef {
    /// Index into the endpoint's transaction list; defaults to 0.
    #[serde(default)]
    pub transaction: usize,

    pub query: String,

    #[serde(default)]
    pub args: Vec<ArgDef>,

    #[serde(default)]
    pub map: Mapping,
}

/// Transaction isolation, including `none` for pool-direct execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    None,
    #[default]
    Default,
    ReadUncommitted,
    ReadCommitted,
    WriteCommitted,
    RepeatableRead,
    Snapshot,
    Serializable,
    Linearizable,
}

impl IsolationLevel {
    /// `none` executes steps against the pool without a transaction.
    pub fn requires_transaction(&self) -> bool {
        !matches!(self, IsolationLevel::None)
    }

    /// The SQL isolation phrase, or `None` for levels that use the
    /// driver's default. Unsupported phrases are rejected by the database
    /// at begin time.
    pub fn sql_phrase(&self) -> Option<&'static str> {
        match self {
            IsolationLevel::None | IsolationLevel::Default => None,
            IsolationLevel::ReadUncommitted => Some("READ UNCOMMITTED"),
            IsolationLevel::ReadCommitted => Some("READ COMMITTED"),
            IsolationLevel::WriteCommitted => Some("WRITE COMMITTED"),
            IsolationLevel::RepeatableRead => Some("REPEATABLE READ"),
            IsolationLevel::Snapshot => Some("SNAPSHOT"),
            IsolationLevel::Serializable => Some("SERIALIZABLE"),
            IsolationLevel::Linearizable => Some("LINEARIZABLE"),
        }
    }
}

/// How one positional SQL argument is produced.
///
/// The JSON forms are: a scalar or null (literal), `{"path": name}`,
/// `{"query": name}`, or `{"expr": source}`. Bare arrays are rejected
/// because they are ambiguous with the reference forms; so are mappings
/// with more or fewer than one key.
#[derive(Debug, Clone)]
pub enum ArgDef {
    Literal(Value),
    Path(String),
    Query(String),
    Expr(Expr),
}

const BAD_ARG_DEF: &str =
    "invalid arg def: must be a scalar, null, or contain a single key of 'path', 'query', or 'expr'";

impl<'de> Deserialize<'de> for ArgDef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        match raw {
            Value::Array(_) => Err(D::Error::custom(BAD_ARG_DEF)),
            Value::Object(map) => {
                if map.len() != 1 {
                    return Err(D::Error::custom(BAD_ARG_DEF));
                }
                let Some((key, value)) = map.into_iter().next() else {
                    return Err(D::Error::custom(BAD_ARG_DEF));
                };
                let text = match value {
                    Value::String(s) => s,
                    _ => return Err(D::Error::custom(BAD_ARG_DEF)),
                };
                match key.as_str() {
                    "path" => Ok(ArgDef::Path(text)),
                    "query" => Ok(ArgDef::Query(text)),
                    "expr" => Expr::compile(&text)
                        .map(ArgDef::Expr)
                        .map_err(D::Error::custom),
                    _ => Err(D::Error::custom(BAD_ARG_DEF)),
                }
            }
            scalar => Ok(ArgDef::Literal(scalar)),
        }
    }
}

impl Serialize for ArgDef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ArgDef::Literal(v) => v.serialize(serializer),
            ArgDef::Path(name) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("path", name)?;
                map.end()
            }
            ArgDef::Query(name) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("query", name)?;
                map.end()
            }
            ArgDef::Expr(e) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("expr", e.source())?;
                map.end()
            }
        }
    }
}
