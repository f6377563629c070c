//! # Databases
//!
//! Opened connection pools plus the driver-specific knobs queries need:
//! positional placeholder style and scan-time coercion flags. The core is
//! driver-agnostic; everything backend-specific lives here.

pub mod bind;
mod errors;
pub mod scan;

pub use bind::BindStyle;
pub use errors::{DbError, DbResult};

use std::collections::HashMap;
use std::sync::{Arc, Once};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::any::{AnyArguments, AnyPoolOptions};
use sqlx::query::Query;
use sqlx::{Any, AnyPool};
use tracing::info;

use crate::config::DatabaseDef;

/// Scan-time coercion options for a database.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct QueryOptions {
    /// Parse text columns holding JSON documents into structured values.
    #[serde(default)]
    pub parse_json: bool,
}

/// An opened, shareable connection pool for one configured database.
#[derive(Debug)]
pub struct Database {
    pub name: String,
    pub pool: AnyPool,
    pub bind: BindStyle,
    pub options: QueryOptions,
}

static INSTALL_DRIVERS: Once = Once::new();

impl Database {
    /// Open a pool for the given definition.
    pub async fn open(name: &str, def: &DatabaseDef) -> DbResult<Self> {
        INSTALL_DRIVERS.call_once(sqlx::any::install_default_drivers);

        let mut opts = AnyPoolOptions::new();
        if def.max_open > 0 {
            opts = opts.max_connections(def.max_open);
        }
        if def.max_idle_time_seconds > 0 {
            opts = opts.idle_timeout(Duration::from_secs(def.max_idle_time_seconds));
        }
        if def.max_life_time_seconds > 0 {
            opts = opts.max_lifetime(Duration::from_secs(def.max_life_time_seconds));
        }

        let pool = opts.connect(&def.url).await.map_err(DbError::Open)?;
        info!(database = name, "opened database pool");

        Ok(Self {
            name: name.to_string(),
            pool,
            bind: BindStyle::from_url(&def.url),
            options: def.options,
        })
    }
}

/// All configured databases, keyed by name.
#[derive(Debug, Default)]
pub struct Databases {
    map: HashMap<String, Arc<Database>>,
}

impl Databases {
    /// Open every configured pool; any failure aborts startup.
    pub async fn open_all(defs: &HashMap<String, DatabaseDef>) -> DbResult<Self> {
        let mut map = HashMap::with_capacity(defs.len());
        for (name, def) in defs {
            let db = Database::open(name, def).await?;
            map.insert(name.clone(), Arc::new(db));
        }
        Ok(Self { map })
    }

    /// Register an already-open database (used by tests).
    pub fn insert(&mut self, db: Database) {
        self.map.insert(db.name.clone(), Arc::new(db));
    }

    pub fn get(&self, name: &str) -> DbResult<Arc<Database>> {
        self.map
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::UnknownDatabase(name.to_string()))
    }
}

/// Bind one value-model argument onto a query in driver terms.
///
/// Composites bind as their JSON serialization; integers wider than `i64`
/// bind as canonical decimal text.
pub fn bind_value<'q>(
    query: Query<'q, Any, AnyArguments<'q>>,
    value: &Value,
) -> Query<'q, Any, AnyArguments<'q>> {
    match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else if n.is_u64() {
                query.bind(n.to_string())
            } else if let Some(f) = n.as_f64() {
                query.bind(f)
            } else {
                query.bind(n.to_string())
            }
        }
        Value::String(s) => query.bind(s.clone()),
        composite => query.bind(composite.to_string()),
    }
}
