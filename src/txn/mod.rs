//! # Transaction Manager
//!
//! Opens the set of transactions an endpoint declares, routes each step's
//! query to its transaction, and finalizes every handle exactly once at
//! request termination: commit on success, rollback on any failure.
//!
//! Finalization runs in declaration order and each transaction is settled
//! independently. There is no two-phase commit: a commit failure on one
//! transaction does not prevent the remaining commits, so cross-database
//! atomicity is not guaranteed.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use sqlx::{Any, AnyPool, Transaction};
use tokio::time::timeout;
use tracing::warn;

use crate::config::TransactionDef;
use crate::db::{bind, bind_value, scan, Database, Databases, DbError, DbResult};

/// Deadline for rollback on the failure path. Rollback gets a fresh bounded
/// window so it can complete even after the client disconnected.
const ROLLBACK_DEADLINE: Duration = Duration::from_secs(10);

/// A step executor: either a real transaction or, for `isolation: none`,
/// the bare pool.
enum Handle {
    Pool(AnyPool),
    Tx(Transaction<'static, Any>),
}

struct TxnState {
    handle: Handle,
    db: Arc<Database>,
}

/// All transactions opened for one request, in declaration order.
///
/// Owned exclusively by the request; consumed by [`TxnSet::commit_all`] or
/// [`TxnSet::rollback_all`]. If the request future is dropped mid-flight,
/// the driver rolls the handles back when their connections are reclaimed.
pub struct TxnSet {
    txns: Vec<TxnState>,
}

impl TxnSet {
    /// Begin every declared transaction. On a begin failure the already
    /// opened transactions are rolled back before the error returns.
    pub async fn open(defs: &[TransactionDef], dbs: &Databases) -> DbResult<Self> {
        let mut txns = Vec::with_capacity(defs.len());
        for def in defs {
            let db = match dbs.get(&def.db) {
                Ok(db) => db,
                Err(e) => {
                    Self { txns }.rollback_all().await;
                    return Err(e);
                }
            };
            let handle = if def.isolation.requires_transaction() {
                match begin(&db, def).await {
                    Ok(tx) => Handle::Tx(tx),
                    Err(e) => {
                        Self { txns }.rollback_all().await;
                        return Err(e);
                    }
                }
            } else {
                Handle::Pool(db.pool.clone())
            };
            txns.push(TxnState { handle, db });
        }
        Ok(Self { txns })
    }

    /// Execute a parameterized query on the transaction at `index`,
    /// expanding list arguments and rewriting placeholders for the
    /// database's driver, and scan the result set into the value model.
    pub async fn execute(&mut self, index: usize, sql: &str, args: &[Value]) -> DbResult<Value> {
        let state = self
            .txns
            .get_mut(index)
            .ok_or(DbError::UnknownTransaction(index))?;

        let (sql, flat) = bind::expand(sql, args, state.db.bind)?;
        let mut query = sqlx::query(&sql);
        for value in &flat {
            query = bind_value(query, value);
        }

        let rows = match &mut state.handle {
            Handle::Pool(pool) => query.fetch_all(&*pool).await,
            Handle::Tx(tx) => query.fetch_all(&mut **tx).await,
        }
        .map_err(DbError::Execute)?;

        scan::scan_rows(&rows, &state.db.options)
    }

    /// Commit every transaction in declaration order. Commit errors are
    /// logged and do not change the request outcome; later transactions
    /// are still committed.
    pub async fn commit_all(self) {
        for (i, state) in self.txns.into_iter().enumerate() {
            if let Handle::Tx(tx) = state.handle {
                if let Err(e) = tx.commit().await {
                    warn!(
                        transaction = i,
                        database = %state.db.name,
                        error = %DbError::Commit(e),
                        "transaction finalization failed"
                    );
                }
            }
        }
    }

    /// Roll back every transaction in declaration order, each under a
    /// fresh deadline. Errors are logged; the primary outcome stands.
    pub async fn rollback_all(self) {
        for (i, state) in self.txns.into_iter().enumerate() {
            if let Handle::Tx(tx) = state.handle {
                match timeout(ROLLBACK_DEADLINE, tx.rollback()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(
                        transaction = i,
                        database = %state.db.name,
                        error = %DbError::Rollback(e),
                        "transaction rollback failed"
                    ),
                    Err(_) => warn!(
                        transaction = i,
                        database = %state.db.name,
                        "transaction rollback timed out"
                    ),
                }
            }
        }
    }
}

async fn begin(db: &Database, def: &TransactionDef) -> DbResult<Transaction<'static, Any>> {
    let mut tx = db.pool.begin().await.map_err(DbError::Begin)?;
    if let Some(phrase) = def.isolation.sql_phrase() {
        let stmt = format!("SET TRANSACTION ISOLATION LEVEL {phrase}");
        sqlx::query(&stmt)
            .execute(&mut *tx)
            .await
            .map_err(DbError::Begin)?;
    }
    Ok(tx)
}
