//! # Database Errors
//!
//! Error types for pool management, query execution, and row scanning.

use thiserror::Error;

/// Result type for database operations
pub type DbResult<T> = Result<T, DbError>;

/// Database errors
#[derive(Debug, Error)]
pub enum DbError {
    /// The connection pool could not be opened
    #[error("error opening database pool: {0}")]
    Open(#[source] sqlx::Error),

    /// A transaction could not be started at the requested isolation
    #[error("error beginning transaction: {0}")]
    Begin(#[source] sqlx::Error),

    /// Query execution failed
    #[error("error executing query: {0}")]
    Execute(#[source] sqlx::Error),

    /// A row column could not be decoded into the value model
    #[error("error scanning column {column:?}: {source}")]
    Scan {
        column: String,
        #[source]
        source: sqlx::Error,
    },

    /// Commit failed
    #[error("error committing transaction: {0}")]
    Commit(#[source] sqlx::Error),

    /// Rollback failed
    #[error("error rolling back transaction: {0}")]
    Rollback(#[source] sqlx::Error),

    /// Placeholder and argument counts disagree
    #[error("query expects {placeholders} argument(s), got {args}")]
    ArgCount { placeholders: usize, args: usize },

    /// A list argument expanded to zero placeholders
    #[error("empty list passed to argument {index}")]
    EmptyList { index: usize },

    /// A step referenced a transaction slot that does not exist
    #[error("no transaction at index {0}")]
    UnknownTransaction(usize),

    /// A transaction referenced a database name that is not configured
    #[error("no database named {0:?}")]
    UnknownDatabase(String),
}
