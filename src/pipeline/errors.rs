//! # Pipeline Errors
//!
//! Every pipeline failure is fatal to the request, triggers rollback of
//! all open transactions, and surfaces to the client as a 500. Details
//! stay in the logs.

use thiserror::Error;

use crate::db::DbError;
use crate::expr::ExprError;

/// Result type for pipeline evaluation
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Internal pipeline failures
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A declared transaction could not be opened
    #[error("error opening transactions: {0}")]
    Open(#[source] DbError),

    /// A path-reference argument named an absent parameter
    #[error("step {step} argument {index}: missing path parameter {name:?}")]
    MissingPathParam {
        step: usize,
        index: usize,
        name: String,
    },

    /// A query-reference argument named an absent parameter
    #[error("step {step} argument {index}: missing query parameter {name:?}")]
    MissingQueryParam {
        step: usize,
        index: usize,
        name: String,
    },

    /// An expression argument failed to evaluate
    #[error("step {step} argument {index}: {source}")]
    Arg {
        step: usize,
        index: usize,
        #[source]
        source: ExprError,
    },

    /// Query execution or row scanning failed
    #[error("step {step}: {source}")]
    Execute {
        step: usize,
        #[source]
        source: DbError,
    },

    /// The step's result mapping failed
    #[error("step {step} output mapping: {source}")]
    Map {
        step: usize,
        #[source]
        source: ExprError,
    },
}
