//! # Expression Errors
//!
//! Error types for expression compilation and evaluation.

use thiserror::Error;

/// Result type for expression operations
pub type ExprResult<T> = Result<T, ExprError>;

/// Expression compilation and evaluation errors
#[derive(Debug, Clone, Error)]
pub enum ExprError {
    /// The expression source failed to parse
    #[error("error parsing expression: {0}")]
    Parse(String),

    /// The expression parsed but references undefined names
    #[error("error compiling expression: {0}")]
    Compile(String),

    /// Evaluation produced no value
    #[error("no value returned by expression")]
    NoResult,

    /// Evaluation produced more than one value
    #[error("expression produced multiple values")]
    MultipleResults,

    /// Evaluation failed or produced an error value
    #[error("expression failed: {0}")]
    Eval(String),

    /// The evaluation task was aborted before completing
    #[error("expression evaluation was aborted")]
    Aborted,

    /// A chain stage failed; carries the failing index
    #[error("error in mapping {index}: {source}")]
    Mapping {
        index: usize,
        #[source]
        source: Box<ExprError>,
    },
}

impl ExprError {
    /// Attach a chain index to an evaluation error.
    pub fn at(self, index: usize) -> Self {
        ExprError::Mapping {
            index,
            source: Box::new(self),
        }
    }
}
