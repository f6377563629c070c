//! # Server Errors
//!
//! Startup and listener errors for the HTTP layer.

use thiserror::Error;

/// Result type for server operations
pub type ServerResult<T> = Result<T, ServerError>;

/// HTTP server errors
#[derive(Debug, Error)]
pub enum ServerError {
    /// An endpoint declared an HTTP method the router cannot serve
    #[error("endpoint {path:?} has unsupported method {method:?}")]
    Method { method: String, path: String },

    /// A listen address could not be bound
    #[error("error binding to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The listener failed while serving
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}
