//! # Config Errors
//!
//! Error types for configuration loading and validation.

use thiserror::Error;

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration errors, surfaced at startup before any request runs
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read
    #[error("error reading config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid JSON for the config shape
    #[error("error parsing config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// One or more structural violations; every problem is listed
    #[error("config validation failed: {}", .problems.join("; "))]
    Validation { problems: Vec<String> },
}
