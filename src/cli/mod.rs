//! # CLI
//!
//! Command definitions and dispatch: `serve` runs the configured HTTP
//! frontend, `check` validates a config file and prints the parsed form
//! (compiled expressions render back to their sources).

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::config::{Config, ConfigError};
use crate::db::{Databases, DbError};
use crate::server::{self, ServerError};

/// chisel - A tool to fetch, transform, and serve data
#[derive(Parser, Debug)]
#[command(name = "chisel")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log level filter (overridden by RUST_LOG when set)
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP frontend
    Serve {
        /// Path to the program config JSON
        #[arg(short, long, default_value = "config.json")]
        config: PathBuf,
    },

    /// Validate a config file and print the parsed form
    Check {
        /// Path to the program config JSON
        #[arg(short, long, default_value = "config.json")]
        config: PathBuf,
    },
}

/// CLI errors
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error("error printing config: {0}")]
    Print(#[from] serde_json::Error),
}

/// Initialize logging and run the selected command.
pub async fn run(cli: Cli) -> Result<(), CliError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Command::Serve { config } => {
            let conf = Config::load(&config)?;
            conf.validate()?;
            let dbs = Databases::open_all(&conf.databases).await?;
            server::serve(conf, Arc::new(dbs)).await?;
            Ok(())
        }
        Command::Check { config } => {
            let conf = Config::load(&config)?;
            conf.validate()?;
            println!("{}", serde_json::to_string_pretty(&conf)?);
            Ok(())
        }
    }
}
