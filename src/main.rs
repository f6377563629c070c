//! chisel entry point
//!
//! Parses arguments and dispatches to the CLI; subsystems are never
//! called directly from here.

use std::process;

use clap::Parser;

use chisel::cli::{run, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("chisel: {e}");
        process::exit(1);
    }
}
