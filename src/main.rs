//! Cloud Foundry acceptance harness
//!
//! Runs declarative acceptance scenarios against a Cloud Foundry deployment
//! through the `cf` CLI.

use std::path::PathBuf;

use cats::commands::Commands;
use cats::common::logging;
use clap::Parser;

#[derive(Parser)]
#[command(name = "cats", about = "Cloud Foundry acceptance harness")]
#[command(version, long_about = None)]
struct Cli {
    /// Configuration file (default: $CATS_CONFIG, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug-level harness logs
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Also append logs to the log file in the data directory
    #[arg(long, global = true)]
    log_file: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let guard = logging::init(cli.verbose, cli.log_file);
    if let Some(path) = &guard.log_file {
        tracing::debug!("logging to {}", path.display());
    }

    let result = cats::cli::dispatch(cli.command, cli.config.as_deref()).await;

    match result {
        Ok(true) => {}
        Ok(false) => {
            drop(guard);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Error: {e}");
            drop(guard);
            std::process::exit(1);
        }
    }
}
