//! CLI command definitions
//!
//! Defines the clap commands for the acceptance harness.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run scenario files against the configured platform
    Run {
        /// Scenario files or directories of them
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Maximum number of scenarios in flight (default from config)
        #[arg(long, short)]
        jobs: Option<usize>,
    },

    /// Parse scenario files without touching the platform
    Validate {
        /// Scenario files or directories of them
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Print the effective configuration
    Config,
}
