//! CLI command handling
//!
//! Dispatches CLI commands and formats their output. Returns `Ok(false)` when
//! the command ran but something it checked did not pass.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use colored::Colorize;

use crate::commands::Commands;
use crate::common::{Config, Result};
use crate::scenario::{collect_scenario_files, run_suite, Scenario, ScenarioDriver};

/// Dispatch a CLI command
pub async fn dispatch(command: Commands, config_path: Option<&Path>) -> Result<bool> {
    match command {
        Commands::Run { paths, jobs } => {
            let config = Config::load(config_path)?;
            config.validate()?;
            let jobs = jobs.unwrap_or(config.defaults.jobs);

            let scenarios = load_all(&paths)?;
            tracing::info!(
                api = %config.platform.api,
                scenarios = scenarios.len(),
                jobs,
                "running suite"
            );

            let driver = Arc::new(ScenarioDriver::new(Arc::new(config))?);
            let report = run_suite(driver, scenarios, jobs).await;
            report.print_summary();

            Ok(report.all_passed())
        }

        Commands::Validate { paths } => {
            let mut valid = true;
            for path in collect_scenario_files(&paths)? {
                match Scenario::load(&path) {
                    Ok(scenario) => println!(
                        "  {} {} ({}, {} steps)",
                        "✓".green(),
                        scenario.name,
                        path.display().to_string().dimmed(),
                        scenario.steps.len()
                    ),
                    Err(e) => {
                        valid = false;
                        println!("  {} {}", "✗".red(), e);
                    }
                }
            }
            Ok(valid)
        }

        Commands::Config => {
            let config = Config::load(config_path)?;
            print!("{}", config.to_toml()?);
            Ok(true)
        }
    }
}

/// Parse every scenario up front so a typo fails before anything is pushed
fn load_all(paths: &[PathBuf]) -> Result<Vec<Scenario>> {
    collect_scenario_files(paths)?
        .iter()
        .map(|path| Scenario::load(path))
        .collect()
}
