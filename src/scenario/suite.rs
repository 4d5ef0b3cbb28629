//! Suite runner
//!
//! Runs many scenarios with bounded parallelism. Scenarios share nothing but
//! the driver and its immutable configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use colored::Colorize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::common::{Error, Result};

use super::config::Scenario;
use super::driver::{ScenarioDriver, ScenarioReport};

/// Expand directories into the scenario files they contain
///
/// Files are taken as given. Directories contribute their `.yaml`/`.yml`
/// entries in name order; subdirectories are not searched.
pub fn collect_scenario_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for path in paths {
        if path.is_dir() {
            let mut found: Vec<PathBuf> = std::fs::read_dir(path)
                .map_err(|e| Error::FileRead {
                    path: path.display().to_string(),
                    error: e.to_string(),
                })?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && is_scenario_file(p))
                .collect();
            found.sort();
            files.extend(found);
        } else if path.exists() {
            files.push(path.clone());
        } else {
            return Err(Error::FileRead {
                path: path.display().to_string(),
                error: "no such file or directory".to_string(),
            });
        }
    }

    if files.is_empty() {
        return Err(Error::Config("no scenario files found".to_string()));
    }

    Ok(files)
}

fn is_scenario_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml" | "yml")
    )
}

/// Outcome of a whole suite
#[derive(Debug)]
pub struct SuiteReport {
    /// One report per scenario, in submission order
    pub reports: Vec<ScenarioReport>,
    pub duration: Duration,
}

impl SuiteReport {
    pub fn passed(&self) -> usize {
        self.reports.iter().filter(|r| r.passed).count()
    }

    pub fn failed(&self) -> usize {
        self.reports.len() - self.passed()
    }

    pub fn all_passed(&self) -> bool {
        self.reports.iter().all(|r| r.passed)
    }

    pub fn print_summary(&self) {
        println!();
        for report in &self.reports {
            let mark = if report.passed {
                "✓".green()
            } else {
                "✗".red()
            };
            println!("  {} {}", mark, report.name);
        }

        let headline = format!(
            "{} passed, {} failed in {:.1}s",
            self.passed(),
            self.failed(),
            self.duration.as_secs_f64()
        );
        if self.all_passed() {
            println!("\n{} {}\n", "✓".green().bold(), headline.green().bold());
        } else {
            println!("\n{} {}\n", "✗".red().bold(), headline.red().bold());
        }
    }
}

impl ScenarioReport {
    /// Print the outcome of one scenario
    pub fn print(&self) {
        println!(
            "\n{} {}",
            "Scenario:".blue().bold(),
            self.name.white().bold()
        );

        match &self.failure {
            None => println!(
                "  {} {} steps passed ({:.1}s)",
                "✓".green(),
                self.steps_total,
                self.duration.as_secs_f64()
            ),
            Some(failure) => {
                let at = if failure.index == 0 {
                    failure.label.clone()
                } else {
                    format!("Step {} ({})", failure.index, failure.label)
                };
                println!("  {} {}: {}", "✗".red(), at, failure.cause);
            }
        }

        if self.released > 0 {
            println!(
                "  {}",
                format!("released {} resource(s)", self.released).dimmed()
            );
        }
        for failure in &self.teardown_failures {
            println!("  {} {}", "!".yellow(), failure.yellow());
        }
    }
}

/// Run `scenarios` with at most `jobs` in flight
///
/// A scenario whose task dies is reported as failed; the rest keep running.
pub async fn run_suite(
    driver: Arc<ScenarioDriver>,
    scenarios: Vec<Scenario>,
    jobs: usize,
) -> SuiteReport {
    let started = Instant::now();
    let permits = Arc::new(Semaphore::new(jobs.max(1)));
    let mut set = JoinSet::new();
    let mut slots: Vec<Option<ScenarioReport>> = Vec::with_capacity(scenarios.len());
    let mut pending = Vec::with_capacity(scenarios.len());

    for (index, scenario) in scenarios.into_iter().enumerate() {
        slots.push(None);
        pending.push((scenario.name.clone(), scenario.steps.len()));

        let driver = Arc::clone(&driver);
        let permits = Arc::clone(&permits);
        set.spawn(async move {
            let report = match permits.acquire_owned().await {
                Ok(_permit) => driver.run(&scenario).await,
                Err(_) => ScenarioReport::aborted(
                    &scenario.name,
                    scenario.steps.len(),
                    Error::Internal("scenario pool closed".to_string()),
                ),
            };
            (index, report)
        });
    }

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, report)) => {
                report.print();
                slots[index] = Some(report);
            }
            Err(e) => tracing::error!("scenario task failed: {}", e),
        }
    }

    let reports = slots
        .into_iter()
        .zip(pending)
        .map(|(slot, (name, steps_total))| {
            slot.unwrap_or_else(|| {
                let report = ScenarioReport::aborted(
                    &name,
                    steps_total,
                    Error::Internal("scenario task panicked".to_string()),
                );
                report.print();
                report
            })
        })
        .collect();

    SuiteReport {
        reports,
        duration: started.elapsed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_expands_directories_in_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.yaml", "a.yml", "notes.txt"] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested").join("c.yaml"), "").unwrap();
        let single = dir.path().join("notes.txt");

        let files = collect_scenario_files(&[dir.path().to_path_buf(), single.clone()]).unwrap();

        assert_eq!(
            files,
            vec![dir.path().join("a.yml"), dir.path().join("b.yaml"), single]
        );
    }

    #[test]
    fn test_collect_rejects_missing_and_empty() {
        let dir = tempfile::tempdir().unwrap();
        let err = collect_scenario_files(&[dir.path().join("missing.yaml")]).unwrap_err();
        assert!(matches!(err, Error::FileRead { .. }));

        let err = collect_scenario_files(&[dir.path().to_path_buf()]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_suite_counts() {
        let report = SuiteReport {
            reports: vec![
                ScenarioReport::aborted("a", 2, Error::Internal("boom".into())),
                ScenarioReport {
                    passed: true,
                    failure: None,
                    ..ScenarioReport::aborted("b", 1, Error::Internal("unused".into()))
                },
            ],
            duration: Duration::from_secs(1),
        };
        assert_eq!(report.passed(), 1);
        assert_eq!(report.failed(), 1);
        assert!(!report.all_passed());
    }
}

#[cfg(all(test, unix))]
mod suite_tests {
    use super::*;
    use crate::common::Config;
    use crate::exec::CommandRunner;
    use crate::platform::{AppClient, ControlPlane};

    fn driver() -> Arc<ScenarioDriver> {
        let config = Arc::new(Config::default());
        let cf = ControlPlane::new(CommandRunner::new("sh"), Duration::from_secs(5));
        let app = AppClient::new(&config).unwrap();
        Arc::new(ScenarioDriver::with_parts(config, cf, app))
    }

    fn scenario(name: &str, script: &str) -> Scenario {
        Scenario::from_yaml(&format!(
            "name: {}\nsteps:\n  - action: cf\n    args: [-c, \"{}\"]\n",
            name, script
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_reports_keep_submission_order() {
        let scenarios = vec![
            scenario("slow", "sleep 0.3"),
            scenario("fails", "exit 3"),
            scenario("fast", "true"),
        ];

        let suite = run_suite(driver(), scenarios, 3).await;

        let names: Vec<_> = suite.reports.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["slow", "fails", "fast"]);
        assert_eq!(suite.passed(), 2);
        assert!(!suite.reports[1].passed);
    }

    #[tokio::test]
    async fn test_jobs_bound_parallelism() {
        let scenarios = (0..4)
            .map(|i| scenario(&format!("s{}", i), "sleep 0.2"))
            .collect();

        let started = Instant::now();
        let suite = run_suite(driver(), scenarios, 2).await;

        assert!(suite.all_passed());
        assert!(started.elapsed() >= Duration::from_millis(400));
    }
}
