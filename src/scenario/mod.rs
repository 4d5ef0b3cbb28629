//! Scenario driver
//!
//! Scenarios are declared in YAML: resources to allocate, then a sequence of
//! labelled steps. The driver executes them against a live platform and
//! always releases what it allocated.

mod config;
mod context;
mod driver;
mod suite;

pub use config::*;
pub use context::ScenarioContext;
pub use driver::{ScenarioDriver, ScenarioReport, ScenarioState, StepFailure};
pub use suite::{collect_scenario_files, run_suite, SuiteReport};
