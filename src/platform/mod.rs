//! Adapters for the platform under test
//!
//! Everything the harness knows about Cloud Foundry lives here: the CLI
//! verbs, the shape of API documents and how to reach an app's route.

pub mod api;
mod app;
mod cf;

pub use api::{InstanceState, ProcessStats};
pub use app::AppClient;
pub use cf::{expect_success, CfTeardown, ControlPlane};
