//! Scenario definition types
//!
//! Scenarios are usually loaded from YAML files but can be built in code
//! with the same types.

use std::path::Path;

use serde::Deserialize;

use crate::common::{Error, Result};
use crate::platform::InstanceState;
use crate::resources::ResourceKind;

/// A complete scenario
#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    /// Name of the scenario
    pub name: String,
    /// Optional description of what the scenario verifies
    pub description: Option<String>,
    /// Fetch an oauth token into `${token}` during setup
    #[serde(default)]
    pub token: bool,
    /// Resources to allocate before the first step
    #[serde(default)]
    pub resources: Vec<ResourceSpec>,
    /// The sequence of steps to execute
    pub steps: Vec<Step>,
}

/// A resource allocated during setup
#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct ResourceSpec {
    /// Variable the generated name is bound to
    pub alias: String,
    #[serde(default = "default_kind")]
    pub kind: ResourceKind,
    /// Name prefix; the configured default when absent
    pub prefix: Option<String>,
}

fn default_kind() -> ResourceKind {
    ResourceKind::App
}

/// A single labelled step
#[derive(Deserialize, Debug, Clone)]
pub struct Step {
    /// Human-readable intent, used only in reports
    pub label: Option<String>,
    #[serde(flatten)]
    pub action: StepAction,
}

/// What a step does
#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "action", rename_all = "snake_case", deny_unknown_fields)]
pub enum StepAction {
    /// Run a control-plane command and check how it exited
    Cf {
        args: Vec<String>,
        /// Timeout in seconds
        timeout: Option<u64>,
        #[serde(default)]
        expect: CommandExpectation,
    },
    /// Run a control-plane command and store its output in a variable
    Capture {
        args: Vec<String>,
        into: String,
        #[serde(default)]
        extract: CaptureTarget,
        /// Also record the captured guid for teardown as this kind
        register: Option<ResourceKind>,
        timeout: Option<u64>,
    },
    /// Repeat a control-plane command until its output matches `pattern`
    PollCommand {
        args: Vec<String>,
        pattern: String,
        timeout: Option<u64>,
        /// Interval in milliseconds
        interval: Option<u64>,
    },
    /// GET a path on the app's route until the body contains `contains`
    PollHttp {
        app: String,
        #[serde(default = "default_path")]
        path: String,
        contains: String,
        timeout: Option<u64>,
        interval: Option<u64>,
    },
    /// Tail the app's logs until `contains` appears
    PollLogs {
        app: String,
        contains: String,
        /// Stream `cf logs` instead of re-reading `cf logs --recent`
        #[serde(default)]
        follow: bool,
        timeout: Option<u64>,
        interval: Option<u64>,
    },
    /// Fetch a process stats document until an instance is (or is not) in `state`
    PollInstanceState {
        path: String,
        #[serde(default)]
        index: usize,
        state: InstanceState,
        #[serde(default)]
        negate: bool,
        timeout: Option<u64>,
        interval: Option<u64>,
    },
    /// Fetch a process stats document once and require an exact state
    AssertInstanceState {
        path: String,
        #[serde(default)]
        index: usize,
        state: InstanceState,
    },
}

fn default_path() -> String {
    "/".to_string()
}

/// Which part of a command's output a capture step keeps
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CaptureTarget {
    /// The whole output, trimmed
    #[default]
    Output,
    /// `guid` of a single v3 resource document
    Guid,
    /// Guid of the `web` process in a v3 process list
    ProcessGuid,
}

/// Expectations for a command step
#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct CommandExpectation {
    /// Required exit code; `~` accepts any
    #[serde(default = "default_exit_code")]
    pub exit_code: Option<i32>,
    /// Substring that must appear in stdout or stderr
    pub output_contains: Option<String>,
}

impl Default for CommandExpectation {
    fn default() -> Self {
        Self {
            exit_code: default_exit_code(),
            output_contains: None,
        }
    }
}

fn default_exit_code() -> Option<i32> {
    Some(0)
}

impl Scenario {
    /// Load and parse a scenario file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::from_yaml(&content).map_err(|e| {
            Error::Config(format!("Failed to parse scenario '{}': {}", path.display(), e))
        })
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let scenario: Scenario = serde_yaml::from_str(content)?;
        scenario.check()?;
        Ok(scenario)
    }

    /// Structural checks that YAML typing cannot express
    pub fn check(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(Error::Config(format!("scenario '{}' has no steps", self.name)));
        }
        for (i, declared) in self.resources.iter().enumerate() {
            if declared.alias.is_empty() {
                return Err(Error::Config(format!("resource {} has an empty alias", i + 1)));
            }
            if self.resources[..i].iter().any(|r| r.alias == declared.alias) {
                return Err(Error::Config(format!(
                    "resource alias '{}' declared twice",
                    declared.alias
                )));
            }
            if matches!(declared.kind, ResourceKind::Package | ResourceKind::Droplet) {
                return Err(Error::Config(format!(
                    "resource '{}': {} guids are assigned by the platform; \
                     capture one with `register: {}` instead",
                    declared.alias, declared.kind, declared.kind
                )));
            }
        }
        for (i, step) in self.steps.iter().enumerate() {
            let args = match &step.action {
                StepAction::Cf { args, .. }
                | StepAction::Capture { args, .. }
                | StepAction::PollCommand { args, .. } => args,
                _ => continue,
            };
            if args.is_empty() {
                return Err(Error::Config(format!("step {} has no command arguments", i + 1)));
            }
        }
        Ok(())
    }
}

impl Step {
    /// Label for reports, derived from the action when none was given
    pub fn label(&self) -> String {
        if let Some(label) = &self.label {
            return label.clone();
        }
        match &self.action {
            StepAction::Cf { args, .. } => format!("cf {}", args.join(" ")),
            StepAction::Capture { args, into, .. } => {
                format!("capture '{}' from cf {}", into, args.join(" "))
            }
            StepAction::PollCommand { args, pattern, .. } => {
                format!("cf {} until /{}/", args.join(" "), pattern)
            }
            StepAction::PollHttp { app, path, contains, .. } => {
                format!("GET {}{} until '{}'", app, path, contains)
            }
            StepAction::PollLogs { app, contains, .. } => {
                format!("logs of {} until '{}'", app, contains)
            }
            StepAction::PollInstanceState {
                path,
                index,
                state,
                negate,
                ..
            } => format!(
                "instance {} of {} {} {}",
                index,
                path,
                if *negate { "leaves" } else { "reaches" },
                state
            ),
            StepAction::AssertInstanceState { path, index, state } => {
                format!("instance {} of {} is {}", index, path, state)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TERMINATE: &str = r#"
name: terminating an instance
description: the platform restarts a deleted instance
token: true
resources:
  - alias: app
steps:
  - action: cf
    label: pushing it
    args: [push, "${app}", --no-start]
    timeout: 120
  - action: capture
    args: [app, "${app}", --guid]
    into: app_guid
  - action: cf
    label: terminating the instance
    args: [curl, "/v3/apps/${app_guid}/processes/web/instances/0", -X, DELETE]
    expect:
      exit_code: ~
  - action: poll_instance_state
    label: ensuring the instance is no longer running
    path: /v3/apps/${app_guid}/processes/web/stats
    state: RUNNING
    negate: true
    timeout: 35
  - action: assert_instance_state
    path: /v3/apps/${app_guid}/processes/web/stats
    state: RUNNING
"#;

    #[test]
    fn test_parse_scenario() {
        let scenario = Scenario::from_yaml(TERMINATE).unwrap();
        assert_eq!(scenario.name, "terminating an instance");
        assert!(scenario.token);
        assert_eq!(scenario.resources[0].kind, ResourceKind::App);
        assert_eq!(scenario.steps.len(), 5);

        match &scenario.steps[0].action {
            StepAction::Cf { args, timeout, expect } => {
                assert_eq!(args[0], "push");
                assert_eq!(*timeout, Some(120));
                assert_eq!(expect.exit_code, Some(0));
            }
            other => panic!("Expected Cf step, got {:?}", other),
        }

        match &scenario.steps[2].action {
            StepAction::Cf { expect, .. } => assert_eq!(expect.exit_code, None),
            other => panic!("Expected Cf step, got {:?}", other),
        }

        match &scenario.steps[3].action {
            StepAction::PollInstanceState { state, negate, index, .. } => {
                assert_eq!(*state, InstanceState::Running);
                assert!(*negate);
                assert_eq!(*index, 0);
            }
            other => panic!("Expected PollInstanceState step, got {:?}", other),
        }
    }

    #[test]
    fn test_step_labels() {
        let scenario = Scenario::from_yaml(TERMINATE).unwrap();
        assert_eq!(scenario.steps[0].label(), "pushing it");
        assert_eq!(
            scenario.steps[1].label(),
            "capture 'app_guid' from cf app ${app} --guid"
        );
        assert!(scenario.steps[4].label().ends_with("is RUNNING"));
    }

    #[test]
    fn test_rejects_unknown_action() {
        let err = Scenario::from_yaml(
            "name: x\nsteps:\n  - action: teleport\n    args: [a]\n",
        )
        .unwrap_err();
        assert!(matches!(err, Error::Yaml(_)));
    }

    #[test]
    fn test_rejects_misspelled_step_field() {
        let err = Scenario::from_yaml(
            "name: x\nsteps:\n  - action: cf\n    args: [apps]\n    timout: 5\n",
        )
        .unwrap_err();
        assert!(matches!(err, Error::Yaml(_)));
        assert!(err.to_string().contains("timout"));
    }

    #[test]
    fn test_parse_capture_target_and_register() {
        let scenario = Scenario::from_yaml(
            r#"
name: x
steps:
  - action: capture
    label: uploading a package
    args: [curl, /v3/packages, -X, POST]
    into: package
    extract: guid
    register: package
  - action: capture
    args: [curl, "/v3/apps/${app_guid}/processes"]
    into: process_guid
    extract: process_guid
"#,
        )
        .unwrap();

        match &scenario.steps[0].action {
            StepAction::Capture { extract, register, .. } => {
                assert_eq!(*extract, CaptureTarget::Guid);
                assert_eq!(*register, Some(ResourceKind::Package));
            }
            other => panic!("Expected Capture step, got {:?}", other),
        }
        assert_eq!(scenario.steps[0].label(), "uploading a package");
        match &scenario.steps[1].action {
            StepAction::Capture { extract, register, .. } => {
                assert_eq!(*extract, CaptureTarget::ProcessGuid);
                assert_eq!(*register, None);
            }
            other => panic!("Expected Capture step, got {:?}", other),
        }

        let scenario = Scenario::from_yaml(TERMINATE).unwrap();
        match &scenario.steps[1].action {
            StepAction::Capture { extract, .. } => assert_eq!(*extract, CaptureTarget::Output),
            other => panic!("Expected Capture step, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_declared_package() {
        let err = Scenario::from_yaml(
            "name: x\nresources:\n  - alias: pkg\n    kind: package\nsteps:\n  - action: cf\n    args: [apps]\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("register: package"));
    }

    #[test]
    fn test_rejects_duplicate_alias() {
        let err = Scenario::from_yaml(
            "name: x\nresources:\n  - alias: app\n  - alias: app\nsteps:\n  - action: cf\n    args: [apps]\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("declared twice"));
    }

    #[test]
    fn test_rejects_empty_steps() {
        assert!(Scenario::from_yaml("name: x\nsteps: []\n").is_err());
    }

    #[test]
    fn test_load_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        std::fs::write(&path, "name: [").unwrap();
        let err = Scenario::load(&path).unwrap_err();
        assert!(err.to_string().contains("broken.yaml"));
    }
}
