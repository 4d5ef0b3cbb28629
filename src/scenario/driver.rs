//! Scenario driver
//!
//! Runs the steps of one scenario in order and always tears down what the
//! scenario allocated. A scenario moves through
//! `Setup -> Running(step) -> Passed | Failed(step) -> TornDown`.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use regex::Regex;

use crate::common::{Config, Error, Result};
use crate::exec::CommandInvocation;
use crate::platform::api::{decode, Process, ResourceList, ResourceRef};
use crate::platform::{expect_success, AppClient, CfTeardown, ControlPlane, InstanceState};
use crate::poll::{poll, tail_snapshots_until, tail_until, PollBudget};
use crate::resources::{ResourceKind, ResourceManager};

use super::config::{CaptureTarget, CommandExpectation, Scenario, Step, StepAction};
use super::context::ScenarioContext;

/// Where a scenario is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioState {
    Setup,
    /// Running the step with this 1-based index
    Running(usize),
    Passed,
    /// Failed at this step; 0 means during setup
    Failed(usize),
    TornDown,
}

/// Why a scenario failed
#[derive(Debug)]
pub struct StepFailure {
    /// 1-based step index, 0 for setup
    pub index: usize,
    pub label: String,
    pub cause: Error,
}

/// Outcome of one scenario run
#[derive(Debug)]
pub struct ScenarioReport {
    pub name: String,
    pub passed: bool,
    pub steps_run: usize,
    pub steps_total: usize,
    pub failure: Option<StepFailure>,
    /// Every state the scenario went through, in order
    pub states: Vec<ScenarioState>,
    pub released: usize,
    pub teardown_failures: Vec<String>,
    pub duration: Duration,
}

impl ScenarioReport {
    /// Report for a scenario that could not be run at all
    pub fn aborted(name: &str, steps_total: usize, cause: Error) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            steps_run: 0,
            steps_total,
            failure: Some(StepFailure {
                index: 0,
                label: "run scenario".to_string(),
                cause,
            }),
            states: vec![ScenarioState::Setup, ScenarioState::Failed(0)],
            released: 0,
            teardown_failures: Vec::new(),
            duration: Duration::ZERO,
        }
    }
}

/// Executes scenarios against one platform
pub struct ScenarioDriver {
    config: Arc<Config>,
    cf: ControlPlane,
    app: AppClient,
}

impl ScenarioDriver {
    /// Build a driver from configuration
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let cf = ControlPlane::from_config(&config)?;
        let app = AppClient::new(&config)?;
        Ok(Self::with_parts(config, cf, app))
    }

    pub fn with_parts(config: Arc<Config>, cf: ControlPlane, app: AppClient) -> Self {
        Self { config, cf, app }
    }

    /// Run one scenario to completion, teardown included
    ///
    /// Never returns an error: every failure ends up in the report.
    pub async fn run(&self, scenario: &Scenario) -> ScenarioReport {
        let started = Instant::now();
        let steps_total = scenario.steps.len();
        let mut states = vec![ScenarioState::Setup];
        let mut ctx = ScenarioContext::new(&self.config);
        let mut resources = ResourceManager::new(CfTeardown::new(
            self.cf.clone(),
            self.config.platform.apps_domain.clone(),
        ));

        tracing::info!(scenario = %scenario.name, "starting scenario");

        let mut steps_run = 0;
        let mut failure = match self.setup(scenario, &mut ctx, &mut resources).await {
            Ok(()) => None,
            Err(cause) => Some(StepFailure {
                index: 0,
                label: "setup".to_string(),
                cause,
            }),
        };

        if failure.is_none() {
            for (i, step) in scenario.steps.iter().enumerate() {
                let index = i + 1;
                states.push(ScenarioState::Running(index));
                steps_run = index;
                let label = step.label();
                tracing::info!(scenario = %scenario.name, step = index, "{}", label);

                let outcome = AssertUnwindSafe(self.execute_step(step, &mut ctx, &mut resources))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| {
                        Err(Error::Internal(format!("step panicked: {}", panic_message(&*panic))))
                    });

                if let Err(cause) = outcome {
                    tracing::warn!(scenario = %scenario.name, step = index, "step failed: {}", cause);
                    failure = Some(StepFailure { index, label, cause });
                    break;
                }
            }
        }

        states.push(match &failure {
            None => ScenarioState::Passed,
            Some(f) => ScenarioState::Failed(f.index),
        });

        if failure.is_some() {
            for resource in ctx.resources().filter(|r| r.kind == ResourceKind::App) {
                self.cf.app_report(&resource.name).await;
            }
        }

        resources.release_all().await;
        states.push(ScenarioState::TornDown);

        ScenarioReport {
            name: scenario.name.clone(),
            passed: failure.is_none(),
            steps_run,
            steps_total,
            failure,
            states,
            released: resources.released_count(),
            teardown_failures: resources
                .take_failures()
                .into_iter()
                .map(|e| e.to_string())
                .collect(),
            duration: started.elapsed(),
        }
    }

    async fn setup(
        &self,
        scenario: &Scenario,
        ctx: &mut ScenarioContext,
        resources: &mut ResourceManager<CfTeardown>,
    ) -> Result<()> {
        for declared in &scenario.resources {
            let prefix = declared
                .prefix
                .as_deref()
                .unwrap_or(&self.config.defaults.name_prefix);
            let resource = resources.register(declared.kind, prefix);
            tracing::debug!(alias = %declared.alias, name = %resource.name, "allocated resource");
            ctx.bind_resource(&declared.alias, resource);
        }

        if scenario.token {
            let token = self.cf.oauth_token().await?;
            ctx.set_auth_token(token);
        }

        Ok(())
    }

    fn budget(
        &self,
        interval_ms: Option<u64>,
        timeout_secs: Option<u64>,
        default_timeout: Duration,
    ) -> PollBudget {
        PollBudget::new(
            interval_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| self.config.timeouts.poll_interval()),
            timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(default_timeout),
        )
    }

    /// Default wait for a command; staging verbs get the push timeout
    fn command_timeout(&self, args: &[String], explicit: Option<u64>) -> Duration {
        if let Some(secs) = explicit {
            return Duration::from_secs(secs);
        }
        match args.first().map(String::as_str) {
            Some("push" | "start" | "restart" | "restage") => self.config.timeouts.push_timeout(),
            _ => self.config.timeouts.default_timeout(),
        }
    }

    async fn execute_step(
        &self,
        step: &Step,
        ctx: &mut ScenarioContext,
        resources: &mut ResourceManager<CfTeardown>,
    ) -> Result<()> {
        let default_timeout = self.config.timeouts.default_timeout();

        match &step.action {
            StepAction::Cf {
                args,
                timeout,
                expect,
            } => {
                let args = ctx.expand_all(args)?;
                let timeout = self.command_timeout(&args, *timeout);
                let invocation = self.cf.run(&args, timeout).await?;
                check_command(&invocation, expect)
            }

            StepAction::Capture {
                args,
                into,
                extract: target,
                register,
                timeout,
            } => {
                let args = ctx.expand_all(args)?;
                let timeout = self.command_timeout(&args, *timeout);
                let invocation = self.cf.run(&args, timeout).await?;
                expect_success(&invocation)?;
                let value = extract(&invocation.stdout(), *target)?;
                tracing::debug!(variable = %into, %value, "captured value");
                match register {
                    Some(kind) => {
                        let resource = resources.adopt(*kind, value);
                        ctx.bind_resource(into, resource);
                    }
                    None => ctx.capture(into, value),
                }
                Ok(())
            }

            StepAction::PollCommand {
                args,
                pattern,
                timeout,
                interval,
            } => {
                let args = ctx.expand_all(args)?;
                let pattern = ctx.expand(pattern)?;
                let regex = Regex::new(&pattern)
                    .map_err(|e| Error::Config(format!("invalid pattern '{}': {}", pattern, e)))?;
                let budget = self.budget(*interval, *timeout, default_timeout);
                let command_timeout = self.command_timeout(&args, None);
                let (cf, command) = (&self.cf, &args);

                poll(
                    budget,
                    || async move {
                        let inv = cf.run(command, command_timeout).await?;
                        Ok(inv.stdout_str())
                    },
                    |out: &String| regex.is_match(out),
                )
                .await
                .into_result(&format!("cf {}", args.join(" ")))
                .map(|_| ())
            }

            StepAction::PollHttp {
                app,
                path,
                contains,
                timeout,
                interval,
            } => {
                let app = ctx.expand(app)?;
                let path = ctx.expand(path)?;
                let contains = ctx.expand(contains)?;
                let budget = self.budget(*interval, *timeout, default_timeout);

                poll(
                    budget,
                    || self.app.curl(&app, &path),
                    |body: &String| body.contains(&contains),
                )
                .await
                .into_result(&format!("GET {}", self.app.app_url(&app, &path)))
                .map(|_| ())
            }

            StepAction::PollLogs {
                app,
                contains,
                follow,
                timeout,
                interval,
            } => {
                let app = ctx.expand(app)?;
                let contains = ctx.expand(contains)?;
                let budget = self.budget(*interval, *timeout, default_timeout);
                let operation = format!("logs of {}", app);

                let result = if *follow {
                    let mut stream = self.cf.stream_logs(&app)?;
                    let mut consumed = 0;
                    let result = tail_until(ctx.log_tail(&app), &contains, budget, || {
                        let fresh = stream.stdout_since(consumed);
                        consumed += fresh.len();
                        async move { Ok(fresh) }
                    })
                    .await;
                    if let Err(e) = stream.kill().await {
                        tracing::debug!("log stream for {} already gone: {}", app, e);
                    }
                    result
                } else {
                    tail_snapshots_until(ctx.log_tail(&app), &contains, budget, || {
                        self.cf.recent_logs(&app)
                    })
                    .await
                };

                result.into_result(&operation).map(|_| ())
            }

            StepAction::PollInstanceState {
                path,
                index,
                state,
                negate,
                timeout,
                interval,
            } => {
                let path = ctx.expand(path)?;
                let budget = self.budget(
                    *interval,
                    *timeout,
                    self.config.timeouts.reconcile_timeout(),
                );
                let (expected, negate, index) = (*state, *negate, *index);
                let (cf, stats_path) = (&self.cf, &path);

                poll(
                    budget,
                    || async move {
                        let stats = cf.process_stats(stats_path).await?;
                        stats.instance_state(index)
                    },
                    |observed: &InstanceState| (*observed == expected) != negate,
                )
                .await
                .into_result(&format!(
                    "instance {} of {} {} {}",
                    index,
                    path,
                    if negate { "leaving" } else { "reaching" },
                    expected
                ))
                .map(|_| ())
            }

            StepAction::AssertInstanceState { path, index, state } => {
                let path = ctx.expand(path)?;
                let observed = self.cf.process_stats(&path).await?.instance_state(*index)?;
                if observed != *state {
                    return Err(Error::unexpected(
                        format!("instance {} to be {}", index, state),
                        observed.to_string(),
                    ));
                }
                Ok(())
            }
        }
    }
}

fn check_command(invocation: &CommandInvocation, expect: &CommandExpectation) -> Result<()> {
    if let Some(expected) = expect.exit_code {
        let actual = invocation.exit_code();
        if actual != Some(expected) {
            return Err(Error::unexpected(
                format!("'{}' to exit {}", invocation.command_line(), expected),
                format!(
                    "exit code {}: {}",
                    actual.map(|c| c.to_string()).unwrap_or_else(|| "none".into()),
                    invocation.output_tail(5)
                ),
            ));
        }
    }

    if let Some(needle) = &expect.output_contains {
        let output = format!("{}{}", invocation.stdout_str(), invocation.stderr_str());
        if !output.contains(needle.as_str()) {
            return Err(Error::unexpected(
                format!("output containing '{}'", needle),
                invocation.output_tail(5),
            ));
        }
    }

    Ok(())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// The value a capture step stores
fn extract(stdout: &[u8], target: CaptureTarget) -> Result<String> {
    let value = match target {
        CaptureTarget::Output => String::from_utf8_lossy(stdout).trim().to_string(),
        CaptureTarget::Guid => decode::<ResourceRef>(stdout, "a resource document")?.guid,
        CaptureTarget::ProcessGuid => {
            let processes: ResourceList<Process> = decode(stdout, "a process list")?;
            processes.process_guid("web")?.to_string()
        }
    };

    if value.is_empty() {
        return Err(Error::unexpected("a value to capture", "empty output"));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_targets() {
        assert_eq!(extract(b"  abc-123\n", CaptureTarget::Output).unwrap(), "abc-123");
        assert_eq!(
            extract(br#"{"guid": "pkg-1", "state": "READY"}"#, CaptureTarget::Guid).unwrap(),
            "pkg-1"
        );

        let processes = br#"{"resources": [{"guid": "p-1", "type": "web", "instances": 2}]}"#;
        assert_eq!(extract(processes, CaptureTarget::ProcessGuid).unwrap(), "p-1");

        let err = extract(processes, CaptureTarget::Guid).unwrap_err();
        assert!(matches!(err, Error::UnexpectedValue { .. }));
        assert!(extract(b"not json", CaptureTarget::ProcessGuid).is_err());
        assert!(extract(b"  \n", CaptureTarget::Output).is_err());
    }
}
