//! Control-plane verbs issued through the `cf` CLI

use std::time::Duration;

use async_trait::async_trait;

use crate::common::{Config, Error, Result};
use crate::exec::{CommandInvocation, CommandRunner};
use crate::resources::{LogicalResource, ResourceKind, Teardown};

use super::api::ProcessStats;

/// The `cf` CLI, configured for one platform
#[derive(Debug, Clone)]
pub struct ControlPlane {
    runner: CommandRunner,
    default_timeout: Duration,
}

impl ControlPlane {
    pub fn new(runner: CommandRunner, default_timeout: Duration) -> Self {
        Self {
            runner,
            default_timeout,
        }
    }

    /// Build from configuration, resolving the binary and CF_HOME
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut runner = CommandRunner::new(config.cf_binary()?);
        if let Some(home) = &config.platform.cf_home {
            runner = runner.env("CF_HOME", home);
        }
        Ok(Self::new(runner, config.timeouts.default_timeout()))
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Launch `cf <args>` without waiting
    pub fn invoke<I, S>(&self, args: I) -> Result<CommandInvocation>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.runner.run(args)
    }

    /// Launch `cf <args>` and wait for it to exit
    pub async fn run<I, S>(&self, args: I, timeout: Duration) -> Result<CommandInvocation>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut invocation = self.invoke(args)?;
        invocation.wait(timeout).await?;
        Ok(invocation)
    }

    /// Like [`run`](Self::run), but a non-zero exit is an error
    pub async fn run_ok<I, S>(&self, args: I, timeout: Duration) -> Result<CommandInvocation>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let invocation = self.run(args, timeout).await?;
        expect_success(&invocation)?;
        Ok(invocation)
    }

    /// `cf curl <path> [-X <method>]`
    pub async fn curl(&self, path: &str, method: Option<&str>) -> Result<CommandInvocation> {
        let mut args = vec!["curl", path];
        if let Some(method) = method {
            args.extend(["-X", method]);
        }
        self.run_ok(args, self.default_timeout).await
    }

    /// Fetch and decode a process stats document
    pub async fn process_stats(&self, path: &str) -> Result<ProcessStats> {
        let invocation = self.curl(path, None).await?;
        ProcessStats::parse(&invocation.stdout())
    }

    /// `cf logs --recent <app>`
    pub async fn recent_logs(&self, app: &str) -> Result<Vec<u8>> {
        let invocation = self
            .run_ok(["logs", "--recent", app], self.default_timeout)
            .await?;
        Ok(invocation.stdout())
    }

    /// Start streaming `cf logs <app>`; the caller owns and must kill it
    pub fn stream_logs(&self, app: &str) -> Result<CommandInvocation> {
        self.invoke(["logs", app])
    }

    /// `cf oauth-token`
    pub async fn oauth_token(&self) -> Result<String> {
        let invocation = self.run_ok(["oauth-token"], self.default_timeout).await?;
        let token = invocation.stdout_str().trim().to_string();
        if token.is_empty() {
            return Err(Error::unexpected("an oauth token", "empty output"));
        }
        Ok(token)
    }

    /// Log what the platform knows about an app, for failed scenarios
    pub async fn app_report(&self, app: &str) {
        match self.run(["app", app, "--guid"], self.default_timeout).await {
            Ok(inv) => tracing::info!(app, guid = %inv.stdout_str().trim(), "app report"),
            Err(e) => tracing::info!(app, "app report unavailable: {}", e),
        }
        match self.run(["logs", "--recent", app], self.default_timeout).await {
            Ok(inv) => tracing::info!(app, "recent logs:\n{}", inv.output_tail(50)),
            Err(e) => tracing::info!(app, "recent logs unavailable: {}", e),
        }
    }
}

/// Turn a non-zero exit into an `UnexpectedValue` carrying the output tail
pub fn expect_success(invocation: &CommandInvocation) -> Result<()> {
    match invocation.exit_code() {
        Some(0) => Ok(()),
        code => Err(Error::unexpected(
            format!("'{}' to exit 0", invocation.command_line()),
            format!(
                "exit code {}: {}",
                code.map(|c| c.to_string()).unwrap_or_else(|| "none".into()),
                invocation.output_tail(5)
            ),
        )),
    }
}

/// Deletes scenario resources through the control plane
pub struct CfTeardown {
    cf: ControlPlane,
    apps_domain: String,
}

impl CfTeardown {
    pub fn new(cf: ControlPlane, apps_domain: impl Into<String>) -> Self {
        Self {
            cf,
            apps_domain: apps_domain.into(),
        }
    }

    fn args(&self, resource: &LogicalResource) -> Vec<String> {
        let name = resource.name.clone();
        match resource.kind {
            ResourceKind::App => vec!["delete".into(), name, "-f".into()],
            ResourceKind::Route => vec![
                "delete-route".into(),
                self.apps_domain.clone(),
                "--hostname".into(),
                name,
                "-f".into(),
            ],
            ResourceKind::Package => vec![
                "curl".into(),
                format!("/v3/packages/{}", name),
                "-X".into(),
                "DELETE".into(),
            ],
            ResourceKind::Droplet => vec![
                "curl".into(),
                format!("/v3/droplets/{}", name),
                "-X".into(),
                "DELETE".into(),
            ],
        }
    }
}

#[async_trait]
impl Teardown for CfTeardown {
    async fn teardown(&self, resource: &LogicalResource) -> Result<()> {
        self.cf
            .run_ok(self.args(resource), self.cf.default_timeout())
            .await
            .map(|_| ())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use chrono::Utc;

    fn echo_plane() -> ControlPlane {
        ControlPlane::new(CommandRunner::new("echo"), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_curl_builds_method_flag() {
        let inv = echo_plane()
            .curl("/v3/apps/abc/processes/web/instances/0", Some("DELETE"))
            .await
            .unwrap();
        assert_eq!(
            inv.stdout_str().trim(),
            "curl /v3/apps/abc/processes/web/instances/0 -X DELETE"
        );
    }

    #[tokio::test]
    async fn test_run_ok_rejects_non_zero_exit() {
        let cf = ControlPlane::new(CommandRunner::new("false"), Duration::from_secs(5));
        let err = cf.run_ok(["apps"], Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, Error::UnexpectedValue { .. }));
    }

    #[tokio::test]
    async fn test_teardown_commands_per_kind() {
        let teardown = CfTeardown::new(echo_plane(), "apps.example.com");
        let resource = |name: &str, kind| LogicalResource {
            name: name.into(),
            kind,
            created_at: Utc::now(),
        };

        assert_eq!(
            teardown.args(&resource("CATS-APP-1", ResourceKind::App)),
            vec!["delete", "CATS-APP-1", "-f"]
        );
        assert_eq!(
            teardown.args(&resource("cats-route", ResourceKind::Route)),
            vec!["delete-route", "apps.example.com", "--hostname", "cats-route", "-f"]
        );
        assert_eq!(
            teardown.args(&resource("pkg-guid", ResourceKind::Package)),
            vec!["curl", "/v3/packages/pkg-guid", "-X", "DELETE"]
        );

        teardown
            .teardown(&resource("CATS-APP-1", ResourceKind::App))
            .await
            .unwrap();
    }
}
