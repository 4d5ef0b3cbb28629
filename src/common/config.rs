//! Configuration file handling
//!
//! The configuration is loaded once at startup and shared read-only
//! (`Arc<Config>`) by every scenario.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::resolve_config_path;
use super::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    /// Platform under test
    #[serde(default)]
    pub platform: PlatformConfig,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Default settings
    #[serde(default)]
    pub defaults: Defaults,
}

/// Where the platform lives and how to talk to it
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlatformConfig {
    /// API endpoint, without protocol (e.g. "api.example.com")
    #[serde(default)]
    pub api: String,

    /// Shared domain that application routes are created under
    #[serde(default)]
    pub apps_domain: String,

    /// Talk plain HTTP to application routes
    #[serde(default)]
    pub use_http: bool,

    /// Accept self-signed certificates on application routes
    #[serde(default = "default_true")]
    pub skip_ssl_validation: bool,

    /// Control-plane CLI to invoke
    #[serde(default = "default_cf_binary")]
    pub cf_binary: PathBuf,

    /// CF_HOME handed to every control-plane command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cf_home: Option<PathBuf>,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            api: String::new(),
            apps_domain: String::new(),
            use_http: false,
            skip_ssl_validation: true,
            cf_binary: default_cf_binary(),
            cf_home: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_cf_binary() -> PathBuf {
    PathBuf::from("cf")
}

/// Timeout settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Timeouts {
    /// Default wait for a control-plane command or poll
    #[serde(default = "default_default")]
    pub default_secs: u64,

    /// Wait for push/start, which stage the application
    #[serde(default = "default_push")]
    pub push_secs: u64,

    /// Upper bound for the platform to notice an instance state change
    #[serde(default = "default_reconcile")]
    pub reconcile_secs: u64,

    /// Sleep between probe evaluations
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Per-request timeout for HTTP calls against application routes
    #[serde(default = "default_http_request")]
    pub http_request_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            default_secs: default_default(),
            push_secs: default_push(),
            reconcile_secs: default_reconcile(),
            poll_interval_ms: default_poll_interval(),
            http_request_secs: default_http_request(),
        }
    }
}

fn default_default() -> u64 {
    30
}
fn default_push() -> u64 {
    120
}
fn default_reconcile() -> u64 {
    35
}
fn default_poll_interval() -> u64 {
    2000
}
fn default_http_request() -> u64 {
    10
}

impl Timeouts {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_secs)
    }

    pub fn push_timeout(&self) -> Duration {
        Duration::from_secs(self.push_secs)
    }

    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.reconcile_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn http_request_timeout(&self) -> Duration {
        Duration::from_secs(self.http_request_secs)
    }
}

/// Default settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Defaults {
    /// Prefix for generated resource names
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,

    /// Memory limit handed to pushed applications (`${memory}`)
    #[serde(default = "default_memory_limit")]
    pub memory_limit: String,

    /// Scenarios run at the same time
    #[serde(default = "default_jobs")]
    pub jobs: usize,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            name_prefix: default_name_prefix(),
            memory_limit: default_memory_limit(),
            jobs: default_jobs(),
        }
    }
}

fn default_name_prefix() -> String {
    "CATS-APP-".to_string()
}
fn default_memory_limit() -> String {
    "256M".to_string()
}
fn default_jobs() -> usize {
    4
}

impl Config {
    /// Load configuration
    ///
    /// Returns default configuration if no file exists at the resolved path.
    /// An explicitly requested file must exist.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = resolve_config_path(explicit) {
            if path.exists() {
                return Self::from_file(&path);
            }
            if explicit.is_some() {
                return Err(Error::FileRead {
                    path: path.display().to_string(),
                    error: "file not found".to_string(),
                });
            }
        }
        Ok(Self::default())
    }

    /// Parse a configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| Error::ConfigParse(e.to_string()))
    }

    /// Check that a run against a real platform is possible
    pub fn validate(&self) -> Result<()> {
        if self.platform.api.trim().is_empty() {
            return Err(Error::Config("platform.api must be set".to_string()));
        }
        if self.platform.apps_domain.trim().is_empty() {
            return Err(Error::Config("platform.apps_domain must be set".to_string()));
        }
        if self.timeouts.poll_interval_ms == 0 {
            return Err(Error::Config(
                "timeouts.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.defaults.jobs == 0 {
            return Err(Error::Config("defaults.jobs must be greater than zero".to_string()));
        }
        Ok(())
    }

    /// Resolve the control-plane binary, searching PATH for bare names
    pub fn cf_binary(&self) -> Result<PathBuf> {
        let binary = &self.platform.cf_binary;
        if binary.components().count() > 1 {
            return Ok(binary.clone());
        }
        which::which(binary).map_err(|e| {
            Error::Config(format!(
                "control-plane binary '{}' not found on PATH: {}",
                binary.display(),
                e
            ))
        })
    }

    /// Protocol prefix for application routes
    pub fn protocol(&self) -> &'static str {
        if self.platform.use_http {
            "http://"
        } else {
            "https://"
        }
    }

    /// Render as TOML, for `cats config`
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Internal(e.to_string()))
    }
}
