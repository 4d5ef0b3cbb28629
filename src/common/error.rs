//! Error types for the acceptance harness
//!
//! Messages carry enough context (command line, step label, last observed
//! state) to diagnose a failure without rerunning the scenario.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the harness
#[derive(Error, Debug)]
pub enum Error {
    // === Command Errors ===
    #[error("Failed to launch '{command}': {source}")]
    LaunchFailure {
        command: String,
        #[source]
        source: io::Error,
    },

    // === Timeout Errors ===
    #[error("{operation} timed out after {after:?}{}", observed_suffix(.last_observed))]
    Timeout {
        operation: String,
        after: Duration,
        last_observed: Option<String>,
    },

    // === Assertion Errors ===
    #[error("Unexpected value: expected {expected}, got {actual}")]
    UnexpectedValue { expected: String, actual: String },

    // === Teardown Errors ===
    #[error("Teardown of '{resource}' failed: {reason}")]
    TeardownFailure { resource: String, reason: String },

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // === HTTP Errors ===
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

fn observed_suffix(last_observed: &Option<String>) -> String {
    match last_observed {
        Some(observed) => format!("; last observed: {}", observed),
        None => String::new(),
    }
}

impl Error {
    /// Create a timeout error with the state seen right before giving up
    pub fn timeout(operation: impl Into<String>, after: Duration, last_observed: Option<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
            last_observed,
        }
    }

    /// Create an unexpected value error
    pub fn unexpected(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::UnexpectedValue {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a teardown failure error
    pub fn teardown_failed(resource: &str, reason: impl Into<String>) -> Self {
        Self::TeardownFailure {
            resource: resource.to_string(),
            reason: reason.into(),
        }
    }

    /// Short machine-readable code, used in scenario reports
    pub fn code(&self) -> &'static str {
        match self {
            Error::LaunchFailure { .. } => "LAUNCH_FAILURE",
            Error::Timeout { .. } => "TIMEOUT",
            Error::UnexpectedValue { .. } => "UNEXPECTED_VALUE",
            Error::TeardownFailure { .. } => "TEARDOWN_FAILURE",
            Error::Config(_) | Error::ConfigParse(_) => "CONFIG",
            _ => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_includes_last_observed() {
        let err = Error::timeout("poll http", Duration::from_secs(30), Some("connection refused".into()));
        let msg = err.to_string();
        assert!(msg.contains("poll http timed out after 30s"));
        assert!(msg.ends_with("last observed: connection refused"));

        let err = Error::timeout("wait", Duration::from_secs(1), None);
        assert_eq!(err.to_string(), "wait timed out after 1s");
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::unexpected("RUNNING", "DOWN").code(), "UNEXPECTED_VALUE");
        assert_eq!(Error::teardown_failed("app", "boom").code(), "TEARDOWN_FAILURE");
        assert_eq!(Error::Config("x".into()).code(), "CONFIG");
    }
}
