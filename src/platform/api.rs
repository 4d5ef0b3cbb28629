//! Typed views of the JSON documents returned by `cf curl`
//!
//! Only the fields the scenarios assert on are modelled. A document that
//! does not have the expected shape is an `UnexpectedValue`, never a silent
//! default.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::common::{truncate, Error, Result};

/// Paginated v3 list: `{"resources": [...]}`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResourceList<T> {
    pub resources: Vec<T>,
}

/// One entry of `/v3/apps/:guid/processes/:type/stats`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InstanceStats {
    pub state: InstanceState,
    #[serde(default)]
    pub index: Option<u32>,
}

pub type ProcessStats = ResourceList<InstanceStats>;

/// One entry of `/v3/apps/:guid/processes`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Process {
    pub guid: String,
    #[serde(rename = "type")]
    pub process_type: String,
}

/// Any single v3 resource, reduced to its guid
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResourceRef {
    pub guid: String,
}

/// Lifecycle state of a process instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceState {
    Running,
    Starting,
    Stopping,
    Crashed,
    Down,
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceState::Running => "RUNNING",
            InstanceState::Starting => "STARTING",
            InstanceState::Stopping => "STOPPING",
            InstanceState::Crashed => "CRASHED",
            InstanceState::Down => "DOWN",
        };
        f.write_str(s)
    }
}

/// Decode a response body into `T`, reporting shape mismatches
pub fn decode<T: DeserializeOwned>(body: &[u8], what: &str) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| {
        Error::unexpected(
            format!("{} ({})", what, e),
            truncate(&String::from_utf8_lossy(body), 200),
        )
    })
}

impl ProcessStats {
    pub fn parse(body: &[u8]) -> Result<Self> {
        decode(body, "process stats document")
    }

    /// State of the instance with `index`
    ///
    /// Entries are matched on their `index` field. Listing position is used
    /// only when no entry carries one.
    pub fn instance_state(&self, index: usize) -> Result<InstanceState> {
        let indexed = self.resources.iter().any(|i| i.index.is_some());
        let found = if indexed {
            self.resources
                .iter()
                .find(|i| i.index.map(|n| n as usize) == Some(index))
        } else {
            self.resources.get(index)
        };

        found.map(|i| i.state).ok_or_else(|| {
            Error::unexpected(
                format!("instance {}", index),
                format!("{} instance(s) listed", self.resources.len()),
            )
        })
    }
}

impl ResourceList<Process> {
    /// Guid of the process of type `process_type`
    pub fn process_guid(&self, process_type: &str) -> Result<&str> {
        self.resources
            .iter()
            .find(|p| p.process_type == process_type)
            .map(|p| p.guid.as_str())
            .ok_or_else(|| {
                let listed: Vec<&str> = self
                    .resources
                    .iter()
                    .map(|p| p.process_type.as_str())
                    .collect();
                Error::unexpected(
                    format!("a '{}' process", process_type),
                    format!("process types [{}]", listed.join(", ")),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stats() {
        let body = br#"{
            "resources": [
                {"type": "web", "index": 0, "state": "RUNNING", "usage": {"cpu": 0.1}},
                {"type": "web", "index": 1, "state": "STOPPING"}
            ]
        }"#;
        let stats = ProcessStats::parse(body).unwrap();
        assert_eq!(stats.instance_state(0).unwrap(), InstanceState::Running);
        assert_eq!(stats.instance_state(1).unwrap(), InstanceState::Stopping);
        assert_eq!(stats.resources[1].index, Some(1));
    }

    #[test]
    fn test_instance_is_selected_by_index_field() {
        let body = br#"{
            "resources": [
                {"index": 1, "state": "STOPPING"},
                {"index": 0, "state": "RUNNING"}
            ]
        }"#;
        let stats = ProcessStats::parse(body).unwrap();
        assert_eq!(stats.instance_state(0).unwrap(), InstanceState::Running);
        assert_eq!(stats.instance_state(1).unwrap(), InstanceState::Stopping);
        assert!(stats.instance_state(2).is_err());
    }

    #[test]
    fn test_instance_falls_back_to_position_without_index() {
        let body = br#"{"resources": [{"state": "DOWN"}, {"state": "CRASHED"}]}"#;
        let stats = ProcessStats::parse(body).unwrap();
        assert_eq!(stats.instance_state(1).unwrap(), InstanceState::Crashed);
    }

    #[test]
    fn test_missing_instance_is_unexpected_value() {
        let stats = ProcessStats::parse(br#"{"resources": []}"#).unwrap();
        let err = stats.instance_state(0).unwrap_err();
        assert!(matches!(err, Error::UnexpectedValue { .. }));
    }

    #[test]
    fn test_wrong_shape_is_rejected() {
        let err = ProcessStats::parse(br#"{"errors": [{"detail": "App not found"}]}"#).unwrap_err();
        assert!(matches!(err, Error::UnexpectedValue { .. }));
        assert!(err.to_string().contains("App not found"));

        let err = ProcessStats::parse(br#"{"resources": [{"state": "SLEEPING"}]}"#).unwrap_err();
        assert!(matches!(err, Error::UnexpectedValue { .. }));
    }

    #[test]
    fn test_parse_process_list() {
        let body = br#"{"resources": [{"guid": "p-1", "type": "web", "instances": 1}]}"#;
        let list: ResourceList<Process> = decode(body, "process list").unwrap();
        assert_eq!(list.resources[0].guid, "p-1");
        assert_eq!(list.resources[0].process_type, "web");
    }

    #[test]
    fn test_process_guid_selects_by_type() {
        let body = br#"{"resources": [
            {"guid": "p-worker", "type": "worker"},
            {"guid": "p-web", "type": "web"}
        ]}"#;
        let list: ResourceList<Process> = decode(body, "process list").unwrap();
        assert_eq!(list.process_guid("web").unwrap(), "p-web");

        let err = list.process_guid("clock").unwrap_err();
        assert!(matches!(err, Error::UnexpectedValue { .. }));
        assert!(err.to_string().contains("worker, web"));
    }

    #[test]
    fn test_state_display_matches_wire_format() {
        assert_eq!(InstanceState::Running.to_string(), "RUNNING");
        let parsed: InstanceState = serde_json::from_str("\"CRASHED\"").unwrap();
        assert_eq!(parsed, InstanceState::Crashed);
    }
}
