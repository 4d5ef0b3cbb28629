//! Resource lifecycle manager
//!
//! Hands out uniquely named resources for a scenario and releases every one
//! of them exactly once, whatever happened in between. A failed teardown is
//! logged and recorded; it never stops the remaining teardowns.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::{Error, Result};

/// Kinds of platform resources a scenario can create
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    App,
    Route,
    Package,
    Droplet,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::App => "app",
            ResourceKind::Route => "route",
            ResourceKind::Package => "package",
            ResourceKind::Droplet => "droplet",
        };
        f.write_str(s)
    }
}

/// A named platform entity owned by one scenario
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalResource {
    pub name: String,
    pub kind: ResourceKind,
    pub created_at: DateTime<Utc>,
}

/// Destroys a resource on the platform
#[async_trait]
pub trait Teardown: Send + Sync {
    async fn teardown(&self, resource: &LogicalResource) -> Result<()>;
}

/// Generate `prefix` followed by a random suffix
pub fn random_name(prefix: &str) -> String {
    format!("{}{:016x}", prefix, rand::random::<u64>())
}

/// Registry of the resources a scenario still has to release
pub struct ResourceManager<T: Teardown> {
    teardown: T,
    open: Vec<LogicalResource>,
    released: usize,
    failures: Vec<Error>,
}

impl<T: Teardown> ResourceManager<T> {
    pub fn new(teardown: T) -> Self {
        Self {
            teardown,
            open: Vec::new(),
            released: 0,
            failures: Vec::new(),
        }
    }

    /// Allocate a uniquely named resource and record it for cleanup
    pub fn register(&mut self, kind: ResourceKind, prefix: &str) -> LogicalResource {
        let mut name = random_name(prefix);
        while self.open.iter().any(|r| r.name == name) {
            name = random_name(prefix);
        }
        self.adopt(kind, name)
    }

    /// Record a resource whose name was chosen elsewhere (e.g. a platform guid)
    pub fn adopt(&mut self, kind: ResourceKind, name: impl Into<String>) -> LogicalResource {
        let resource = LogicalResource {
            name: name.into(),
            kind,
            created_at: Utc::now(),
        };
        tracing::debug!(name = %resource.name, kind = %resource.kind, "registered resource");
        self.open.push(resource.clone());
        resource
    }

    /// Tear down a resource and forget it
    ///
    /// Releasing something that is not open is a no-op.
    pub async fn release(&mut self, resource: &LogicalResource) {
        let Some(pos) = self.open.iter().position(|r| r.name == resource.name) else {
            tracing::trace!(name = %resource.name, "release of non-open resource ignored");
            return;
        };
        let resource = self.open.remove(pos);
        self.released += 1;

        match self.teardown.teardown(&resource).await {
            Ok(()) => tracing::debug!(name = %resource.name, "released resource"),
            Err(e) => {
                tracing::warn!(name = %resource.name, kind = %resource.kind, "teardown failed: {}", e);
                self.failures
                    .push(Error::teardown_failed(&resource.name, e.to_string()));
            }
        }
    }

    /// Release everything still open, most recent first
    pub async fn release_all(&mut self) {
        while let Some(resource) = self.open.last().cloned() {
            self.release(&resource).await;
        }
    }

    pub fn open(&self) -> &[LogicalResource] {
        &self.open
    }

    /// Number of teardown calls issued
    pub fn released_count(&self) -> usize {
        self.released
    }

    /// Teardown failures recorded so far
    pub fn failures(&self) -> &[Error] {
        &self.failures
    }

    pub fn take_failures(&mut self) -> Vec<Error> {
        std::mem::take(&mut self.failures)
    }
}

impl<T: Teardown> Drop for ResourceManager<T> {
    fn drop(&mut self) {
        for resource in &self.open {
            tracing::error!(name = %resource.name, kind = %resource.kind, "resource leaked without teardown");
        }
    }
}
