//! Per-scenario state
//!
//! Lives for exactly one scenario run.

use std::collections::HashMap;

use crate::common::{Config, Error, Result};
use crate::poll::LogTail;
use crate::resources::LogicalResource;

pub struct ScenarioContext {
    resources: HashMap<String, LogicalResource>,
    vars: HashMap<String, String>,
    log_tails: HashMap<String, LogTail>,
}

impl ScenarioContext {
    /// Seed `${api}`, `${apps_domain}` and `${memory}` from `config`
    pub fn new(config: &Config) -> Self {
        let mut vars = HashMap::new();
        vars.insert("api".to_string(), config.platform.api.clone());
        vars.insert("apps_domain".to_string(), config.platform.apps_domain.clone());
        vars.insert("memory".to_string(), config.defaults.memory_limit.clone());

        Self {
            resources: HashMap::new(),
            vars,
            log_tails: HashMap::new(),
        }
    }

    /// Record a resource and make its name available as `${alias}`
    pub fn bind_resource(&mut self, alias: &str, resource: LogicalResource) {
        self.vars.insert(alias.to_string(), resource.name.clone());
        self.resources.insert(resource.name.clone(), resource);
    }

    pub fn resources(&self) -> impl Iterator<Item = &LogicalResource> {
        self.resources.values()
    }

    /// Expose the oauth token as `${token}`
    pub fn set_auth_token(&mut self, token: String) {
        self.vars.insert("token".to_string(), token);
    }

    /// Store a captured value as `${name}`
    pub fn capture(&mut self, name: &str, value: String) {
        self.vars.insert(name.to_string(), value);
    }

    /// The log tail for `app`, created on first use
    pub fn log_tail(&mut self, app: &str) -> &mut LogTail {
        self.log_tails.entry(app.to_string()).or_default()
    }

    /// Substitute `${name}` references
    pub fn expand(&self, template: &str) -> Result<String> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after.find('}').ok_or_else(|| {
                Error::Config(format!("unterminated variable reference in '{}'", template))
            })?;
            let name = &after[..end];
            let value = self.vars.get(name).ok_or_else(|| {
                Error::Config(format!("unknown variable '${{{}}}' in '{}'", name, template))
            })?;
            out.push_str(value);
            rest = &after[end + 1..];
        }

        out.push_str(rest);
        Ok(out)
    }

    pub fn expand_all(&self, templates: &[String]) -> Result<Vec<String>> {
        templates.iter().map(|t| self.expand(t)).collect()
    }
}
