//! Render context - variables substituted into probe specs and commands

use crate::core::host::Host;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("placeholder regex is valid")
    })
}

/// Variables available when rendering a host's stages
///
/// Holds the cluster-level variables plus the built-in `host.*`,
/// `master.*` and `sync_point.*` entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenderContext {
    pub variables: HashMap<String, String>,
}

impl RenderContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_variables(variables: HashMap<String, String>) -> Self {
        Self { variables }
    }

    pub fn set_variable(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(key.into(), value.into());
    }

    /// Derive the context for a specific host
    pub fn for_host(&self, host: &Host, master: &Host) -> Self {
        let mut ctx = self.clone();
        ctx.set_variable("host.id", host.id.as_str());
        ctx.set_variable("host.address", host.address.as_str());
        ctx.set_variable("host.role", host.role.as_str());
        ctx.set_variable("master.id", master.id.as_str());
        ctx.set_variable("master.address", master.address.as_str());
        ctx
    }

    /// Replace `{{ name }}` placeholders; unknown names are left untouched
    pub fn render(&self, template: &str) -> String {
        placeholder_regex()
            .replace_all(template, |caps: &Captures| {
                self.variables
                    .get(&caps[1])
                    .cloned()
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }

    /// Placeholders in `template` that have no value in this context
    pub fn unresolved(&self, template: &str) -> Vec<String> {
        placeholder_regex()
            .captures_iter(template)
            .map(|caps| caps[1].to_string())
            .filter(|name| !self.variables.contains_key(name))
            .collect()
    }
}
