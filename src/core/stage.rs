//! Stage domain model

use crate::core::{
    config::{StageActionKind, StageConfig},
    context::RenderContext,
    probe::Probe,
    retry::{secs_to_duration, RetryPolicy},
};
use anyhow::{Context, Result};
use serde::Serialize;
use tracing::warn;

/// What a stage does on each attempt
#[derive(Debug, Clone, Serialize)]
pub enum StageAction {
    /// Run the probe; ready when it succeeds
    Check(Probe),
    /// Run the probe and publish its output as the join artifact
    Publish(Probe),
    /// Wait for the join artifact, then execute its content on the host
    Join,
}

impl StageAction {
    pub fn kind(&self) -> StageActionKind {
        match self {
            StageAction::Check(_) => StageActionKind::Check,
            StageAction::Publish(_) => StageActionKind::Publish,
            StageAction::Join => StageActionKind::Join,
        }
    }
}

/// A named, retried readiness check within a provisioning pipeline
#[derive(Debug, Clone, Serialize)]
pub struct Stage {
    /// Unique stage name within its pipeline
    pub name: String,

    /// Human-readable description
    pub description: Option<String>,

    pub action: StageAction,

    pub policy: RetryPolicy,

    /// Critical stages abort the pipeline when they time out;
    /// best-effort stages only log a warning
    pub critical: bool,

    /// Command run on the host after a failed attempt, before retrying
    pub cleanup: Option<String>,
}

impl Stage {
    pub fn new(name: impl Into<String>, action: StageAction) -> Self {
        Self {
            name: name.into(),
            description: None,
            action,
            policy: RetryPolicy::default(),
            critical: true,
            cleanup: None,
        }
    }

    pub fn check(name: impl Into<String>, probe: Probe) -> Self {
        Self::new(name, StageAction::Check(probe))
    }

    pub fn publish(name: impl Into<String>, probe: Probe) -> Self {
        Self::new(name, StageAction::Publish(probe))
    }

    pub fn join(name: impl Into<String>) -> Self {
        Self::new(name, StageAction::Join)
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_cleanup(mut self, cleanup: impl Into<String>) -> Self {
        self.cleanup = Some(cleanup.into());
        self
    }

    pub fn best_effort(mut self) -> Self {
        self.critical = false;
        self
    }

    pub fn probe(&self) -> Option<&Probe> {
        match &self.action {
            StageAction::Check(probe) | StageAction::Publish(probe) => Some(probe),
            StageAction::Join => None,
        }
    }

    pub fn is_join(&self) -> bool {
        matches!(self.action, StageAction::Join)
    }

    /// Create a stage from its config, rendering templates for one host
    pub fn from_config(
        config: &StageConfig,
        defaults: &StageDefaults,
        ctx: &RenderContext,
    ) -> Result<Self> {
        let action = match config.action {
            StageActionKind::Join => StageAction::Join,
            kind => {
                let probe_config = config
                    .probe
                    .as_ref()
                    .with_context(|| format!("Stage '{}' has no probe", config.name))?;
                let (probe_kind, spec) = probe_config
                    .kind_and_spec()
                    .with_context(|| format!("Stage '{}' has an invalid probe", config.name))?;
                let matcher = match &config.expect {
                    Some(expect) => expect
                        .to_matcher()
                        .with_context(|| format!("Stage '{}' has an invalid expectation", config.name))?,
                    None => crate::core::probe::Matcher::Success,
                };
                let probe = Probe::new(probe_kind, render(ctx, &config.name, spec)).expecting(matcher);
                if kind == StageActionKind::Publish {
                    StageAction::Publish(probe)
                } else {
                    StageAction::Check(probe)
                }
            }
        };

        let max_attempts = config.max_attempts.unwrap_or(defaults.max_attempts);
        let interval = config.interval_secs.unwrap_or(defaults.interval_secs);
        let attempt_timeout = config
            .attempt_timeout_secs
            .unwrap_or(defaults.attempt_timeout_secs);
        let overall = config.timeout_secs.or(defaults.timeout_secs);

        let policy = RetryPolicy::new(max_attempts, secs_to_duration(interval))
            .with_attempt_timeout(secs_to_duration(attempt_timeout))
            .with_overall_timeout(overall.map(secs_to_duration));

        Ok(Stage {
            name: config.name.clone(),
            description: config.description.clone(),
            action,
            policy,
            critical: config.critical,
            cleanup: config.cleanup.as_deref().map(|c| render(ctx, &config.name, c)),
        })
    }
}

/// Unknown placeholders stay as written; go templates in kubectl commands use the same braces
fn render(ctx: &RenderContext, stage: &str, template: &str) -> String {
    for name in ctx.unresolved(template) {
        warn!(stage, placeholder = %name, "Placeholder has no value, leaving it as written");
    }
    ctx.render(template)
}

/// Retry settings applied to stages that don't override them
#[derive(Debug, Clone)]
pub struct StageDefaults {
    pub max_attempts: u32,
    pub interval_secs: f64,
    pub attempt_timeout_secs: f64,
    pub timeout_secs: Option<f64>,
}

impl Default for StageDefaults {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            interval_secs: 10.0,
            attempt_timeout_secs: 30.0,
            timeout_secs: None,
        }
    }
}
