//! Cluster configuration from YAML

use crate::core::{
    context::RenderContext,
    host::{Host, HostRole},
    pipeline::{ClusterPlan, Pipeline},
    probe::{Matcher, ProbeKind},
    stage::StageDefaults,
    state::WorkerFailurePolicy,
    sync_point::SyncPoint,
};
use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Top-level cluster configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Cluster name
    pub name: String,

    /// Config version (optional)
    #[serde(default)]
    pub version: Option<String>,

    /// Variables available to every stage template
    #[serde(default)]
    variables: HashMap<String, Value>,

    /// Retry defaults for stages that don't override them
    #[serde(default)]
    pub defaults: RetryDefaults,

    /// Deadline for the whole run (in seconds)
    #[serde(default)]
    pub deadline_secs: Option<u64>,

    /// What a failed worker does to the run
    #[serde(default)]
    pub worker_failure: WorkerFailurePolicy,

    /// Join artifact location
    #[serde(default)]
    pub sync_point: Option<SyncPointConfig>,

    /// Cluster hosts; exactly one must be the master
    pub hosts: Vec<Host>,

    /// Stage lists per role
    #[serde(default)]
    pub pipelines: PipelinesConfig,
}

/// Retry defaults as defined in YAML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryDefaults {
    #[serde(default)]
    pub max_attempts: Option<u32>,

    #[serde(default)]
    pub interval_secs: Option<f64>,

    #[serde(default)]
    pub attempt_timeout_secs: Option<f64>,

    #[serde(default)]
    pub timeout_secs: Option<f64>,
}

impl RetryDefaults {
    pub fn to_stage_defaults(&self) -> StageDefaults {
        let base = StageDefaults::default();
        StageDefaults {
            max_attempts: self.max_attempts.unwrap_or(base.max_attempts),
            interval_secs: self.interval_secs.unwrap_or(base.interval_secs),
            attempt_timeout_secs: self.attempt_timeout_secs.unwrap_or(base.attempt_timeout_secs),
            timeout_secs: self.timeout_secs.or(base.timeout_secs),
        }
    }
}

/// Join artifact configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncPointConfig {
    #[serde(default = "default_sync_point_name")]
    pub name: String,

    pub path: PathBuf,
}

fn default_sync_point_name() -> String {
    "join-command".to_string()
}

/// Stage lists for each host role
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelinesConfig {
    #[serde(default)]
    pub master: Vec<StageConfig>,

    #[serde(default)]
    pub worker: Vec<StageConfig>,
}

impl PipelinesConfig {
    pub fn for_role(&self, role: HostRole) -> &[StageConfig] {
        match role {
            HostRole::Master => &self.master,
            HostRole::Worker => &self.worker,
        }
    }
}

/// Stage configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Stage name, unique within its role
    pub name: String,

    /// Optional stage description
    #[serde(default)]
    pub description: Option<String>,

    /// The readiness probe (not needed for `join`)
    #[serde(default)]
    pub probe: Option<ProbeConfig>,

    /// Expectation applied to the probe output
    #[serde(default)]
    pub expect: Option<ExpectConfig>,

    /// Whether a timeout aborts the pipeline
    #[serde(default = "default_critical")]
    pub critical: bool,

    /// What the stage does on each attempt
    #[serde(default)]
    pub action: StageActionKind,

    /// Command run after a failed attempt, before retrying
    #[serde(default)]
    pub cleanup: Option<String>,

    /// Maximum attempts for this stage (overrides defaults)
    #[serde(default)]
    pub max_attempts: Option<u32>,

    /// Sleep between attempts (overrides defaults)
    #[serde(default)]
    pub interval_secs: Option<f64>,

    /// Timeout for one probe invocation (overrides defaults)
    #[serde(default)]
    pub attempt_timeout_secs: Option<f64>,

    /// Overall time budget for the stage (overrides defaults)
    #[serde(default)]
    pub timeout_secs: Option<f64>,
}

fn default_critical() -> bool {
    true
}

/// Stage action as written in YAML
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StageActionKind {
    #[default]
    Check,
    Publish,
    Join,
}

/// Probe definition; exactly one field must be set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_exists: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
}

impl ProbeConfig {
    pub fn kind_and_spec(&self) -> Result<(ProbeKind, &str)> {
        let candidates = [
            (ProbeKind::Command, self.command.as_deref()),
            (ProbeKind::FileExists, self.file_exists.as_deref()),
            (ProbeKind::HttpCheck, self.http.as_deref()),
            (ProbeKind::PortOpen, self.port.as_deref()),
        ];
        let mut set = candidates
            .into_iter()
            .filter_map(|(kind, spec)| spec.map(|s| (kind, s)));

        match (set.next(), set.next()) {
            (Some(found), None) => Ok(found),
            (None, _) => anyhow::bail!("probe must set one of: command, file_exists, http, port"),
            (Some(_), Some(_)) => anyhow::bail!("probe sets more than one of: command, file_exists, http, port"),
        }
    }
}

/// Output expectation; at most one field may be set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExpectConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<CountConfig>,
}

/// "At least `min` lines containing `pattern`"
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountConfig {
    pub pattern: String,
    pub min: usize,
}

impl ExpectConfig {
    pub fn to_matcher(&self) -> Result<Matcher> {
        match (&self.contains, &self.regex, &self.count) {
            (None, None, None) => Ok(Matcher::Success),
            (Some(s), None, None) => Ok(Matcher::Contains(s.clone())),
            (None, Some(r), None) => {
                let regex = Regex::new(r).with_context(|| format!("invalid regex '{}'", r))?;
                Ok(Matcher::Regex(regex))
            }
            (None, None, Some(count)) => {
                if count.min == 0 {
                    anyhow::bail!("count.min must be at least 1");
                }
                Ok(Matcher::CountAtLeast {
                    pattern: count.pattern.clone(),
                    min: count.min,
                })
            }
            _ => anyhow::bail!("expect sets more than one of: contains, regex, count"),
        }
    }
}

impl ClusterConfig {
    /// Load cluster configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse cluster configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: ClusterConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the cluster configuration
    pub fn validate(&self) -> Result<()> {
        // Host IDs are unique and there is exactly one master
        let mut seen_ids = HashSet::new();
        for host in &self.hosts {
            if !seen_ids.insert(&host.id) {
                anyhow::bail!("Duplicate host ID: {}", host.id);
            }
        }
        let masters = self.hosts.iter().filter(|h| h.is_master()).count();
        if masters != 1 {
            anyhow::bail!("Cluster must have exactly one master host, found {}", masters);
        }

        for role in [HostRole::Master, HostRole::Worker] {
            let stages = self.pipelines.for_role(role);

            let mut seen_names = HashSet::new();
            for stage in stages {
                if !seen_names.insert(&stage.name) {
                    anyhow::bail!("Duplicate {} stage name: {}", role, stage.name);
                }

                if stage.action != StageActionKind::Join {
                    let probe = stage.probe.as_ref().with_context(|| {
                        format!("{} stage '{}' has no probe", role, stage.name)
                    })?;
                    probe
                        .kind_and_spec()
                        .with_context(|| format!("{} stage '{}'", role, stage.name))?;
                }
                if let Some(expect) = &stage.expect {
                    expect
                        .to_matcher()
                        .with_context(|| format!("{} stage '{}'", role, stage.name))?;
                }
            }

            let publishes = stages.iter().filter(|s| s.action == StageActionKind::Publish).count();
            let joins = stages.iter().filter(|s| s.action == StageActionKind::Join).count();
            match role {
                HostRole::Master if joins > 0 => {
                    anyhow::bail!("Join stages are only allowed in the worker pipeline")
                }
                HostRole::Worker if publishes > 0 => {
                    anyhow::bail!("Publish stages are only allowed in the master pipeline")
                }
                _ => {}
            }
            if publishes > 1 || joins > 1 {
                anyhow::bail!("The {} pipeline may have at most one publish and one join stage", role);
            }
        }

        let has_publish = self
            .pipelines
            .master
            .iter()
            .any(|s| s.action == StageActionKind::Publish);
        let has_join = self
            .pipelines
            .worker
            .iter()
            .any(|s| s.action == StageActionKind::Join);

        if (has_publish || has_join) && self.sync_point.is_none() {
            anyhow::bail!("Publish and join stages require a sync_point");
        }
        if has_join && !has_publish {
            anyhow::bail!("Worker join stage has no master publish stage to wait for");
        }

        Ok(())
    }

    /// The single master host
    pub fn master(&self) -> Result<&Host> {
        self.hosts
            .iter()
            .find(|h| h.is_master())
            .context("Cluster has no master host")
    }

    pub fn workers(&self) -> impl Iterator<Item = &Host> {
        self.hosts.iter().filter(|h| !h.is_master())
    }

    /// Get variables as string map
    pub fn variables_as_string_map(&self) -> HashMap<String, String> {
        self.variables
            .iter()
            .map(|(key, value)| {
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    Value::Bool(b) => b.to_string(),
                    Value::Number(n) => n.to_string(),
                    Value::Null => String::new(),
                    // Fallback: convert to string
                    other => serde_yaml::to_string(other)
                        .map(|s| s.trim_end().to_string())
                        .unwrap_or_default(),
                };
                (key.clone(), rendered)
            })
            .collect()
    }

    pub fn sync_point(&self) -> Option<SyncPoint> {
        self.sync_point
            .as_ref()
            .map(|c| SyncPoint::new(c.name.clone(), c.path.clone()))
    }

    /// Convert config into per-host pipelines, applying variable overrides
    pub fn to_plan(&self, overrides: &HashMap<String, String>) -> Result<ClusterPlan> {
        self.validate()?;

        let master = self.master()?;
        let defaults = self.defaults.to_stage_defaults();

        let mut base = RenderContext::with_variables(self.variables_as_string_map());
        for (key, value) in overrides {
            base.set_variable(key.clone(), value.clone());
        }
        let sync_point = self.sync_point();
        if let Some(point) = &sync_point {
            base.set_variable("sync_point.name", point.name.clone());
            base.set_variable("sync_point.path", point.path.display().to_string());
        }

        let master_pipeline = Pipeline::from_config(
            master.clone(),
            &self.pipelines.master,
            &defaults,
            &base.for_host(master, master),
        )
        .with_context(|| format!("Failed to build pipeline for {}", master.id))?;

        let mut plan = ClusterPlan::new(self.name.clone(), master_pipeline);
        for worker in self.workers() {
            let pipeline = Pipeline::from_config(
                worker.clone(),
                &self.pipelines.worker,
                &defaults,
                &base.for_host(worker, master),
            )
            .with_context(|| format!("Failed to build pipeline for {}", worker.id))?;
            plan = plan.with_worker(pipeline);
        }
        if let Some(point) = sync_point {
            plan = plan.with_sync_point(point);
        }

        Ok(plan)
    }
}
