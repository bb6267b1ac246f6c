//! Pipeline domain model

use crate::core::{
    config::StageConfig,
    context::RenderContext,
    host::Host,
    stage::{Stage, StageDefaults},
    sync_point::SyncPoint,
};
use anyhow::Result;
use serde::Serialize;

/// Ordered sequence of stages for one host
///
/// Owns no external resources; constructed fresh for every run.
#[derive(Debug, Clone, Serialize)]
pub struct Pipeline {
    /// Host the stages run against
    pub host: Host,

    /// Stages in declared (and execution) order
    pub stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new(host: Host, stages: Vec<Stage>) -> Self {
        Self { host, stages }
    }

    /// Build a host's pipeline from its role's stage configs
    pub fn from_config(
        host: Host,
        configs: &[StageConfig],
        defaults: &StageDefaults,
        ctx: &RenderContext,
    ) -> Result<Self> {
        let stages = configs
            .iter()
            .map(|config| Stage::from_config(config, defaults, ctx))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(host, stages))
    }

    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Get a stage by name
    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn join_stage(&self) -> Option<&Stage> {
        self.stages.iter().find(|s| s.is_join())
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// Everything an orchestration run needs: one pipeline per host
#[derive(Debug, Clone, Serialize)]
pub struct ClusterPlan {
    /// Cluster name
    pub name: String,

    pub master: Pipeline,

    pub workers: Vec<Pipeline>,

    /// Join artifact published by the master
    pub sync_point: Option<SyncPoint>,
}

impl ClusterPlan {
    pub fn new(name: impl Into<String>, master: Pipeline) -> Self {
        Self {
            name: name.into(),
            master,
            workers: Vec::new(),
            sync_point: None,
        }
    }

    pub fn with_worker(mut self, worker: Pipeline) -> Self {
        self.workers.push(worker);
        self
    }

    pub fn with_sync_point(mut self, sync_point: SyncPoint) -> Self {
        self.sync_point = Some(sync_point);
        self
    }

    pub fn hosts(&self) -> impl Iterator<Item = &Host> {
        std::iter::once(&self.master.host).chain(self.workers.iter().map(|w| &w.host))
    }

    /// Total number of stages across all pipelines
    pub fn total_stages(&self) -> usize {
        self.master.len() + self.workers.iter().map(Pipeline::len).sum::<usize>()
    }
}
