//! Persistence layer for orchestration run history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteRunStore;

use crate::core::ClusterOutcome;
use crate::execution::RunReport;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Summary of an orchestration run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique run ID
    pub run_id: Uuid,

    /// Cluster name
    pub cluster_name: String,

    pub outcome: ClusterOutcome,

    pub started_at: DateTime<Utc>,

    pub completed_at: DateTime<Utc>,

    /// Hosts (master included) that reached Ready
    pub hosts_ready: usize,

    pub hosts_total: usize,

    /// IDs of hosts that did not reach Ready
    pub failed_hosts: Vec<String>,
}

impl RunSummary {
    pub fn duration(&self) -> Option<std::time::Duration> {
        self.completed_at
            .signed_duration_since(self.started_at)
            .to_std()
            .ok()
    }
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save a run summary
    async fn save_run(&self, run: &RunSummary) -> Result<()>;

    /// Load a run by ID
    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>>;

    /// List all runs for a cluster, newest first
    async fn list_runs(&self, cluster_name: &str) -> Result<Vec<RunSummary>>;

    /// List all cluster names
    async fn list_clusters(&self) -> Result<Vec<String>>;
}

/// In-memory persistence (for testing or `--no-history` runs)
#[derive(Default)]
pub struct InMemoryPersistence {
    runs: RwLock<HashMap<Uuid, RunSummary>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_run(&self, run: &RunSummary) -> Result<()> {
        self.runs.write().await.insert(run.run_id, run.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        Ok(self.runs.read().await.get(&run_id).cloned())
    }

    async fn list_runs(&self, cluster_name: &str) -> Result<Vec<RunSummary>> {
        let runs = self.runs.read().await;
        let mut result: Vec<_> = runs
            .values()
            .filter(|r| r.cluster_name == cluster_name)
            .cloned()
            .collect();
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(result)
    }

    async fn list_clusters(&self) -> Result<Vec<String>> {
        let runs = self.runs.read().await;
        let mut names: Vec<_> = runs.values().map(|r| r.cluster_name.clone()).collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}

/// Create a summary from a finished run
pub fn create_summary(report: &RunReport) -> RunSummary {
    RunSummary {
        run_id: report.run_id,
        cluster_name: report.cluster.clone(),
        outcome: report.outcome,
        started_at: report.started_at,
        completed_at: report.completed_at,
        hosts_ready: report.hosts_ready(),
        hosts_total: report.workers.len() + 1,
        failed_hosts: report.failed_hosts(),
    }
}
