//! Host model

use serde::{Deserialize, Serialize};
use std::fmt;

/// Role a host plays in the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostRole {
    /// Control-plane node; publishes the join artifact
    Master,
    /// Node that joins the cluster using the master's artifact
    Worker,
}

impl HostRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostRole::Master => "master",
            HostRole::Worker => "worker",
        }
    }
}

impl fmt::Display for HostRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A target machine a pipeline runs against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    /// Unique host identifier (e.g. the Vagrant machine name)
    pub id: String,

    /// Role of the host
    pub role: HostRole,

    /// Network address, used by probes and templates
    pub address: String,

    /// Command prefix used to run probe commands on the host,
    /// e.g. `["vagrant", "ssh", "k8s-master", "-c"]`.
    /// Empty means commands run locally through `sh -c`.
    #[serde(default)]
    pub shell: Vec<String>,
}

impl Host {
    pub fn new(id: impl Into<String>, role: HostRole, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            address: address.into(),
            shell: Vec::new(),
        }
    }

    pub fn with_shell<I, S>(mut self, shell: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.shell = shell.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_master(&self) -> bool {
        self.role == HostRole::Master
    }
}

/// Provisioning state of a host during a run
///
/// `Pending -> Provisioning -> Ready` or `Pending -> Provisioning -> Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostState {
    Pending,
    Provisioning,
    Ready,
    Failed,
}

impl HostState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, HostState::Ready | HostState::Failed)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    /// A host that never got to start (deadline hit while queued) may go
    /// straight from `Pending` to `Failed`.
    pub fn can_transition_to(&self, next: HostState) -> bool {
        matches!(
            (self, next),
            (HostState::Pending, HostState::Provisioning)
                | (HostState::Pending, HostState::Failed)
                | (HostState::Provisioning, HostState::Ready)
                | (HostState::Provisioning, HostState::Failed)
        )
    }
}

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HostState::Pending => "Pending",
            HostState::Provisioning => "Provisioning",
            HostState::Ready => "Ready",
            HostState::Failed => "Failed",
        };
        f.write_str(s)
    }
}
