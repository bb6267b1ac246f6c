//! Errors reported by an orchestration run

use serde::Serialize;
use thiserror::Error;

/// Why a host (or the whole run) did not reach Ready
///
/// Probe failures never escape a stage on their own: they are recorded as
/// failed attempts and surface only through the variants below.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProvisionError {
    /// A single probe attempt failed (reported in attempt events)
    #[error("probe failed: {detail}")]
    ProbeFailure { detail: String },

    /// A best-effort stage ran out of attempts; the pipeline went on
    #[error("stage '{stage}' timed out after {attempts} attempt(s)")]
    StageTimeout { stage: String, attempts: u32 },

    /// A critical stage failed and the host's pipeline stopped
    #[error("pipeline on {host} aborted at stage '{stage}' after {attempts} attempt(s): {reason}")]
    PipelineAborted {
        host: String,
        stage: String,
        attempts: u32,
        reason: String,
    },

    /// A worker never saw the master's join artifact
    #[error("{host} gave up waiting for synchronization point '{point}' at stage '{stage}' after {attempts} attempt(s)")]
    SynchronizationTimeout {
        host: String,
        stage: String,
        point: String,
        attempts: u32,
    },

    /// The run-wide deadline passed
    #[error("run deadline exceeded")]
    DeadlineExceeded,

    /// The run was cancelled by the operator or by a failing worker
    #[error("run cancelled")]
    Cancelled,
}

impl ProvisionError {
    pub fn probe(detail: impl Into<String>) -> Self {
        ProvisionError::ProbeFailure {
            detail: detail.into(),
        }
    }

    /// Run-level interruptions rather than failures of the host itself
    pub fn is_interruption(&self) -> bool {
        matches!(
            self,
            ProvisionError::DeadlineExceeded | ProvisionError::Cancelled
        )
    }
}
