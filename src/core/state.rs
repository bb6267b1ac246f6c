//! Execution state models

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Why a stage gave up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeoutCause {
    /// `max_attempts` probes ran without success
    AttemptsExhausted,
    /// The stage's overall time budget ran out
    BudgetExceeded,
    /// Every attempt was spent waiting for the master's join artifact
    Synchronization,
}

/// Result of running one stage (immutable once produced)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StageResult {
    /// Probe succeeded on attempt `attempts`
    Ready { attempts: u32, elapsed: Duration },
    /// Policy exhausted without success
    TimedOut { attempts: u32, cause: TimeoutCause },
    /// Stopped early: deadline, cancellation, or an upstream failure
    Aborted { attempts: u32, reason: String },
}

impl StageResult {
    pub fn is_ready(&self) -> bool {
        matches!(self, StageResult::Ready { .. })
    }

    /// Number of attempts used (1-indexed count)
    pub fn attempts(&self) -> u32 {
        match self {
            StageResult::Ready { attempts, .. }
            | StageResult::TimedOut { attempts, .. }
            | StageResult::Aborted { attempts, .. } => *attempts,
        }
    }
}

impl fmt::Display for StageResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageResult::Ready { attempts, elapsed } => {
                write!(f, "Ready after {} attempt(s) in {:.1}s", attempts, elapsed.as_secs_f64())
            }
            StageResult::TimedOut { attempts, cause } => {
                let why = match cause {
                    TimeoutCause::AttemptsExhausted => "attempts exhausted",
                    TimeoutCause::BudgetExceeded => "time budget exceeded",
                    TimeoutCause::Synchronization => "synchronization point never became available",
                };
                write!(f, "TimedOut after {} attempt(s): {}", attempts, why)
            }
            StageResult::Aborted { attempts, reason } => {
                write!(f, "Aborted after {} attempt(s): {}", attempts, reason)
            }
        }
    }
}

/// Result of one stage inside a pipeline report
#[derive(Debug, Clone, Serialize)]
pub struct StageRecord {
    pub stage: String,
    pub critical: bool,
    pub result: StageResult,
}

/// Terminal outcome of a host's pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PipelineOutcome {
    Ready,
    Aborted(String),
}

impl PipelineOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, PipelineOutcome::Ready)
    }
}

/// Aggregate result of an orchestration run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterOutcome {
    /// Master and every worker are ready
    Ready,
    /// Master is ready but some workers failed to join
    Degraded,
    /// Master failed, the run was aborted, or no worker joined
    Failed,
}

impl ClusterOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterOutcome::Ready => "Ready",
            ClusterOutcome::Degraded => "Degraded",
            ClusterOutcome::Failed => "Failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Ready" => Some(ClusterOutcome::Ready),
            "Degraded" => Some(ClusterOutcome::Degraded),
            "Failed" => Some(ClusterOutcome::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for ClusterOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a worker failure does to the whole run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkerFailurePolicy {
    /// Failed workers leave the cluster `Degraded`
    #[default]
    Isolate,
    /// Any worker failure fails the run and cancels the remaining workers
    FailRun,
}
