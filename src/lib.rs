//! stagegate - stage-gated readiness orchestration for multi-host provisioning

pub mod cli;
pub mod core;
pub mod error;
pub mod execution;
pub mod persistence;
pub mod probe;

// Re-export commonly used types
pub use core::{
    ClusterOutcome, ClusterPlan, Host, HostRole, HostState, Pipeline, Probe, RetryPolicy, Stage,
    StageResult, SyncPoint, WorkerFailurePolicy,
};
pub use error::ProvisionError;
pub use execution::{
    ExecutionEvent, HostReport, Orchestrator, OrchestratorOptions, RunReport, RunSignal,
    SchedulingStrategy, StageExecutor,
};
pub use probe::{ProbeError, ProbeExecutor, ShellProbeExecutor};
