//! Pipeline engine - runs one host's stages in order and reports the outcome

use crate::{
    core::{
        ClusterOutcome, Host, HostState, Pipeline, PipelineOutcome, StageRecord, StageResult,
        TimeoutCause,
    },
    error::ProvisionError,
    execution::{
        cancel::Interrupted,
        executor::{StageEnv, StageExecutor},
    },
    probe::ProbeExecutor,
};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Events that can occur during an orchestration run
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted {
        run_id: Uuid,
        cluster: String,
        hosts: usize,
        stages: usize,
    },
    HostStateChanged {
        host: String,
        from: HostState,
        to: HostState,
    },
    StageStarted {
        host: String,
        stage: String,
    },
    AttemptFailed {
        host: String,
        stage: String,
        attempt: u32,
        max_attempts: u32,
        error: ProvisionError,
    },
    StageReady {
        host: String,
        stage: String,
        attempts: u32,
    },
    StageTimedOut {
        host: String,
        stage: String,
        attempts: u32,
        critical: bool,
    },
    StageAborted {
        host: String,
        stage: String,
        reason: String,
    },
    ArtifactPublished {
        host: String,
        point: String,
    },
    CleanupRan {
        host: String,
        stage: String,
        success: bool,
    },
    RunCompleted {
        run_id: Uuid,
        outcome: ClusterOutcome,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Fans events out to every registered handler
#[derive(Clone, Default)]
pub struct EventBus {
    handlers: Arc<Vec<EventHandler>>,
}

impl EventBus {
    pub fn new(handlers: Vec<EventHandler>) -> Self {
        Self {
            handlers: Arc::new(handlers),
        }
    }

    /// Emit an event to all handlers
    pub fn emit(&self, event: ExecutionEvent) {
        for handler in self.handlers.iter() {
            handler(event.clone());
        }
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

/// Final state of one host's pipeline
#[derive(Debug, Clone, Serialize)]
pub struct HostReport {
    pub host: Host,
    pub state: HostState,
    /// Results of the stages that ran, in order
    pub stage_results: Vec<StageRecord>,
    /// Best-effort stages that timed out
    pub warnings: Vec<ProvisionError>,
    pub outcome: PipelineOutcome,
    pub failure: Option<ProvisionError>,
    pub elapsed: Duration,
}

impl HostReport {
    /// Report for a host whose pipeline never got to start
    pub fn not_started(host: Host, failure: ProvisionError) -> Self {
        Self {
            host,
            state: HostState::Failed,
            stage_results: Vec::new(),
            warnings: Vec::new(),
            outcome: PipelineOutcome::Aborted(failure.to_string()),
            failure: Some(failure),
            elapsed: Duration::ZERO,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == HostState::Ready
    }

    /// The stage that stopped the pipeline, if any
    pub fn aborting_stage(&self) -> Option<&StageRecord> {
        if self.is_ready() {
            return None;
        }
        self.stage_results
            .iter()
            .find(|record| match record.result {
                StageResult::Ready { .. } => false,
                StageResult::TimedOut { .. } => record.critical,
                StageResult::Aborted { .. } => true,
            })
    }

    /// One line for the user: host, state, and where provisioning stalled
    pub fn status_line(&self) -> String {
        match (self.state, self.aborting_stage()) {
            (HostState::Ready, _) if self.warnings.is_empty() => {
                format!("{}: Ready", self.host.id)
            }
            (HostState::Ready, _) => format!(
                "{}: Ready ({} best-effort stage(s) timed out)",
                self.host.id,
                self.warnings.len()
            ),
            (state, Some(record)) => format!(
                "{}: {} at stage '{}' after {} attempt(s)",
                self.host.id,
                state,
                record.stage,
                record.result.attempts()
            ),
            (state, None) => match &self.outcome {
                PipelineOutcome::Aborted(reason) => format!("{}: {} ({})", self.host.id, state, reason),
                PipelineOutcome::Ready => format!("{}: {}", self.host.id, state),
            },
        }
    }
}

/// Runs a host's pipeline stage by stage
pub struct PipelineRunner<P> {
    executor: Arc<StageExecutor<P>>,
    events: EventBus,
}

impl<P> Clone for PipelineRunner<P> {
    fn clone(&self) -> Self {
        Self {
            executor: self.executor.clone(),
            events: self.events.clone(),
        }
    }
}

impl<P: ProbeExecutor> PipelineRunner<P> {
    pub fn new(executor: Arc<StageExecutor<P>>, events: EventBus) -> Self {
        Self { executor, events }
    }

    /// Run every stage in declared order; stops at the first critical failure
    pub async fn run(&self, pipeline: &Pipeline, env: &StageEnv) -> HostReport {
        let host = &pipeline.host;
        let started = Instant::now();

        info!("Provisioning {} ({} stages)", host.id, pipeline.len());
        self.transition(host, HostState::Pending, HostState::Provisioning);

        let mut stage_results = Vec::with_capacity(pipeline.len());
        let mut warnings = Vec::new();
        let mut outcome = PipelineOutcome::Ready;
        let mut failure = None;

        for stage in &pipeline.stages {
            // No stage starts once the run is interrupted
            if let Err(interrupted) = env.signal.check() {
                warn!("{}: not starting stage '{}': {}", host.id, stage.name, interrupted);
                outcome = PipelineOutcome::Aborted(interrupted.to_string());
                failure = Some(interruption_error(interrupted));
                break;
            }

            let result = self.executor.execute(stage, host, env).await;
            stage_results.push(StageRecord {
                stage: stage.name.clone(),
                critical: stage.critical,
                result: result.clone(),
            });

            match result {
                StageResult::Ready { .. } => {}
                StageResult::TimedOut { attempts, .. } if !stage.critical => {
                    warn!(
                        "{}: best-effort stage '{}' timed out after {} attempt(s), continuing",
                        host.id, stage.name, attempts
                    );
                    warnings.push(ProvisionError::StageTimeout {
                        stage: stage.name.clone(),
                        attempts,
                    });
                }
                StageResult::TimedOut { attempts, cause } => {
                    error!(
                        "{}: critical stage '{}' timed out after {} attempt(s)",
                        host.id, stage.name, attempts
                    );
                    let error = match (cause, &env.sync_point) {
                        (TimeoutCause::Synchronization, Some(point)) => {
                            ProvisionError::SynchronizationTimeout {
                                host: host.id.clone(),
                                stage: stage.name.clone(),
                                point: point.name.clone(),
                                attempts,
                            }
                        }
                        _ => ProvisionError::PipelineAborted {
                            host: host.id.clone(),
                            stage: stage.name.clone(),
                            attempts,
                            reason: format!("stage {}", result_summary(cause)),
                        },
                    };
                    outcome = PipelineOutcome::Aborted(format!("{} failed", stage.name));
                    failure = Some(error);
                    break;
                }
                StageResult::Aborted { attempts, reason } => {
                    error!("{}: stage '{}' aborted: {}", host.id, stage.name, reason);
                    let error = match env.signal.check() {
                        Err(interrupted) => interruption_error(interrupted),
                        Ok(()) => ProvisionError::PipelineAborted {
                            host: host.id.clone(),
                            stage: stage.name.clone(),
                            attempts,
                            reason: reason.clone(),
                        },
                    };
                    outcome = PipelineOutcome::Aborted(reason);
                    failure = Some(error);
                    break;
                }
            }
        }

        let state = if outcome.is_ready() {
            HostState::Ready
        } else {
            HostState::Failed
        };
        self.transition(host, HostState::Provisioning, state);

        HostReport {
            host: host.clone(),
            state,
            stage_results,
            warnings,
            outcome,
            failure,
            elapsed: started.elapsed(),
        }
    }

    fn transition(&self, host: &Host, from: HostState, to: HostState) {
        debug_assert!(from.can_transition_to(to));
        info!("{}: {} -> {}", host.id, from, to);
        self.events.emit(ExecutionEvent::HostStateChanged {
            host: host.id.clone(),
            from,
            to,
        });
    }
}

pub(crate) fn interruption_error(interrupted: Interrupted) -> ProvisionError {
    match interrupted {
        Interrupted::DeadlineExceeded => ProvisionError::DeadlineExceeded,
        Interrupted::Cancelled => ProvisionError::Cancelled,
    }
}

fn result_summary(cause: TimeoutCause) -> &'static str {
    match cause {
        TimeoutCause::AttemptsExhausted => "exhausted its attempts",
        TimeoutCause::BudgetExceeded => "exceeded its time budget",
        TimeoutCause::Synchronization => "never saw the synchronization point",
    }
}
