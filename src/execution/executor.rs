//! Stage executor - runs one stage's retry loop against a host

use crate::{
    core::{Host, MasterSignal, Stage, StageAction, StageResult, SyncGate, SyncPoint, TimeoutCause},
    core::retry::RetryDecision,
    error::ProvisionError,
    execution::{
        cancel::{Interrupted, RunSignal},
        engine::{EventBus, ExecutionEvent},
    },
    probe::ProbeExecutor,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};

/// Shared run state a stage may need
#[derive(Debug, Clone)]
pub struct StageEnv {
    /// Where the master publishes the join artifact
    pub sync_point: Option<SyncPoint>,

    /// Master pipeline status, consulted by join stages
    pub gate: SyncGate,

    pub signal: RunSignal,
}

impl StageEnv {
    /// Standalone environment: no sync point and an already-open gate
    pub fn new(signal: RunSignal) -> Self {
        Self {
            sync_point: None,
            gate: SyncGate::open(),
            signal,
        }
    }

    pub fn with_sync_point(mut self, sync_point: SyncPoint) -> Self {
        self.sync_point = Some(sync_point);
        self
    }

    pub fn with_gate(mut self, gate: SyncGate) -> Self {
        self.gate = gate;
        self
    }
}

/// Result of a single attempt
#[derive(Debug)]
enum Attempt {
    Ready,
    NotReady(String),
    /// The join artifact isn't there yet; not a failure of the host
    WaitingOnSync(String),
    Abort(String),
}

/// Executes a single stage
pub struct StageExecutor<P> {
    probes: Arc<P>,
    events: EventBus,
}

impl<P> Clone for StageExecutor<P> {
    fn clone(&self) -> Self {
        Self {
            probes: self.probes.clone(),
            events: self.events.clone(),
        }
    }
}

impl<P: ProbeExecutor> StageExecutor<P> {
    pub fn new(probes: Arc<P>) -> Self {
        Self {
            probes,
            events: EventBus::default(),
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// Poll the stage until it is ready, its policy runs out, or the run is interrupted
    pub async fn execute(&self, stage: &Stage, host: &Host, env: &StageEnv) -> StageResult {
        let policy = &stage.policy;
        let started = Instant::now();
        // A budget too large to represent is no budget
        let budget_deadline = policy
            .overall_timeout
            .and_then(|budget| started.checked_add(budget));
        let mut only_waited_on_sync = true;
        let mut attempt = 0;

        info!(host = %host.id, stage = %stage.name, "Starting stage");
        self.events.emit(ExecutionEvent::StageStarted {
            host: host.id.clone(),
            stage: stage.name.clone(),
        });

        loop {
            attempt += 1;

            let limit = attempt_limit(policy.attempt_timeout, policy.remaining(started.elapsed()));
            let outcome = match env
                .signal
                .guard(timeout(limit, self.attempt(stage, host, env)))
                .await
            {
                Err(interrupted) => return self.interrupted(stage, host, attempt, interrupted),
                Ok(Err(_elapsed)) => Attempt::NotReady(format!("attempt timed out after {:?}", limit)),
                Ok(Ok(outcome)) => outcome,
            };

            let (detail, waiting) = match outcome {
                Attempt::Ready => {
                    info!(host = %host.id, stage = %stage.name, attempt, "Stage ready");
                    self.events.emit(ExecutionEvent::StageReady {
                        host: host.id.clone(),
                        stage: stage.name.clone(),
                        attempts: attempt,
                    });
                    return StageResult::Ready {
                        attempts: attempt,
                        elapsed: started.elapsed(),
                    };
                }
                Attempt::Abort(reason) => return self.abort(stage, host, attempt, reason),
                Attempt::NotReady(detail) => {
                    only_waited_on_sync = false;
                    (detail, false)
                }
                Attempt::WaitingOnSync(detail) => (detail, true),
            };

            warn!(
                host = %host.id,
                stage = %stage.name,
                attempt,
                max_attempts = policy.max_attempts,
                "Attempt failed: {}",
                detail
            );
            self.events.emit(ExecutionEvent::AttemptFailed {
                host: host.id.clone(),
                stage: stage.name.clone(),
                attempt,
                max_attempts: policy.max_attempts,
                error: ProvisionError::probe(detail),
            });

            match policy.decide(attempt, started.elapsed()) {
                RetryDecision::Retry => {}
                RetryDecision::Exhausted => {
                    let cause = if stage.is_join() && only_waited_on_sync {
                        TimeoutCause::Synchronization
                    } else {
                        TimeoutCause::AttemptsExhausted
                    };
                    return self.timed_out(stage, host, attempt, cause);
                }
                RetryDecision::BudgetExceeded => {
                    return self.timed_out(stage, host, attempt, TimeoutCause::BudgetExceeded)
                }
            }

            if !waiting {
                if let Some(cleanup) = &stage.cleanup {
                    if let Err(interrupted) = self.cleanup(stage, host, cleanup, env).await {
                        return self.interrupted(stage, host, attempt, interrupted);
                    }
                }
            }

            // Never sleep past the stage budget
            let (pause, budget_hit) = match budget_deadline {
                Some(at) => {
                    let left = at.saturating_duration_since(Instant::now());
                    if policy.interval >= left {
                        (left, true)
                    } else {
                        (policy.interval, false)
                    }
                }
                None => (policy.interval, false),
            };

            let slept = if pause.is_zero() {
                tokio::task::yield_now().await;
                env.signal.check()
            } else {
                env.signal.sleep(pause).await
            };
            if let Err(interrupted) = slept {
                return self.interrupted(stage, host, attempt, interrupted);
            }
            if budget_hit {
                return self.timed_out(stage, host, attempt, TimeoutCause::BudgetExceeded);
            }
        }
    }

    async fn attempt(&self, stage: &Stage, host: &Host, env: &StageEnv) -> Attempt {
        match &stage.action {
            StageAction::Check(probe) => match self.probes.execute(probe, host).await {
                Ok(output) if probe.accepts(&output) => Attempt::Ready,
                Ok(output) => {
                    debug!(host = %host.id, stage = %stage.name, "Unmatched output: {}", output.stdout.trim());
                    Attempt::NotReady(format!("output did not match {}", probe.expected))
                }
                Err(e) => Attempt::NotReady(e.to_string()),
            },
            StageAction::Publish(probe) => {
                let Some(point) = &env.sync_point else {
                    return Attempt::Abort("no synchronization point configured".to_string());
                };
                match self.probes.execute(probe, host).await {
                    Ok(output) if probe.accepts(&output) => match point.publish(&output.stdout) {
                        Ok(()) => {
                            info!(host = %host.id, "Published '{}' to {}", point.name, point.path.display());
                            self.events.emit(ExecutionEvent::ArtifactPublished {
                                host: host.id.clone(),
                                point: point.name.clone(),
                            });
                            Attempt::Ready
                        }
                        Err(e) => Attempt::NotReady(e.to_string()),
                    },
                    Ok(_) => Attempt::NotReady(format!("output did not match {}", probe.expected)),
                    Err(e) => Attempt::NotReady(e.to_string()),
                }
            }
            StageAction::Join => {
                match env.gate.current() {
                    MasterSignal::Failed => {
                        return Attempt::Abort("master pipeline failed".to_string())
                    }
                    MasterSignal::Pending => {
                        return Attempt::WaitingOnSync("master pipeline not ready yet".to_string())
                    }
                    MasterSignal::Ready => {}
                }
                let Some(point) = &env.sync_point else {
                    return Attempt::Abort("no synchronization point configured".to_string());
                };
                match point.read() {
                    Ok(Some(command)) => match self.probes.run_command(&command, host).await {
                        Ok(_) => Attempt::Ready,
                        Err(e) => Attempt::NotReady(format!("join command failed: {}", e)),
                    },
                    Ok(None) => Attempt::WaitingOnSync(format!(
                        "synchronization point '{}' not published yet",
                        point.name
                    )),
                    Err(e) => Attempt::NotReady(e.to_string()),
                }
            }
        }
    }

    /// Reset the host before the next attempt; failures are only logged
    async fn cleanup(
        &self,
        stage: &Stage,
        host: &Host,
        command: &str,
        env: &StageEnv,
    ) -> Result<(), Interrupted> {
        let result = env
            .signal
            .guard(timeout(
                stage.policy.attempt_timeout,
                self.probes.run_command(command, host),
            ))
            .await?;

        let success = matches!(result, Ok(Ok(_)));
        match result {
            Ok(Ok(_)) => debug!(host = %host.id, stage = %stage.name, "Cleanup `{}` succeeded", command),
            Ok(Err(e)) => warn!(host = %host.id, stage = %stage.name, "Cleanup `{}` failed: {}", command, e),
            Err(_) => warn!(host = %host.id, stage = %stage.name, "Cleanup `{}` timed out", command),
        }
        self.events.emit(ExecutionEvent::CleanupRan {
            host: host.id.clone(),
            stage: stage.name.clone(),
            success,
        });
        Ok(())
    }

    fn timed_out(&self, stage: &Stage, host: &Host, attempts: u32, cause: TimeoutCause) -> StageResult {
        let result = StageResult::TimedOut { attempts, cause };
        if stage.critical {
            error!(host = %host.id, stage = %stage.name, "{}", result);
        } else {
            warn!(host = %host.id, stage = %stage.name, "{}", result);
        }
        self.events.emit(ExecutionEvent::StageTimedOut {
            host: host.id.clone(),
            stage: stage.name.clone(),
            attempts,
            critical: stage.critical,
        });
        result
    }

    fn abort(&self, stage: &Stage, host: &Host, attempts: u32, reason: String) -> StageResult {
        error!(host = %host.id, stage = %stage.name, attempts, "Stage aborted: {}", reason);
        self.events.emit(ExecutionEvent::StageAborted {
            host: host.id.clone(),
            stage: stage.name.clone(),
            reason: reason.clone(),
        });
        StageResult::Aborted { attempts, reason }
    }

    fn interrupted(&self, stage: &Stage, host: &Host, attempts: u32, why: Interrupted) -> StageResult {
        self.abort(stage, host, attempts, why.to_string())
    }
}

/// Bound for one probe invocation given the stage's remaining budget
pub fn attempt_limit(attempt_timeout: Duration, remaining: Option<Duration>) -> Duration {
    remaining.map_or(attempt_timeout, |left| left.min(attempt_timeout))
}
