//! Orchestrator - runs the master and worker pipelines of a cluster plan

use crate::{
    core::{ClusterOutcome, ClusterPlan, Host, MasterSignal, Pipeline, SyncGate, WorkerFailurePolicy},
    error::ProvisionError,
    execution::{
        cancel::RunSignal,
        engine::{interruption_error, EventBus, EventHandler, ExecutionEvent, HostReport, PipelineRunner},
        executor::{StageEnv, StageExecutor},
        scheduler::{SchedulingStrategy, WorkerScheduler},
    },
    probe::ProbeExecutor,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Run-wide settings
#[derive(Debug, Clone, Default)]
pub struct OrchestratorOptions {
    /// Deadline for the whole run
    pub deadline: Option<Duration>,

    pub worker_failure: WorkerFailurePolicy,

    pub strategy: SchedulingStrategy,
}

impl OrchestratorOptions {
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_worker_failure(mut self, policy: WorkerFailurePolicy) -> Self {
        self.worker_failure = policy;
        self
    }

    pub fn with_strategy(mut self, strategy: SchedulingStrategy) -> Self {
        self.strategy = strategy;
        self
    }
}

/// Result of one orchestration run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub cluster: String,
    pub outcome: ClusterOutcome,
    /// Why the run is not Ready
    pub error: Option<ProvisionError>,
    pub master: HostReport,
    pub workers: Vec<HostReport>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn hosts(&self) -> impl Iterator<Item = &HostReport> {
        std::iter::once(&self.master).chain(self.workers.iter())
    }

    pub fn hosts_ready(&self) -> usize {
        self.hosts().filter(|h| h.is_ready()).count()
    }

    pub fn failed_hosts(&self) -> Vec<String> {
        self.hosts()
            .filter(|h| !h.is_ready())
            .map(|h| h.host.id.clone())
            .collect()
    }

    pub fn host(&self, id: &str) -> Option<&HostReport> {
        self.hosts().find(|h| h.host.id == id)
    }
}

/// Drives a cluster plan to a Ready / Degraded / Failed outcome
pub struct Orchestrator<P> {
    probes: Arc<P>,
    options: OrchestratorOptions,
    handlers: Vec<EventHandler>,
}

impl<P: ProbeExecutor + 'static> Orchestrator<P> {
    pub fn new(probes: P, options: OrchestratorOptions) -> Self {
        Self::with_shared_probes(Arc::new(probes), options)
    }

    pub fn with_shared_probes(probes: Arc<P>, options: OrchestratorOptions) -> Self {
        Self {
            probes,
            options,
            handlers: Vec::new(),
        }
    }

    /// Add an event handler
    pub fn with_event_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.handlers.push(Arc::new(handler));
        self
    }

    pub fn options(&self) -> &OrchestratorOptions {
        &self.options
    }

    /// Run the plan with the configured deadline
    pub async fn run(&self, plan: &ClusterPlan) -> RunReport {
        self.run_with_signal(plan, RunSignal::new(self.options.deadline))
            .await
    }

    /// Run the plan under an externally owned signal (e.g. cancelled on Ctrl-C)
    pub async fn run_with_signal(&self, plan: &ClusterPlan, signal: RunSignal) -> RunReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let started = Instant::now();
        let events = EventBus::new(self.handlers.clone());

        info!(
            "Starting run {} for cluster '{}' ({} workers)",
            run_id,
            plan.name,
            plan.workers.len()
        );
        events.emit(ExecutionEvent::RunStarted {
            run_id,
            cluster: plan.name.clone(),
            hosts: plan.workers.len() + 1,
            stages: plan.total_stages(),
        });

        let executor = Arc::new(StageExecutor::new(self.probes.clone()).with_events(events.clone()));
        let runner = PipelineRunner::new(executor, events.clone());
        let gate = SyncGate::new();
        let mut env = StageEnv::new(signal.clone()).with_gate(gate.clone());
        env.sync_point = plan.sync_point.clone();
        if let Some(point) = plan.sync_point.as_ref().filter(|p| p.is_published()) {
            // Workers only read it after the master signals, by then it is replaced
            warn!(
                "Join artifact {} is left over from an earlier run",
                point.path().display()
            );
        }

        let master_task = {
            let runner = runner.clone();
            let env = env.clone();
            let pipeline = plan.master.clone();
            let gate = gate.clone();
            tokio::spawn(async move {
                let report = runner.run(&pipeline, &env).await;
                gate.signal(if report.is_ready() {
                    MasterSignal::Ready
                } else {
                    MasterSignal::Failed
                });
                report
            })
        };

        let scheduler = WorkerScheduler::new(self.options.strategy, plan.workers.len());
        let fail_run_triggered = Arc::new(AtomicBool::new(false));
        let worker_tasks: Vec<(Host, JoinHandle<HostReport>)> = plan
            .workers
            .iter()
            .cloned()
            .map(|pipeline| {
                let host = pipeline.host.clone();
                let task = self.spawn_worker(
                    pipeline,
                    runner.clone(),
                    env.clone(),
                    scheduler.clone(),
                    events.clone(),
                    fail_run_triggered.clone(),
                );
                (host, task)
            })
            .collect();

        let master = match master_task.await {
            Ok(report) => report,
            Err(e) => {
                error!("Master pipeline task failed: {}", e);
                gate.signal(MasterSignal::Failed);
                crashed(plan.master.host.clone(), &e.to_string())
            }
        };

        let mut workers = Vec::with_capacity(worker_tasks.len());
        for (host, task) in worker_tasks {
            let report = match task.await {
                Ok(report) => report,
                Err(e) => {
                    error!("Worker pipeline task for {} failed: {}", host.id, e);
                    crashed(host, &e.to_string())
                }
            };
            workers.push(report);
        }

        let externally_cancelled = signal.is_cancelled() && !fail_run_triggered.load(Ordering::SeqCst);
        let (outcome, error) = aggregate(
            &master,
            &workers,
            self.options.worker_failure,
            externally_cancelled,
        );

        match outcome {
            ClusterOutcome::Ready => info!("Cluster '{}' is Ready", plan.name),
            ClusterOutcome::Degraded => warn!(
                "Cluster '{}' is Degraded: {}",
                plan.name,
                error.as_ref().map(ToString::to_string).unwrap_or_default()
            ),
            ClusterOutcome::Failed => error!(
                "Cluster '{}' Failed: {}",
                plan.name,
                error.as_ref().map(ToString::to_string).unwrap_or_default()
            ),
        }
        events.emit(ExecutionEvent::RunCompleted { run_id, outcome });

        RunReport {
            run_id,
            cluster: plan.name.clone(),
            outcome,
            error,
            master,
            workers,
            started_at,
            completed_at: Utc::now(),
            elapsed: started.elapsed(),
        }
    }

    fn spawn_worker(
        &self,
        pipeline: Pipeline,
        runner: PipelineRunner<P>,
        env: StageEnv,
        scheduler: WorkerScheduler,
        events: EventBus,
        fail_run_triggered: Arc<AtomicBool>,
    ) -> JoinHandle<HostReport> {
        let policy = self.options.worker_failure;
        tokio::spawn(async move {
            let _slot = match scheduler.admit(&env.signal).await {
                Ok(slot) => slot,
                Err(interrupted) => {
                    warn!("{}: pipeline never started: {}", pipeline.host.id, interrupted);
                    let report = HostReport::not_started(pipeline.host, interruption_error(interrupted));
                    events.emit(ExecutionEvent::HostStateChanged {
                        host: report.host.id.clone(),
                        from: crate::core::HostState::Pending,
                        to: report.state,
                    });
                    return report;
                }
            };

            let report = runner.run(&pipeline, &env).await;

            let own_failure = report
                .failure
                .as_ref()
                .is_some_and(|failure| !failure.is_interruption());
            if policy == WorkerFailurePolicy::FailRun && own_failure {
                warn!("{} failed; cancelling the run", report.host.id);
                fail_run_triggered.store(true, Ordering::SeqCst);
                env.signal.cancel();
            }
            report
        })
    }
}

fn crashed(host: Host, reason: &str) -> HostReport {
    let id = host.id.clone();
    HostReport::not_started(
        host,
        ProvisionError::PipelineAborted {
            host: id,
            stage: String::new(),
            attempts: 0,
            reason: format!("pipeline task failed: {}", reason),
        },
    )
}

/// Combine host reports into the cluster outcome
///
/// Precedence: deadline, external cancellation, a worker that failed the
/// run, the master, then the remaining workers.
pub fn aggregate(
    master: &HostReport,
    workers: &[HostReport],
    policy: WorkerFailurePolicy,
    externally_cancelled: bool,
) -> (ClusterOutcome, Option<ProvisionError>) {
    let all = || std::iter::once(master).chain(workers.iter());

    if all().any(|h| h.failure == Some(ProvisionError::DeadlineExceeded)) {
        return (ClusterOutcome::Failed, Some(ProvisionError::DeadlineExceeded));
    }
    if externally_cancelled && all().any(|h| !h.is_ready()) {
        return (ClusterOutcome::Failed, Some(ProvisionError::Cancelled));
    }

    let first_worker_failure = workers
        .iter()
        .filter(|w| !w.is_ready())
        .filter_map(|w| w.failure.clone())
        .find(|failure| !failure.is_interruption());

    if policy == WorkerFailurePolicy::FailRun {
        if let Some(failure) = first_worker_failure.clone() {
            return (ClusterOutcome::Failed, Some(failure));
        }
    }

    if !master.is_ready() {
        return (ClusterOutcome::Failed, master.failure.clone());
    }

    let failed = workers.iter().filter(|w| !w.is_ready()).count();
    if failed == 0 {
        return (ClusterOutcome::Ready, None);
    }

    let error = first_worker_failure.or_else(|| {
        workers
            .iter()
            .filter(|w| !w.is_ready())
            .find_map(|w| w.failure.clone())
    });
    // A ready control plane is never Failed on worker results alone
    if policy == WorkerFailurePolicy::FailRun {
        (ClusterOutcome::Failed, error)
    } else {
        (ClusterOutcome::Degraded, error)
    }
}
