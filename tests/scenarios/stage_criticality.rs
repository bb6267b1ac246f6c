//! Critical and best-effort stages inside one host pipeline

use crate::helpers::*;
use stagegate::core::{HostState, Pipeline, PipelineOutcome, Probe, Stage, StageResult};
use stagegate::execution::{
    EventBus, EventHandler, ExecutionEvent, PipelineRunner, RunSignal, StageEnv, StageExecutor,
};
use stagegate::ProvisionError;
use std::sync::{Arc, Mutex};

const SWAP: &str = "swapon --show";
const NTP: &str = "timedatectl show -p NTPSynchronized";
const API: &str = "192.168.56.10:6443";
const ETCD: &str = "etcdctl endpoint health";

fn runner(probes: Arc<MockProbeExecutor>) -> PipelineRunner<MockProbeExecutor> {
    PipelineRunner::new(Arc::new(StageExecutor::new(probes)), EventBus::default())
}

fn master_checks() -> Pipeline {
    Pipeline::new(master_host(), vec![
        Stage::check("swap-disabled", Probe::command(SWAP)).with_policy(policy(3)),
        Stage::check("ntp-synced", Probe::command(NTP)).with_policy(policy(2)).best_effort(),
        Stage::check("api-server", Probe::port(API)).with_policy(policy(3)),
        Stage::check("etcd-healthy", Probe::command(ETCD)).with_policy(policy(3)),
    ])
}

#[tokio::test(start_paused = true)]
async fn test_best_effort_timeout_does_not_stop_the_pipeline() {
    let probes = MockProbeExecutor::new().on(NTP, vec![fail("NTPSynchronized=no")]).shared();

    let report = runner(probes.clone())
        .run(&master_checks(), &StageEnv::new(RunSignal::unbounded()))
        .await;

    assert_eq!(report.state, HostState::Ready);
    assert_eq!(report.outcome, PipelineOutcome::Ready);
    assert_eq!(report.stage_results.len(), 4);
    assert_eq!(
        report.warnings,
        vec![ProvisionError::StageTimeout {
            stage: "ntp-synced".to_string(),
            attempts: 2
        }]
    );
    assert_eq!(probes.count(NTP), 2);
    assert_eq!(probes.count(ETCD), 1);
    assert_eq!(report.status_line(), "k8s-master: Ready (1 best-effort stage(s) timed out)");
}

#[tokio::test(start_paused = true)]
async fn test_critical_timeout_stops_the_pipeline() {
    let probes = MockProbeExecutor::new().on(API, vec![fail("connection refused")]).shared();

    let report = runner(probes.clone())
        .run(&master_checks(), &StageEnv::new(RunSignal::unbounded()))
        .await;

    assert_eq!(report.state, HostState::Failed);
    assert_eq!(report.outcome, PipelineOutcome::Aborted("api-server failed".to_string()));
    assert!(matches!(
        report.failure,
        Some(ProvisionError::PipelineAborted { ref stage, attempts: 3, .. }) if stage == "api-server"
    ));

    // Stages after the failing one never run
    assert_eq!(probes.count(ETCD), 0);
    let ran: Vec<_> = report.stage_results.iter().map(|r| r.stage.as_str()).collect();
    assert_eq!(ran, vec!["swap-disabled", "ntp-synced", "api-server"]);
    assert_eq!(report.status_line(), "k8s-master: Failed at stage 'api-server' after 3 attempt(s)");
}

#[tokio::test(start_paused = true)]
async fn test_stages_run_in_declared_order() {
    let probes = MockProbeExecutor::new().shared();

    let report = runner(probes.clone())
        .run(&master_checks(), &StageEnv::new(RunSignal::unbounded()))
        .await;

    assert!(report.is_ready());
    let order: Vec<_> = probes.calls().into_iter().map(|c| c.spec).collect();
    assert_eq!(order, vec![SWAP, NTP, API, ETCD]);
    assert!(report
        .stage_results
        .iter()
        .all(|r| matches!(r.result, StageResult::Ready { attempts: 1, .. })));
}

#[tokio::test(start_paused = true)]
async fn test_host_state_transitions_are_reported() {
    let transitions = Arc::new(Mutex::new(Vec::new()));
    let events = {
        let transitions = transitions.clone();
        let handler: EventHandler = Arc::new(move |event: ExecutionEvent| {
            if let ExecutionEvent::HostStateChanged { from, to, .. } = event {
                transitions.lock().unwrap().push((from, to));
            }
        });
        EventBus::new(vec![handler])
    };
    let probes = MockProbeExecutor::new().on(ETCD, vec![fail("unhealthy")]).shared();
    let executor = Arc::new(StageExecutor::new(probes).with_events(events.clone()));

    PipelineRunner::new(executor, events)
        .run(&master_checks(), &StageEnv::new(RunSignal::unbounded()))
        .await;

    assert_eq!(
        *transitions.lock().unwrap(),
        vec![
            (HostState::Pending, HostState::Provisioning),
            (HostState::Provisioning, HostState::Failed),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_run_starts_no_further_stages() {
    let probes = MockProbeExecutor::new().on(API, vec![fail("connection refused")]).shared();
    let signal = RunSignal::unbounded();
    let env = StageEnv::new(signal.clone());

    let cancel = tokio::spawn(async move {
        // api-server is retrying at this point
        tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
        signal.cancel();
    });
    let report = runner(probes.clone()).run(&master_checks(), &env).await;
    cancel.await.unwrap();

    assert_eq!(report.failure, Some(ProvisionError::Cancelled));
    assert_eq!(probes.count(API), 2);
    assert_eq!(probes.count(ETCD), 0);
}
