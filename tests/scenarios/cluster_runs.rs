//! Whole-cluster runs: Ready, Degraded, Failed

use crate::helpers::*;
use stagegate::core::{ClusterOutcome, HostState, Pipeline, Probe, RetryPolicy, Stage, WorkerFailurePolicy};
use stagegate::execution::{
    ExecutionEvent, Orchestrator, OrchestratorOptions, RunSignal, SchedulingStrategy,
};
use stagegate::ProvisionError;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const PING: &str = "ping -c 1 192.168.56.10";

#[tokio::test(start_paused = true)]
async fn test_everything_ready_on_first_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let plan = cluster(&dir, 2);
    let probes = healthy_probes().shared();

    let report = run(&plan, probes.clone(), OrchestratorOptions::default()).await;

    assert_outcome(&report, ClusterOutcome::Ready);
    assert!(report.error.is_none());
    assert_eq!(report.hosts_ready(), 3);
    assert!(report.failed_hosts().is_empty());
    for host in report.hosts() {
        assert_eq!(host.state, HostState::Ready);
        assert!(host.stage_results.iter().all(|r| r.result.attempts() == 1));
    }
    assert_eq!(report.elapsed, Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_worker_that_cannot_join_degrades_the_cluster() {
    let dir = tempfile::tempdir().unwrap();
    let plan = cluster(&dir, 2);
    let probes = healthy_probes()
        .on_host("k8s-worker-2", JOIN_COMMAND, vec![fail("preflight: port 10250 in use")])
        .shared();

    let report = run(&plan, probes.clone(), OrchestratorOptions::default()).await;

    assert_outcome(&report, ClusterOutcome::Degraded);
    assert!(report.master.is_ready());
    assert!(report.host("k8s-worker-1").unwrap().is_ready());

    let failed = report.host("k8s-worker-2").unwrap();
    assert_eq!(failed.state, HostState::Failed);
    assert_eq!(
        failed.status_line(),
        "k8s-worker-2: Failed at stage 'join-cluster' after 10 attempt(s)"
    );
    assert_eq!(probes.count_on("k8s-worker-2", JOIN_COMMAND), 10);
    // Reset after every failed join but the last
    assert_eq!(probes.count_on("k8s-worker-2", "kubeadm reset -f"), 9);
    assert_eq!(probes.count_on("k8s-worker-2", "systemctl is-active kubelet"), 0);
    assert_eq!(report.failed_hosts(), vec!["k8s-worker-2".to_string()]);
    assert!(matches!(
        report.error,
        Some(ProvisionError::PipelineAborted { ref host, attempts: 10, .. }) if host == "k8s-worker-2"
    ));
}

#[tokio::test(start_paused = true)]
async fn test_deadline_interrupts_a_sleeping_stage() {
    let dir = tempfile::tempdir().unwrap();
    let master = Pipeline::new(master_host(), vec![Stage::check(
        "api-server",
        Probe::port("192.168.56.10:6443"),
    )
    .with_policy(RetryPolicy::new(30, Duration::from_secs(10)))]);
    let plan = cluster(&dir, 1);
    let plan = stagegate::core::ClusterPlan { master, ..plan };
    let probes = MockProbeExecutor::new()
        .on("192.168.56.10:6443", vec![fail("connection refused")])
        .shared();

    let options = OrchestratorOptions::default().with_deadline(Some(Duration::from_secs(5)));
    let report = run(&plan, probes.clone(), options).await;

    assert_outcome(&report, ClusterOutcome::Failed);
    assert_eq!(report.error, Some(ProvisionError::DeadlineExceeded));
    assert_eq!(report.elapsed, Duration::from_secs(5));
    assert_eq!(probes.count("192.168.56.10:6443"), 1);
    assert_eq!(report.master.failure, Some(ProvisionError::DeadlineExceeded));
    assert_eq!(report.workers[0].failure, Some(ProvisionError::DeadlineExceeded));
}

#[tokio::test(start_paused = true)]
async fn test_fail_run_policy_cancels_remaining_workers() {
    let dir = tempfile::tempdir().unwrap();
    let plan = cluster(&dir, 2);
    // worker-1 can never reach the master; worker-2 would join eventually
    let probes = healthy_probes()
        .on_host("k8s-worker-1", PING, vec![fail("100% packet loss")])
        .on_host("k8s-worker-2", JOIN_COMMAND, succeed_on(30, ""))
        .shared();

    let options = OrchestratorOptions::default().with_worker_failure(WorkerFailurePolicy::FailRun);
    let report = run(&plan, probes.clone(), options).await;

    assert_outcome(&report, ClusterOutcome::Failed);
    assert!(matches!(
        report.error,
        Some(ProvisionError::PipelineAborted { ref host, ref stage, .. })
            if host == "k8s-worker-1" && stage == "master-reachable"
    ));
    assert_eq!(report.host("k8s-worker-2").unwrap().failure, Some(ProvisionError::Cancelled));
    // worker-1 gave up after 5 pings (4s); worker-2 stopped retrying then
    assert!(probes.count_on("k8s-worker-2", JOIN_COMMAND) < 10);
}

#[tokio::test(start_paused = true)]
async fn test_isolate_policy_lets_other_workers_finish() {
    let dir = tempfile::tempdir().unwrap();
    let plan = cluster(&dir, 2);
    let probes = healthy_probes()
        .on_host("k8s-worker-1", PING, vec![fail("100% packet loss")])
        .on_host("k8s-worker-2", JOIN_COMMAND, succeed_on(8, ""))
        .shared();

    let report = run(&plan, probes.clone(), OrchestratorOptions::default()).await;

    assert_outcome(&report, ClusterOutcome::Degraded);
    assert!(report.host("k8s-worker-2").unwrap().is_ready());
    assert_eq!(probes.count_on("k8s-worker-2", JOIN_COMMAND), 8);
}

#[tokio::test(start_paused = true)]
async fn test_ready_master_with_no_workers_joined_is_degraded() {
    let dir = tempfile::tempdir().unwrap();
    let plan = cluster(&dir, 2);
    let probes = healthy_probes()
        .on(PING, vec![fail("100% packet loss")])
        .shared();

    let report = run(&plan, probes.clone(), OrchestratorOptions::default()).await;

    assert_outcome(&report, ClusterOutcome::Degraded);
    assert!(report.master.is_ready());
    assert_eq!(report.hosts_ready(), 1);
    assert_eq!(report.failed_hosts().len(), 2);

    // The same hosts under fail-run take the whole run down
    let options = OrchestratorOptions::default().with_worker_failure(WorkerFailurePolicy::FailRun);
    let dir = tempfile::tempdir().unwrap();
    let report = run(&cluster(&dir, 2), probes, options).await;
    assert_outcome(&report, ClusterOutcome::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_sequential_strategy_runs_one_worker_at_a_time() {
    let dir = tempfile::tempdir().unwrap();
    let plan = cluster(&dir, 3);
    // Each worker needs 2s in master-reachable
    let probes = healthy_probes()
        .on_host("k8s-worker-1", PING, succeed_on(3, ""))
        .on_host("k8s-worker-2", PING, succeed_on(3, ""))
        .on_host("k8s-worker-3", PING, succeed_on(3, ""))
        .shared();

    let options = OrchestratorOptions::default().with_strategy(SchedulingStrategy::Sequential);
    let report = run(&plan, probes.clone(), options).await;

    assert_outcome(&report, ClusterOutcome::Ready);
    let starts: Vec<_> = (1..=3)
        .map(|n| probes.first_call(&worker_host(n).id, PING).unwrap())
        .collect();
    assert_eq!(
        starts,
        vec![Duration::ZERO, Duration::from_secs(2), Duration::from_secs(4)]
    );
    assert_eq!(report.elapsed, Duration::from_secs(6));
}

#[tokio::test(start_paused = true)]
async fn test_parallel_strategy_overlaps_workers() {
    let dir = tempfile::tempdir().unwrap();
    let plan = cluster(&dir, 3);
    let probes = healthy_probes()
        .on_host("k8s-worker-1", PING, succeed_on(3, ""))
        .on_host("k8s-worker-2", PING, succeed_on(3, ""))
        .on_host("k8s-worker-3", PING, succeed_on(3, ""))
        .shared();

    let report = run(&plan, probes.clone(), OrchestratorOptions::default()).await;

    assert_outcome(&report, ClusterOutcome::Ready);
    for n in 1..=3 {
        assert_eq!(probes.first_call(&worker_host(n).id, PING), Some(Duration::ZERO));
    }
    assert_eq!(report.elapsed, Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_external_cancel_fails_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let plan = cluster(&dir, 1);
    let probes = healthy_probes()
        .on("192.168.56.10:6443", vec![fail("connection refused")])
        .shared();
    let orchestrator = Orchestrator::with_shared_probes(probes, OrchestratorOptions::default());
    let signal = RunSignal::unbounded();

    let canceller = {
        let signal = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            signal.cancel();
        })
    };
    let report = orchestrator.run_with_signal(&plan, signal).await;
    canceller.await.unwrap();

    assert_outcome(&report, ClusterOutcome::Failed);
    assert_eq!(report.error, Some(ProvisionError::Cancelled));
    assert_eq!(report.elapsed, Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_events_bracket_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let plan = cluster(&dir, 1);
    let events = Arc::new(Mutex::new(Vec::new()));
    let orchestrator = {
        let events = events.clone();
        Orchestrator::with_shared_probes(healthy_probes().shared(), OrchestratorOptions::default())
            .with_event_handler(move |event| events.lock().unwrap().push(event))
    };

    let report = orchestrator.run(&plan).await;

    let events = events.lock().unwrap();
    assert!(matches!(
        events.first(),
        Some(ExecutionEvent::RunStarted { hosts: 2, stages: 6, .. })
    ));
    assert!(matches!(
        events.last(),
        Some(ExecutionEvent::RunCompleted { outcome: ClusterOutcome::Ready, run_id }) if *run_id == report.run_id
    ));
    let published = events
        .iter()
        .filter(|e| matches!(e, ExecutionEvent::ArtifactPublished { .. }))
        .count();
    assert_eq!(published, 1);
    let ready = events
        .iter()
        .filter(|e| matches!(e, ExecutionEvent::StageReady { .. }))
        .count();
    assert_eq!(ready, 6);
}
