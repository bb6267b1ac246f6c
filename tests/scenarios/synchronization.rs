//! Master publishes the join artifact, workers wait for it

use crate::helpers::*;
use stagegate::core::{
    ClusterOutcome, ClusterPlan, Pipeline, Probe, Stage, StageResult, SyncPoint, TimeoutCause,
};
use stagegate::execution::{OrchestratorOptions, RunSignal, StageEnv, StageExecutor};
use stagegate::ProvisionError;
use std::time::Duration;
use tokio::time::Instant;

const RESET: &str = "kubeadm reset -f";

#[tokio::test(start_paused = true)]
async fn test_join_succeeds_once_the_artifact_appears() {
    let dir = tempfile::tempdir().unwrap();
    let point = SyncPoint::new("join-command", dir.path().join("join-command.sh"));
    let probes = MockProbeExecutor::new().shared();
    let executor = StageExecutor::new(probes.clone());
    let env = StageEnv::new(RunSignal::unbounded()).with_sync_point(point.clone());
    let stage = Stage::join("join-cluster")
        .with_cleanup(RESET)
        .with_policy(policy(10));

    let publisher = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(6500)).await;
        point.publish(JOIN_COMMAND).unwrap();
    });

    let started = Instant::now();
    let result = executor.execute(&stage, &worker_host(1), &env).await;
    publisher.await.unwrap();

    // Attempts at 0s..6s find nothing; the one at 7s joins
    assert!(matches!(result, StageResult::Ready { attempts: 8, .. }));
    assert_eq!(started.elapsed(), Duration::from_secs(7));
    assert_eq!(probes.count(JOIN_COMMAND), 1);
    // Waiting on the artifact is not a host failure, so nothing is reset
    assert_eq!(probes.count(RESET), 0);
}

#[tokio::test(start_paused = true)]
async fn test_missing_artifact_is_a_synchronization_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let point = SyncPoint::new("join-command", dir.path().join("join-command.sh"));
    let probes = MockProbeExecutor::new().shared();
    let executor = StageExecutor::new(probes.clone());
    let env = StageEnv::new(RunSignal::unbounded()).with_sync_point(point);

    let result = executor
        .execute(&Stage::join("join-cluster").with_policy(policy(4)), &worker_host(1), &env)
        .await;

    assert_eq!(
        result,
        StageResult::TimedOut {
            attempts: 4,
            cause: TimeoutCause::Synchronization
        }
    );
    assert!(probes.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_join_resets_the_host_before_retrying() {
    let dir = tempfile::tempdir().unwrap();
    let point = SyncPoint::new("join-command", dir.path().join("join-command.sh"));
    point.publish(JOIN_COMMAND).unwrap();
    let probes = MockProbeExecutor::new()
        .on(JOIN_COMMAND, succeed_on(3, ""))
        .shared();
    let executor = StageExecutor::new(probes.clone());
    let env = StageEnv::new(RunSignal::unbounded()).with_sync_point(point);
    let stage = Stage::join("join-cluster")
        .with_cleanup(RESET)
        .with_policy(policy(5));

    let result = executor.execute(&stage, &worker_host(1), &env).await;

    assert!(matches!(result, StageResult::Ready { attempts: 3, .. }));
    let order: Vec<_> = probes.calls().into_iter().map(|c| c.spec).collect();
    assert_eq!(order, vec![JOIN_COMMAND, RESET, JOIN_COMMAND, RESET, JOIN_COMMAND]);
}

#[tokio::test(start_paused = true)]
async fn test_workers_wait_for_a_slow_master() {
    let dir = tempfile::tempdir().unwrap();
    let plan = cluster(&dir, 2);
    // Master is ready at 4s
    let probes = MockProbeExecutor::new()
        .on(PRINT_JOIN, succeed_on(5, JOIN_COMMAND))
        .shared();

    let report = run(&plan, probes.clone(), OrchestratorOptions::default()).await;

    assert_outcome(&report, ClusterOutcome::Ready);
    assert_eq!(probes.count(PRINT_JOIN), 5);
    for n in 1..=2 {
        let host = worker_host(n).id;
        let joined_at = probes.first_call(&host, JOIN_COMMAND).unwrap();
        assert!(joined_at >= Duration::from_secs(4), "{} joined at {:?}", host, joined_at);
        assert_eq!(probes.count_on(&host, RESET), 0);
    }
    let published = plan.sync_point.as_ref().unwrap().read().unwrap();
    assert_eq!(published.as_deref(), Some(JOIN_COMMAND));
}

#[tokio::test(start_paused = true)]
async fn test_master_that_never_publishes_times_workers_out() {
    let dir = tempfile::tempdir().unwrap();
    let master = Pipeline::new(master_host(), vec![
        Stage::check("api-server", Probe::port("192.168.56.10:6443")).with_policy(policy(30)),
        Stage::publish("publish-join-command", Probe::command(PRINT_JOIN)).with_policy(policy(5)),
    ]);
    let plan = ClusterPlan::new("vagrant", master)
        .with_worker(worker_pipeline(1))
        .with_sync_point(SyncPoint::new("join-command", dir.path().join("join-command.sh")));
    // API comes up at 20s, long after the worker gave up
    let probes = MockProbeExecutor::new()
        .on("192.168.56.10:6443", succeed_on(21, ""))
        .on(PRINT_JOIN, vec![ok(JOIN_COMMAND)])
        .shared();

    let report = run(&plan, probes.clone(), OrchestratorOptions::default()).await;

    assert!(report.master.is_ready());
    assert_outcome(&report, ClusterOutcome::Degraded);
    assert_eq!(report.hosts_ready(), 1);
    assert_eq!(
        report.error,
        Some(ProvisionError::SynchronizationTimeout {
            host: "k8s-worker-1".to_string(),
            stage: "join-cluster".to_string(),
            point: "join-command".to_string(),
            attempts: 10,
        })
    );
    assert_eq!(probes.count(JOIN_COMMAND), 0);
    assert_eq!(
        stage_names_run(&report, "k8s-worker-1"),
        vec!["master-reachable", "join-cluster"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_master_failure_releases_waiting_workers() {
    let dir = tempfile::tempdir().unwrap();
    let plan = cluster(&dir, 2);
    let probes = MockProbeExecutor::new()
        .on("swapon --show", vec![fail("swap is on")])
        .shared();

    let report = run(&plan, probes.clone(), OrchestratorOptions::default()).await;

    assert_outcome(&report, ClusterOutcome::Failed);
    assert!(matches!(
        report.error,
        Some(ProvisionError::PipelineAborted { ref host, ref stage, .. })
            if host == "k8s-master" && stage == "swap-disabled"
    ));
    for worker in &report.workers {
        assert!(!worker.is_ready());
        assert!(matches!(
            worker.failure,
            Some(ProvisionError::PipelineAborted { ref reason, .. }) if reason == "master pipeline failed"
        ));
    }
    // The master gave up after 3 attempts; workers stopped waiting right then
    assert!(report.elapsed < Duration::from_secs(4));
    assert_eq!(probes.count(PRINT_JOIN), 0);
    assert!(!plan.sync_point.as_ref().unwrap().is_published());
}

#[tokio::test(start_paused = true)]
async fn test_artifact_from_an_earlier_run_is_never_joined() {
    let dir = tempfile::tempdir().unwrap();
    let plan = cluster(&dir, 1);
    let stale = "kubeadm join 192.168.56.10:6443 --token expired.0000000000000000";
    plan.sync_point.as_ref().unwrap().publish(stale).unwrap();
    let probes = MockProbeExecutor::new()
        .on(PRINT_JOIN, succeed_on(3, JOIN_COMMAND))
        .shared();

    let report = run(&plan, probes.clone(), OrchestratorOptions::default()).await;

    assert_outcome(&report, ClusterOutcome::Ready);
    assert_eq!(probes.count(stale), 0);
    assert_eq!(probes.count_on("k8s-worker-1", JOIN_COMMAND), 1);
    // The join waited for the master, which published at 2s
    assert!(probes.first_call("k8s-worker-1", JOIN_COMMAND).unwrap() >= Duration::from_secs(2));
}
