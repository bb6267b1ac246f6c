//! YAML cluster definitions driven through the orchestrator

use crate::helpers::*;
use stagegate::core::config::ClusterConfig;
use stagegate::core::{ClusterOutcome, StageResult, WorkerFailurePolicy};
use stagegate::execution::OrchestratorOptions;
use std::collections::HashMap;
use std::time::Duration;

const CLUSTER: &str = r#"
name: "vagrant-kubeadm"

variables:
  api_port: 6443
  token: "abcdef.0123456789abcdef"

defaults:
  max_attempts: 5
  interval_secs: 2

worker_failure: isolate

sync_point:
  path: "SYNC_PATH"

hosts:
  - id: k8s-master
    role: master
    address: 192.168.56.10
  - id: k8s-worker-1
    role: worker
    address: 192.168.56.11
  - id: k8s-worker-2
    role: worker
    address: 192.168.56.12

pipelines:
  master:
    - name: api-server
      probe:
        port: "{{ host.address }}:{{ api_port }}"
    - name: nodes-registered
      critical: false
      max_attempts: 2
      probe:
        command: "kubectl get nodes --no-headers"
      expect:
        count:
          pattern: "Ready"
          min: 3
    - name: publish-join-command
      action: publish
      probe:
        command: "kubeadm token create {{ token }} --print-join-command"
  worker:
    - name: master-reachable
      probe:
        command: "ping -c 1 {{ master.address }}"
    - name: join-cluster
      action: join
      cleanup: "kubeadm reset -f --node-name {{ host.id }}"
      max_attempts: 10
      interval_secs: 1
"#;

const PRINT_JOIN_RENDERED: &str = "kubeadm token create abcdef.0123456789abcdef --print-join-command";

fn load(dir: &tempfile::TempDir) -> ClusterConfig {
    let path = dir.path().join("configs").join("join-command.sh");
    let yaml = CLUSTER.replace("SYNC_PATH", &path.display().to_string());
    ClusterConfig::from_yaml(&yaml).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_yaml_cluster_runs_to_ready() {
    let dir = tempfile::tempdir().unwrap();
    let config = load(&dir);
    let plan = config.to_plan(&HashMap::new()).unwrap();
    let probes = MockProbeExecutor::new()
        .on(PRINT_JOIN_RENDERED, vec![ok(JOIN_COMMAND)])
        .on("kubectl get nodes --no-headers", vec![ok("k8s-master Ready control-plane")])
        .shared();

    let options = OrchestratorOptions::default().with_worker_failure(config.worker_failure);
    let report = run(&plan, probes.clone(), options).await;

    assert_outcome(&report, ClusterOutcome::Ready);
    // Only one node registered: the best-effort stage times out after 2 tries
    assert_eq!(report.master.warnings.len(), 1);
    assert_eq!(probes.count("kubectl get nodes --no-headers"), 2);
    assert_eq!(probes.count_on("k8s-worker-1", "ping -c 1 192.168.56.10"), 1);
    assert_eq!(probes.count("192.168.56.10:6443"), 1);
    assert!(dir.path().join("configs").join("join-command.sh").exists());
    for worker in &report.workers {
        let join = worker
            .stage_results
            .iter()
            .find(|r| r.stage == "join-cluster")
            .unwrap();
        assert!(join.result.is_ready());
    }
}

#[tokio::test(start_paused = true)]
async fn test_yaml_cleanup_is_rendered_per_host() {
    let dir = tempfile::tempdir().unwrap();
    let plan = load(&dir).to_plan(&HashMap::new()).unwrap();
    let probes = MockProbeExecutor::new()
        .on(PRINT_JOIN_RENDERED, vec![ok(JOIN_COMMAND)])
        .on("kubectl get nodes --no-headers", vec![ok("a Ready\nb Ready\nc Ready")])
        .on_host("k8s-worker-2", JOIN_COMMAND, succeed_on(2, ""))
        .shared();

    let report = run(&plan, probes.clone(), OrchestratorOptions::default()).await;

    assert_outcome(&report, ClusterOutcome::Ready);
    assert!(report.master.warnings.is_empty());
    assert_eq!(
        probes.count_on("k8s-worker-2", "kubeadm reset -f --node-name k8s-worker-2"),
        1
    );
    assert_eq!(probes.count("kubeadm reset -f --node-name k8s-worker-1"), 0);
    let join = report.host("k8s-worker-2").unwrap().stage_results[1].clone();
    assert!(matches!(join.result, StageResult::Ready { attempts: 2, elapsed } if elapsed == Duration::from_secs(1)));
}

#[tokio::test(start_paused = true)]
async fn test_overrides_change_the_probed_endpoint() {
    let dir = tempfile::tempdir().unwrap();
    let mut overrides = HashMap::new();
    overrides.insert("api_port".to_string(), "8443".to_string());
    let plan = load(&dir).to_plan(&overrides).unwrap();
    let probes = MockProbeExecutor::new()
        .on(PRINT_JOIN_RENDERED, vec![ok(JOIN_COMMAND)])
        .on("192.168.56.10:8443", vec![fail("connection refused")])
        .shared();

    let report = run(&plan, probes.clone(), OrchestratorOptions::default()).await;

    assert_outcome(&report, ClusterOutcome::Failed);
    // Default policy from the YAML: 5 attempts, 2s apart
    assert_eq!(probes.count("192.168.56.10:8443"), 5);
    assert_eq!(report.master.elapsed, Duration::from_secs(8));
}

#[test]
fn test_worker_failure_policy_is_read_from_yaml() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("join-command.sh");
    let yaml = CLUSTER
        .replace("SYNC_PATH", &path.display().to_string())
        .replace("worker_failure: isolate", "worker_failure: fail-run");
    let config = ClusterConfig::from_yaml(&yaml).unwrap();
    assert_eq!(config.worker_failure, WorkerFailurePolicy::FailRun);
}

#[test]
fn test_join_without_publish_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("join-command.sh");
    let yaml = CLUSTER
        .replace("SYNC_PATH", &path.display().to_string())
        .replace("action: publish", "action: check");
    let err = ClusterConfig::from_yaml(&yaml).unwrap_err();
    assert!(err.to_string().contains("no master publish stage"));
}
