//! End-to-end bootstrap runs against the simulated executor.

use std::path::PathBuf;
use std::sync::Arc;

use mfctl_bootstrap::BootstrapError;
use mfctl_bootstrap::Orchestrator;
use mfctl_bootstrap::Stage;
use mfctl_bootstrap::StageOutcome;
use mfctl_checkpoint::CheckpointStore;
use mfctl_core::CommandOutput;
use mfctl_core::Layout;
use mfctl_core::MfConfig;
use mfctl_core::NetworkKind;
use mfctl_core::Node;
use mfctl_core::RemoteExecutor;
use mfctl_core::StageFailurePolicy;
use mfctl_core::Topology;
use mfctl_testing::Operation;
use mfctl_testing::SimulatedExecutor;
use mfctl_testing::fixtures;
use serde_json::Value;
use tempfile::TempDir;

struct Harness {
    simulated: Arc<SimulatedExecutor>,
    orchestrator: Orchestrator,
    control: Node,
    local_dir: PathBuf,
    _dir: TempDir,
}

fn harness(topology: Topology, policy: StageFailurePolicy) -> Harness {
    harness_on(Arc::new(SimulatedExecutor::new()), topology, policy)
}

fn harness_on(simulated: Arc<SimulatedExecutor>, topology: Topology, policy: StageFailurePolicy) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let config = MfConfig {
        local_storage_dir: dir.path().to_path_buf(),
        stage_failure_policy: policy,
        transfer_retry_delay_ms: 0,
        ..MfConfig::default()
    };
    let layout = Layout::new(&config, &topology.name).unwrap();
    let local_dir = layout.local_dir().to_path_buf();
    let control = topology.control_node().unwrap().clone();
    let executor: Arc<dyn RemoteExecutor> = simulated.clone();
    let store = Arc::new(CheckpointStore::new(layout, control.clone(), executor.clone(), config.retry_policy()));
    let orchestrator = Orchestrator::new(config, topology, executor, store).unwrap();
    Harness {
        simulated,
        orchestrator,
        control,
        local_dir,
        _dir: dir,
    }
}

impl Harness {
    async fn remote_status(&self) -> Value {
        let text = self.simulated.file_text(&self.control, "bootstrap_status.json").await.unwrap_or_default();
        serde_json::from_str(&text).unwrap_or(Value::Null)
    }
}

#[tokio::test]
async fn test_full_run_reaches_ready() {
    let h = harness(fixtures::three_node_topology(), StageFailurePolicy::Defer);

    let report = h.orchestrator.run().await.unwrap();
    assert!(report.is_success());
    assert!(!report.was_ready);
    assert_eq!(report.stages.len(), Stage::ALL.len());
    assert_eq!(report.failures().count(), 0);
    assert_eq!(report.outcome(Stage::Nat64Dns), Some(&StageOutcome::Completed("not needed".to_string())));
    assert_eq!(report.outcome(Stage::RepoClone), Some(&StageOutcome::Completed("ok".to_string())));

    let status = h.remote_status().await;
    assert_eq!(status["status"], "ready");
    assert_eq!(status["mfuser_accounts"], "ok");
    assert_eq!(status["ipv6_4_nat"], "not needed");

    assert!(h.local_dir.join("mfuser_private_key").exists());
    assert!(h.local_dir.join("hosts.ini").exists());
    let public = std::fs::read_to_string(h.local_dir.join("mfuser_public_key")).unwrap();
    assert!(public.starts_with("ssh-ed25519 "));

    assert!(h.simulated.has_file(&h.control, "/home/mfuser/.ssh/mfuser_private_key").await);
    assert!(h.simulated.has_file(&h.control, "/home/mfuser/.ssh/mfuser_public_key").await);
    assert!(h.simulated.has_file(&h.control, "/home/mfuser/services/common/hosts.ini").await);
    let node1 = fixtures::three_node_topology().nodes[1].clone();
    assert_eq!(
        h.simulated.file_text(&node1, "/home/mfuser/.ssh/mfuser.pub").await.as_deref(),
        Some(public.as_str())
    );

    let hosts_commands: Vec<String> =
        h.simulated.commands().await.into_iter().filter(|c| c.contains("meas-node' | sudo tee -a /etc/hosts")).collect();
    assert_eq!(hosts_commands.len(), 3);
    assert!(hosts_commands[0].contains("'10.132.1."));
}

#[tokio::test]
async fn test_second_run_has_no_side_effects() {
    let h = harness(fixtures::three_node_topology(), StageFailurePolicy::Defer);
    h.orchestrator.run().await.unwrap();
    h.simulated.clear_operations().await;

    let report = h.orchestrator.run().await.unwrap();
    assert!(report.was_ready);
    assert!(report.ready);
    assert!(report.stages.is_empty());
    assert!(h.simulated.side_effects().await.is_empty());
    // the ready path refreshes the private key
    assert!(h.simulated.operations().await.iter().any(|op| matches!(
        op,
        Operation::Download { remote, .. } if remote.ends_with("mfuser_private_key")
    )));
}

#[tokio::test]
async fn test_deferred_stage_is_retried_alone() {
    let h = harness(fixtures::three_node_topology(), StageFailurePolicy::Defer);
    h.simulated.fail_command_on(fixtures::CONTROL_NODE, "bootstrap.sh").await;

    let report = h.orchestrator.run().await.unwrap();
    assert!(!report.ready);
    assert_eq!(report.halted_at, None);
    assert!(matches!(report.outcome(Stage::BootstrapScript), Some(StageOutcome::Failed { .. })));
    assert_eq!(report.outcome(Stage::BootstrapPlaybook), Some(&StageOutcome::Completed("ok".to_string())));
    let status = h.remote_status().await;
    assert!(status.get("bootstrap_script").is_none());
    assert!(status.get("status").is_none());

    h.simulated.clear_rules().await;
    h.simulated.clear_operations().await;
    let report = h.orchestrator.run().await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.outcome(Stage::BootstrapScript), Some(&StageOutcome::Completed("ok".to_string())));
    assert_eq!(report.outcome(Stage::ServiceKeys), Some(&StageOutcome::AlreadyDone));

    let commands = h.simulated.commands().await;
    assert_eq!(commands.len(), 1);
    assert!(commands[0].ends_with("instrumentize/experiment_bootstrap/bootstrap.sh"));
    assert_eq!(h.remote_status().await["status"], "ready");
}

#[tokio::test]
async fn test_hosts_stage_resumes_after_network_checkpoint() {
    let h = harness(fixtures::three_node_topology(), StageFailurePolicy::Defer);
    h.simulated.fail_command_on("node1", "/etc/hosts").await;

    let report = h.orchestrator.run().await.unwrap();
    assert!(!report.ready);
    assert_eq!(report.outcome(Stage::MeasurementNetwork), Some(&StageOutcome::Completed("ok".to_string())));
    assert!(matches!(report.outcome(Stage::HostsFile), Some(StageOutcome::Failed { .. })));
    let status = h.remote_status().await;
    assert_eq!(status["meas_network"], "ok");
    assert!(status.get("hosts_set").is_none());

    h.simulated.clear_rules().await;
    h.simulated.clear_operations().await;
    let report = h.orchestrator.run().await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.outcome(Stage::MeasurementNetwork), Some(&StageOutcome::AlreadyDone));
    assert_eq!(report.outcome(Stage::HostsFile), Some(&StageOutcome::Completed("ok".to_string())));
    assert_eq!(h.remote_status().await["status"], "ready");

    // the address comes from the same plan the first run applied
    let node1 = h.simulated.commands_on("node1").await;
    assert_eq!(node1.len(), 1);
    assert!(node1[0].contains("'10.132.1.2 meas-node'"));
    assert!(!h.simulated.commands().await.iter().any(|c| c.contains("ip addr add")));

    let report = h.orchestrator.run().await.unwrap();
    assert!(report.was_ready);
}

#[tokio::test]
async fn test_networks_classified_by_name_prefix() {
    let mut topology = fixtures::three_node_topology();
    for network in &mut topology.networks {
        network.kind = NetworkKind::Other;
    }
    let h = harness(topology, StageFailurePolicy::Halt);

    let report = h.orchestrator.run().await.unwrap();
    assert!(report.is_success());
    let inventory = std::fs::read_to_string(h.local_dir.join("hosts.ini")).unwrap();
    assert!(inventory.contains("meas-node ansible_host=10.132.1.2"));
    assert!(h.simulated.commands_on("node2").await.iter().any(|c| c.contains("sudo ip addr add 10.132.1.4/24 dev ens7")));
}

#[tokio::test]
async fn test_clone_error_halts_under_any_policy() {
    let h = harness(fixtures::three_node_topology(), StageFailurePolicy::Record);
    h.simulated
        .respond_on(fixtures::CONTROL_NODE, "git clone", CommandOutput::new("", "fatal: repository not found\n"))
        .await;

    let report = h.orchestrator.run().await.unwrap();
    assert_eq!(report.halted_at, Some(Stage::RepoClone));
    assert!(!report.ready);
    assert!(report.outcome(Stage::MeasurementNetwork).is_none());
    let (stage, reason) = report.failures().next().unwrap();
    assert_eq!(stage, Stage::RepoClone);
    assert!(reason.contains("repository not found"));
    assert!(h.remote_status().await.get("repo_cloned").is_none());
}

#[tokio::test]
async fn test_existing_checkout_counts_as_cloned() {
    let h = harness(fixtures::three_node_topology(), StageFailurePolicy::Defer);
    let stderr = "sudo: unable to resolve host meas-node: Name or service not known\n\
                  fatal: destination path '/home/mfuser/mf_git' already exists and is not an empty directory.\n";
    h.simulated.respond_on(fixtures::CONTROL_NODE, "git clone", CommandOutput::new("", stderr)).await;

    let report = h.orchestrator.run().await.unwrap();
    assert!(report.is_success());
    assert_eq!(h.remote_status().await["repo_cloned"], "ok");
}

#[tokio::test]
async fn test_control_account_failure_is_fatal() {
    let h = harness(fixtures::three_node_topology(), StageFailurePolicy::Record);
    h.simulated.fail_command_on(fixtures::CONTROL_NODE, "useradd").await;

    let report = h.orchestrator.run().await.unwrap();
    assert_eq!(report.halted_at, Some(Stage::ServiceAccounts));
    assert_eq!(report.outcome(Stage::ServiceKeys), Some(&StageOutcome::Completed("ok".to_string())));
    assert!(report.outcome(Stage::Nat64Dns).is_none());
    // siblings still ran
    assert!(h.simulated.commands_on("node1").await.iter().any(|c| c.contains("useradd")));
    assert!(h.remote_status().await.get("mfuser_accounts").is_none());
}

#[tokio::test]
async fn test_experiment_account_failure_deferred() {
    let h = harness(fixtures::three_node_topology(), StageFailurePolicy::Defer);
    h.simulated.fail_command_on("node2", "useradd").await;

    let report = h.orchestrator.run().await.unwrap();
    assert!(!report.ready);
    assert_eq!(report.halted_at, None);
    match report.outcome(Stage::ServiceAccounts) {
        Some(StageOutcome::Failed { reason }) => assert!(reason.contains("node2")),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(report.outcome(Stage::BootstrapPlaybook), Some(&StageOutcome::Completed("ok".to_string())));
    // the control node still received the keypair
    assert!(h.simulated.has_file(&h.control, "/home/mfuser/.ssh/mfuser_private_key").await);
    assert!(h.remote_status().await.get("mfuser_accounts").is_none());
}

#[tokio::test]
async fn test_experiment_account_failure_recorded() {
    let h = harness(fixtures::three_node_topology(), StageFailurePolicy::Record);
    h.simulated.fail_command_on("node2", "useradd").await;

    let report = h.orchestrator.run().await.unwrap();
    assert!(report.ready);
    assert_eq!(report.failures().count(), 1);
    let status = h.remote_status().await;
    assert_eq!(status["mfuser_accounts"], "ok");
    assert_eq!(status["status"], "ready");
}

#[tokio::test]
async fn test_experiment_account_failure_halts() {
    let h = harness(fixtures::three_node_topology(), StageFailurePolicy::Halt);
    h.simulated.fail_command_on("node2", "useradd").await;

    let report = h.orchestrator.run().await.unwrap();
    assert_eq!(report.halted_at, Some(Stage::ServiceAccounts));
    assert!(report.outcome(Stage::Nat64Dns).is_none());
    assert!(!report.ready);
}

#[tokio::test]
async fn test_ipv6_node_gets_nat64_resolvers() {
    let h = harness(fixtures::ipv6_topology(), StageFailurePolicy::Defer);

    let report = h.orchestrator.run().await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.outcome(Stage::Nat64Dns), Some(&StageOutcome::Completed("set".to_string())));
    assert_eq!(h.remote_status().await["ipv6_4_nat"], "set");
    assert!(h.simulated.commands_on("node2").await.iter().any(|c| c.contains("/etc/resolv.conf")));
    assert!(!h.simulated.commands_on("node1").await.iter().any(|c| c.contains("/etc/resolv.conf")));
}

#[tokio::test]
async fn test_legacy_nat64_value_is_accepted() {
    let simulated = Arc::new(SimulatedExecutor::new());
    let topology = fixtures::ipv6_topology();
    let control = topology.control_node().unwrap().clone();
    simulated.add_file(&control, "bootstrap_status.json", r#"{"ipv6_4_nat": "not_needed"}"#).await;
    let h = harness_on(simulated, topology, StageFailurePolicy::Defer);

    let report = h.orchestrator.run().await.unwrap();
    assert_eq!(report.outcome(Stage::Nat64Dns), Some(&StageOutcome::AlreadyDone));
    assert!(!h.simulated.commands_on("node2").await.iter().any(|c| c.contains("/etc/resolv.conf")));
    assert_eq!(h.remote_status().await["ipv6_4_nat"], "not_needed");
}

#[tokio::test]
async fn test_unreadable_status_is_an_error() {
    let h = harness(fixtures::three_node_topology(), StageFailurePolicy::Defer);
    h.simulated.fail_transfer("bootstrap_status.json").await;

    let err = h.orchestrator.run().await.unwrap_err();
    assert!(matches!(err, BootstrapError::Checkpoint { .. }));
    assert!(h.simulated.commands().await.is_empty());
}

#[tokio::test]
async fn test_reset_starts_over() {
    let h = harness(fixtures::three_node_topology(), StageFailurePolicy::Defer);
    h.orchestrator.run().await.unwrap();

    h.orchestrator.reset().await.unwrap();
    assert!(!h.local_dir.join("bootstrap_status.json").exists());
    assert!(!h.simulated.has_file(&h.control, "bootstrap_status.json").await);

    let report = h.orchestrator.run().await.unwrap();
    assert!(!report.was_ready);
    assert_eq!(report.outcome(Stage::ServiceKeys), Some(&StageOutcome::Completed("ok".to_string())));
}

#[tokio::test]
async fn test_private_key_cache() {
    let h = harness(fixtures::three_node_topology(), StageFailurePolicy::Defer);
    h.orchestrator.run().await.unwrap();
    h.simulated.clear_operations().await;

    let path = h.orchestrator.fetch_private_key(false).await.unwrap();
    assert_eq!(path, h.local_dir.join("mfuser_private_key"));
    assert!(h.simulated.operations().await.is_empty());

    h.orchestrator.fetch_private_key(true).await.unwrap();
    assert_eq!(h.simulated.operations().await.len(), 1);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}

#[tokio::test]
async fn test_accounts_fetch_missing_local_keys() {
    let simulated = Arc::new(SimulatedExecutor::new());
    let topology = fixtures::three_node_topology();
    let control = topology.control_node().unwrap().clone();
    simulated.add_file(&control, "bootstrap_status.json", r#"{"mfuser_keys": "ok"}"#).await;
    simulated.add_file(&control, "mfuser_private_key", "PRIVATE").await;
    simulated.add_file(&control, "mfuser_public_key", "ssh-ed25519 AAAA mfuser\n").await;
    let h = harness_on(simulated, topology, StageFailurePolicy::Defer);

    let report = h.orchestrator.run().await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.outcome(Stage::ServiceKeys), Some(&StageOutcome::AlreadyDone));
    assert_eq!(std::fs::read_to_string(h.local_dir.join("mfuser_private_key")).unwrap(), "PRIVATE");
    let node2 = fixtures::three_node_topology().nodes[2].clone();
    assert_eq!(
        h.simulated.file_text(&node2, "/home/mfuser/.ssh/mfuser.pub").await.as_deref(),
        Some("ssh-ed25519 AAAA mfuser\n")
    );
}

#[tokio::test]
async fn test_dns_helpers_on_ipv4_topology() {
    let h = harness(fixtures::three_node_topology(), StageFailurePolicy::Defer);
    assert_eq!(h.orchestrator.set_dns_all_nodes().await.unwrap().as_str(), "not needed");
    assert_eq!(h.orchestrator.restore_dns_all_nodes().await.unwrap().as_str(), "not needed");
    assert!(h.simulated.operations().await.is_empty());
}
