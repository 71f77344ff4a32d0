use std::sync::Arc;

use mfctl::MeasurementFramework;
use mfctl::MfConfig;
use mfctl::RemoteExecutor;
use mfctl::Topology;
use mfctl_core::CommandOutput;
use mfctl_core::ErrorKind;
use mfctl_core::NetworkKind;
use mfctl_core::NodeRole;
use mfctl_testing::SimulatedExecutor;
use mfctl_testing::fixtures;
use tempfile::TempDir;

fn framework(topology: Topology) -> (MeasurementFramework, Arc<SimulatedExecutor>, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = MfConfig {
        local_storage_dir: dir.path().to_path_buf(),
        ..MfConfig::default()
    };
    let simulated = Arc::new(SimulatedExecutor::new());
    let executor: Arc<dyn RemoteExecutor> = simulated.clone();
    let framework = MeasurementFramework::new(config, topology, executor).unwrap();
    (framework, simulated, dir)
}

#[test]
fn test_topology_without_control_node_is_rejected() {
    let mut topology = fixtures::three_node_topology();
    topology.nodes[0].role = NodeRole::Experiment;
    let executor: Arc<dyn RemoteExecutor> = Arc::new(SimulatedExecutor::new());

    let err = match MeasurementFramework::new(MfConfig::default(), topology, executor) {
        Ok(_) => panic!("topology without a control node was accepted"),
        Err(err) => err,
    };
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = MfConfig {
        transfer_attempts: 0,
        ..MfConfig::default()
    };
    let executor: Arc<dyn RemoteExecutor> = Arc::new(SimulatedExecutor::new());

    let err = match MeasurementFramework::new(config, fixtures::three_node_topology(), executor) {
        Ok(_) => panic!("zero transfer attempts was accepted"),
        Err(err) => err,
    };
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn test_tunnel_commands() {
    let (mf, _simulated, _dir) = framework(fixtures::three_node_topology());
    assert_eq!(mf.grafana_tunnel(), "ssh -L 10010:localhost:443 -F ssh_config -i slice_key ubuntu@192.0.2.10");
    assert_eq!(mf.kibana_tunnel(), "ssh -L 10020:localhost:80 -F ssh_config -i slice_key ubuntu@192.0.2.10");
}

#[tokio::test]
async fn test_init_then_status_then_reset() {
    let (mf, _simulated, _dir) = framework(fixtures::three_node_topology());
    assert!(mf.bootstrap_status().await.unwrap().is_empty());

    let report = mf.init().await.unwrap();
    assert!(report.is_success());
    assert!(mf.bootstrap_status().await.unwrap().is_ready());

    let (_, hosts) = mf.download_common_hosts().await.unwrap();
    assert!(hosts.contains("meas-node ansible_host=10.132.1."));
    assert!(hosts.contains("node2 ansible_host="));

    mf.reset_bootstrap().await.unwrap();
    assert!(mf.bootstrap_status().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unclassified_networks_use_configured_prefix() {
    let mut topology = fixtures::three_node_topology();
    for network in &mut topology.networks {
        network.kind = NetworkKind::Other;
    }
    let (mf, _simulated, _dir) = framework(topology);
    assert_eq!(mf.topology().measurement_networks().count(), 1);

    assert!(mf.init().await.unwrap().is_success());
    let (_, hosts) = mf.download_common_hosts().await.unwrap();
    assert!(hosts.contains("meas-node ansible_host=10.132.1.2"));
}

#[tokio::test]
async fn test_instrumentize_creates_each_service() {
    let (mf, simulated, _dir) = framework(fixtures::three_node_topology());
    simulated.respond("prometheus/create.py", CommandOutput::stdout("{\"success\": true}")).await;
    simulated
        .respond("grafana_manager/create.py", CommandOutput::stdout("installing\n{\"success\": false, \"msg\": \"no dashboards\"}"))
        .await;

    let results = mf.instrumentize().await;
    let names: Vec<&str> = results.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, ["prometheus", "elk", "grafana_manager"]);

    assert_eq!(results[0].1.as_ref().unwrap().success(), Some(true));
    assert!(results[1].1.as_ref().unwrap().is_indeterminate());
    assert_eq!(results[2].1.as_ref().unwrap().success(), Some(false));

    let commands = simulated.commands().await;
    let order: Vec<usize> = ["prometheus/create.py", "elk/create.py", "grafana_manager/create.py"]
        .iter()
        .map(|script| commands.iter().position(|c| c.ends_with(script)).unwrap())
        .collect();
    assert!(order.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn test_unknown_service_is_a_validation_error() {
    let (mf, simulated, _dir) = framework(fixtures::three_node_topology());
    let control = fixtures::three_node_topology().nodes[0].clone();
    simulated.add_dir(&control, "/home/mfuser/services/prometheus/data").await;

    let results = mf.stop(&["prometheus", "nosuch"]).await;
    assert!(results[0].1.is_ok());
    let err = results[1].1.as_ref().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}
