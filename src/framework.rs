use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use mfctl_bootstrap::BootstrapReport;
use mfctl_bootstrap::DnsOutcome;
use mfctl_bootstrap::Orchestrator;
use mfctl_checkpoint::BootstrapStatus;
use mfctl_checkpoint::CheckpointStore;
use mfctl_core::Layout;
use mfctl_core::MfConfig;
use mfctl_core::Node;
use mfctl_core::RemoteExecutor;
use mfctl_core::Topology;
use mfctl_core::constants::GRAFANA_REMOTE_PORT;
use mfctl_core::constants::KIBANA_REMOTE_PORT;
use mfctl_core::constants::TUNNEL_PRIVATE_KEY;
use mfctl_core::constants::TUNNEL_SSH_CONFIG;
use mfctl_services::Command;
use mfctl_services::ServiceDispatcher;
use mfctl_services::ServiceReply;
use serde_json::Value;
use snafu::ResultExt;
use tracing::info;
use tracing::warn;

use crate::error::BootstrapSnafu;
use crate::error::CheckpointSnafu;
use crate::error::ConfigSnafu;
use crate::error::Result;
use crate::error::ServiceSnafu;
use crate::error::TopologySnafu;

/// Services created by [`MeasurementFramework::instrumentize`], in order.
pub const INSTRUMENTIZE_SERVICES: [&str; 3] = ["prometheus", "elk", "grafana_manager"];

/// Measurement framework controller for one topology.
///
/// Owns the checkpoint store, the bootstrap orchestrator and the service
/// dispatcher, all sharing one layout, control node and executor.
pub struct MeasurementFramework {
    config: MfConfig,
    topology: Topology,
    control: Node,
    store: Arc<CheckpointStore>,
    orchestrator: Orchestrator,
    dispatcher: ServiceDispatcher,
}

impl MeasurementFramework {
    /// Networks left as [`NetworkKind::Other`](mfctl_core::NetworkKind) are
    /// classified by `measurement_network_prefix`.
    pub fn new(config: MfConfig, mut topology: Topology, executor: Arc<dyn RemoteExecutor>) -> Result<Self> {
        config.validate().context(ConfigSnafu)?;
        topology.classify_networks(&config.measurement_network_prefix);
        topology.validate().context(TopologySnafu)?;

        let layout = Layout::new(&config, &topology.name).context(TopologySnafu)?;
        let control = topology.control_node().context(TopologySnafu)?.clone();
        let retry = config.retry_policy();

        let store = Arc::new(CheckpointStore::new(layout.clone(), control.clone(), executor.clone(), retry));
        let dispatcher = ServiceDispatcher::new(layout, control.clone(), executor.clone(), retry);
        let orchestrator =
            Orchestrator::new(config.clone(), topology.clone(), executor, store.clone()).context(BootstrapSnafu)?;

        Ok(Self {
            config,
            topology,
            control,
            store,
            orchestrator,
            dispatcher,
        })
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn config(&self) -> &MfConfig {
        &self.config
    }

    // ========================================================================
    // Bootstrap
    // ========================================================================

    /// Bootstrap the framework, resuming any earlier partial run.
    pub async fn init(&self) -> Result<BootstrapReport> {
        self.orchestrator.run().await.context(BootstrapSnafu)
    }

    /// Current bootstrap status from the control node.
    pub async fn bootstrap_status(&self) -> Result<BootstrapStatus> {
        self.store.get().await.context(CheckpointSnafu)
    }

    /// Forget all bootstrap progress; the next [`init`](Self::init) redoes
    /// every stage.
    pub async fn reset_bootstrap(&self) -> Result<()> {
        self.orchestrator.reset().await.context(BootstrapSnafu)
    }

    pub async fn set_dns_all_nodes(&self) -> Result<DnsOutcome> {
        self.orchestrator.set_dns_all_nodes().await.context(BootstrapSnafu)
    }

    pub async fn restore_dns_all_nodes(&self) -> Result<DnsOutcome> {
        self.orchestrator.restore_dns_all_nodes().await.context(BootstrapSnafu)
    }

    /// Local path of the service account private key, downloading it when
    /// missing or when `force` is set.
    pub async fn mfuser_private_key(&self, force: bool) -> Result<PathBuf> {
        self.orchestrator.fetch_private_key(force).await.context(BootstrapSnafu)
    }

    // ========================================================================
    // Instrumentation
    // ========================================================================

    /// Create the monitoring services: Prometheus, ELK, then the Grafana
    /// dashboards manager.
    ///
    /// Every service is attempted; each entry carries that service's reply.
    pub async fn instrumentize(&self) -> Vec<(String, Result<ServiceReply>)> {
        info!(topology = %self.topology.name, "instrumentizing");
        let mut results = Vec::with_capacity(INSTRUMENTIZE_SERVICES.len());
        for service in INSTRUMENTIZE_SERVICES {
            info!(service, "setting up service");
            let result = self.create(service, None, &[]).await;
            match &result {
                Ok(reply) if reply.is_indeterminate() => warn!(service, "service returned no reply"),
                Ok(reply) => info!(service, success = ?reply.success(), "service set up"),
                Err(err) => warn!(service, error = %err, "service setup failed"),
            }
            results.push((service.to_string(), result));
        }
        info!("instrumentize done");
        results
    }

    /// SSH command forwarding `grafana_tunnel_port` to Grafana on the
    /// control node.
    pub fn grafana_tunnel(&self) -> String {
        self.tunnel_command(self.config.grafana_tunnel_port, GRAFANA_REMOTE_PORT)
    }

    /// SSH command forwarding `kibana_tunnel_port` to Kibana on the control
    /// node.
    pub fn kibana_tunnel(&self) -> String {
        self.tunnel_command(self.config.kibana_tunnel_port, KIBANA_REMOTE_PORT)
    }

    fn tunnel_command(&self, local_port: u16, remote_port: u16) -> String {
        format!(
            "ssh -L {local_port}:localhost:{remote_port} -F {TUNNEL_SSH_CONFIG} -i {TUNNEL_PRIVATE_KEY} {}@{}",
            self.control.username, self.control.management_ip
        )
    }

    // ========================================================================
    // Services
    // ========================================================================

    pub async fn list_services(&self) -> Result<Vec<String>> {
        self.dispatcher.list_services().await.context(ServiceSnafu)
    }

    pub async fn create(&self, service: &str, payload: Option<&Value>, files: &[PathBuf]) -> Result<ServiceReply> {
        self.dispatcher.create(service, payload, files).await.context(ServiceSnafu)
    }

    pub async fn update(&self, service: &str, payload: Option<&Value>, files: &[PathBuf]) -> Result<ServiceReply> {
        self.dispatcher.update(service, payload, files).await.context(ServiceSnafu)
    }

    pub async fn info(&self, service: &str, payload: Option<&Value>) -> Result<ServiceReply> {
        self.dispatcher.info(service, payload).await.context(ServiceSnafu)
    }

    pub async fn start(&self, services: &[&str]) -> Vec<(String, Result<ServiceReply>)> {
        lift(self.dispatcher.start(services).await)
    }

    pub async fn stop(&self, services: &[&str]) -> Vec<(String, Result<ServiceReply>)> {
        lift(self.dispatcher.stop(services).await)
    }

    pub async fn remove(&self, services: &[&str]) -> Vec<(String, Result<ServiceReply>)> {
        lift(self.dispatcher.remove(services).await)
    }

    /// Download the log `method` wrote; returns the local path and contents.
    pub async fn download_log(&self, service: &str, method: Command) -> Result<(PathBuf, String)> {
        self.dispatcher.download_log(service, method).await.context(ServiceSnafu)
    }

    pub async fn download_service_file(&self, service: &str, relative: &str, local: Option<&Path>) -> Result<PathBuf> {
        self.dispatcher.download_service_file(service, relative, local).await.context(ServiceSnafu)
    }

    pub async fn upload_service_files(&self, service: &str, files: &[PathBuf]) -> Result<Vec<String>> {
        self.dispatcher.upload_service_files(service, files).await.context(ServiceSnafu)
    }

    pub async fn upload_service_directory(&self, service: &str, local_dir: &Path, overwrite: bool) -> Result<String> {
        self.dispatcher.upload_service_directory(service, local_dir, overwrite).await.context(ServiceSnafu)
    }

    /// Download the shared `hosts.ini`; returns the local path and contents.
    pub async fn download_common_hosts(&self) -> Result<(PathBuf, String)> {
        self.dispatcher.download_common_hosts().await.context(ServiceSnafu)
    }
}

fn lift(results: Vec<(String, mfctl_services::Result<ServiceReply>)>) -> Vec<(String, Result<ServiceReply>)> {
    results.into_iter().map(|(service, result)| (service, result.context(ServiceSnafu))).collect()
}
