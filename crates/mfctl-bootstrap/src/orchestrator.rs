use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use mfctl_checkpoint::CheckpointStore;
use mfctl_checkpoint::DONE_VALUE;
use mfctl_checkpoint::READY_VALUE;
use mfctl_checkpoint::STATUS_KEY;
use mfctl_core::CommandOutput;
use mfctl_core::Layout;
use mfctl_core::MfConfig;
use mfctl_core::Node;
use mfctl_core::RemoteExecutor;
use mfctl_core::RetryPolicy;
use mfctl_core::StageFailurePolicy;
use mfctl_core::Topology;
use mfctl_core::constants::BOOTSTRAP_ANSIBLE_CFG;
use mfctl_core::constants::BOOTSTRAP_PLAYBOOK_SCRIPT;
use mfctl_core::constants::BOOTSTRAP_SCRIPT;
use mfctl_core::constants::CLONE_EXISTS_MARKER;
use mfctl_core::constants::PRIVATE_KEY_FILE;
use mfctl_core::constants::PRIVATE_KEY_MODE;
use mfctl_core::constants::PUBLIC_KEY_FILE;
use mfctl_core::constants::SUDOERS_FILE;
use mfctl_network::control_measurement_address;
use mfctl_network::plan_measurement_network;
use mfctl_network::publish_inventory;
use mfctl_network::write_local_inventory;
use snafu::ResultExt;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::dns;
use crate::dns::DnsOutcome;
use crate::error::BootstrapError;
use crate::error::CheckpointSnafu;
use crate::error::CommandFailedSnafu;
use crate::error::LocalIoSnafu;
use crate::error::NetworkSnafu;
use crate::error::NodeFailuresSnafu;
use crate::error::RemoteSnafu;
use crate::error::Result;
use crate::error::TopologySnafu;
use crate::fanout::failed_nodes;
use crate::fanout::scatter_gather;
use crate::keys::ServiceKeypair;
use crate::keys::set_mode;
use crate::report::BootstrapReport;
use crate::report::StageOutcome;
use crate::stage::Stage;

/// How a failed stage affects the run.
enum StageError {
    /// Ends the run regardless of policy.
    Fatal(BootstrapError),
    /// Handled according to [`StageFailurePolicy`].
    Soft(BootstrapError),
}

impl From<BootstrapError> for StageError {
    fn from(err: BootstrapError) -> Self {
        StageError::Soft(err)
    }
}

type StageResult = std::result::Result<String, StageError>;

/// State carried between stages of one run.
#[derive(Default)]
struct RunState {
    control_address: Option<IpAddr>,
}

/// Drives the bootstrap stages for one topology.
///
/// Single controller: two orchestrators running against the same topology
/// can interleave checkpoint writes and lose one.
pub struct Orchestrator {
    config: MfConfig,
    topology: Topology,
    layout: Layout,
    control: Node,
    executor: Arc<dyn RemoteExecutor>,
    store: Arc<CheckpointStore>,
    retry: RetryPolicy,
}

impl Orchestrator {
    pub fn new(
        config: MfConfig,
        mut topology: Topology,
        executor: Arc<dyn RemoteExecutor>,
        store: Arc<CheckpointStore>,
    ) -> Result<Self> {
        topology.classify_networks(&config.measurement_network_prefix);
        topology.validate().context(TopologySnafu)?;
        let layout = Layout::new(&config, &topology.name).context(TopologySnafu)?;
        let control = topology.control_node().context(TopologySnafu)?.clone();
        let retry = config.retry_policy();
        Ok(Self {
            config,
            topology,
            layout,
            control,
            executor,
            store,
            retry,
        })
    }

    // ========================================================================
    // Run
    // ========================================================================

    /// Bring the topology to `status = ready`, resuming from the checkpoint.
    ///
    /// Only an unreadable checkpoint or a failed checkpoint write is an
    /// `Err`. Stage failures are reported in the [`BootstrapReport`].
    pub async fn run(&self) -> Result<BootstrapReport> {
        info!(topology = %self.topology.name, control = %self.control.name, "initializing measurement framework");

        let status = self.store.get().await.context(CheckpointSnafu)?;
        if status.is_ready() {
            if let Err(err) = self.fetch_private_key(true).await {
                warn!(error = %err, "could not refresh service account private key");
            }
            info!("bootstrap status is ready");
            return Ok(BootstrapReport::already_ready());
        }
        if status.is_empty() {
            info!("no bootstrap status found, starting bootstrap");
        } else {
            info!(recorded = status.len(), "resuming bootstrap");
        }

        let mut report = BootstrapReport::default();
        let mut state = RunState::default();
        let mut deferred = false;

        for stage in Stage::ALL {
            if status.is_done(stage.key(), stage.accepted_values()) {
                info!(%stage, "stage already done");
                report.push(stage, StageOutcome::AlreadyDone);
                continue;
            }

            info!(%stage, "running stage");
            let (err, fatal) = match self.run_stage(stage, &mut state).await {
                Ok(value) => {
                    self.store.set(stage.key(), value.as_str()).await.context(CheckpointSnafu)?;
                    info!(%stage, %value, "stage done");
                    report.push(stage, StageOutcome::Completed(value));
                    continue;
                }
                Err(StageError::Fatal(err)) => (err, true),
                Err(StageError::Soft(err)) => (err, stage.is_always_fatal()),
            };

            error!(%stage, error = %err, fatal, "stage failed");
            report.push(stage, StageOutcome::Failed { reason: err.to_string() });
            if fatal {
                report.halted_at = Some(stage);
                return Ok(report);
            }

            match self.config.stage_failure_policy {
                StageFailurePolicy::Defer => deferred = true,
                StageFailurePolicy::Record => {
                    warn!(%stage, "recording failed stage as done");
                    self.store.set(stage.key(), stage.recorded_value()).await.context(CheckpointSnafu)?;
                }
                StageFailurePolicy::Halt => {
                    report.halted_at = Some(stage);
                    return Ok(report);
                }
            }
        }

        if deferred {
            warn!("bootstrap incomplete, failed stages will be retried on the next run");
            return Ok(report);
        }

        self.store.set(STATUS_KEY, READY_VALUE).await.context(CheckpointSnafu)?;
        report.ready = true;
        info!(topology = %self.topology.name, "measurement framework initialized");
        Ok(report)
    }

    /// Delete the bootstrap status so the next run starts from scratch.
    pub async fn reset(&self) -> Result<()> {
        self.store.clear().await.context(CheckpointSnafu)
    }

    async fn run_stage(&self, stage: Stage, state: &mut RunState) -> StageResult {
        match stage {
            Stage::ServiceKeys => Ok(self.install_service_keys().await?),
            Stage::ServiceAccounts => self.install_service_accounts().await,
            Stage::Nat64Dns => Ok(self.set_dns_all_nodes().await?.as_str().to_string()),
            Stage::RepoClone => self.clone_repository().await.map_err(StageError::Fatal),
            Stage::MeasurementNetwork => Ok(self.configure_measurement_network(state).await?),
            Stage::HostsFile => Ok(self.set_hosts_entries(state).await?),
            Stage::BootstrapScript => Ok(self.run_bootstrap_script().await?),
            Stage::BootstrapPlaybook => Ok(self.run_bootstrap_playbook().await?),
        }
    }

    // ========================================================================
    // Service account
    // ========================================================================

    async fn install_service_keys(&self) -> Result<String> {
        let keypair = ServiceKeypair::generate(self.layout.service_user());
        let private = self.layout.local_private_key_path();
        let public = self.layout.local_public_key_path();
        keypair.write(&private, &public).await?;
        debug!(path = %private.display(), "service account keypair written");

        for (local, remote) in [(&private, PRIVATE_KEY_FILE), (&public, PUBLIC_KEY_FILE)] {
            self.retry
                .run("upload service key", || self.executor.upload_file(&self.control, local, remote))
                .await
                .context(RemoteSnafu {
                    operation: "upload service key",
                })?;
        }
        Ok(DONE_VALUE.to_string())
    }

    /// Create the account on every node, then give the control node's
    /// account the keypair.
    ///
    /// Failing on the control node, or failing to copy the keypair, ends the
    /// run. Failures on experiment nodes only fail the stage.
    async fn install_service_accounts(&self) -> StageResult {
        let public_key = self.local_public_key().await.map_err(StageError::Fatal)?;
        let user = self.layout.service_user().to_string();
        let ssh_dir = self.layout.service_ssh_dir();
        let staged = format!("{user}.pub");
        let prepare = account_prepare_command(&user, &ssh_dir);
        let authorize = authorize_key_command(&user, &ssh_dir, &staged);
        let retry = self.retry;

        let results = scatter_gather(&self.executor, &self.topology.nodes, |executor, node| {
            let (prepare, authorize, staged, public_key) =
                (prepare.clone(), authorize.clone(), staged.clone(), public_key.clone());
            async move {
                let output = executor.execute(&node, &prepare).await?;
                if output.has_stderr() {
                    warn!(node = %node.name, stderr = %output.stderr.trim(), "account setup reported errors");
                }
                retry
                    .run("upload service public key", || executor.upload_file(&node, &public_key, &staged))
                    .await?;
                let output = executor.execute(&node, &authorize).await?;
                if output.has_stderr() {
                    warn!(node = %node.name, stderr = %output.stderr.trim(), "key authorization reported errors");
                }
                Ok(())
            }
        })
        .await;

        let failed = failed_nodes(&results, "install service account");
        if failed.contains(&self.control.name) {
            return Err(StageError::Fatal(
                NodeFailuresSnafu {
                    operation: "install service account",
                    nodes: failed,
                }
                .build(),
            ));
        }

        self.copy_keys_to_service_account().await.map_err(StageError::Fatal)?;

        if !failed.is_empty() {
            return Err(StageError::Soft(
                NodeFailuresSnafu {
                    operation: "install service account",
                    nodes: failed,
                }
                .build(),
            ));
        }
        Ok(DONE_VALUE.to_string())
    }

    /// Local public key, fetched from the control node when this machine
    /// did not generate the keys.
    async fn local_public_key(&self) -> Result<PathBuf> {
        let public = self.layout.local_public_key_path();
        if tokio::fs::try_exists(&public).await.context(LocalIoSnafu { path: &public })? {
            return Ok(public);
        }

        info!("service account keys not present locally, fetching them from the control node");
        self.fetch_private_key(true).await?;
        self.download(PUBLIC_KEY_FILE, &public, "download service public key").await?;
        Ok(public)
    }

    async fn copy_keys_to_service_account(&self) -> Result<()> {
        let user = self.layout.service_user();
        let ssh_dir = self.layout.service_ssh_dir();
        let command = format!(
            "sudo cp {PUBLIC_KEY_FILE} {ssh_dir}/{PUBLIC_KEY_FILE}; \
             sudo cp {PRIVATE_KEY_FILE} {ssh_dir}/{PRIVATE_KEY_FILE}; \
             sudo chmod 644 {ssh_dir}/{PUBLIC_KEY_FILE}; \
             sudo chmod 600 {ssh_dir}/{PRIVATE_KEY_FILE}; \
             sudo chown -R {user}:{user} {ssh_dir}"
        );
        let output = self.execute_on_control(&command, "copy service keys").await?;
        if output.stderr.contains("No such file") {
            return CommandFailedSnafu {
                operation: "copy service keys",
                node: self.control.name.clone(),
                stderr: output.stderr.trim().to_string(),
            }
            .fail();
        }
        Ok(())
    }

    /// Download the service account private key (mode 0600). Without
    /// `force`, an existing local copy is returned as is.
    pub async fn fetch_private_key(&self, force: bool) -> Result<PathBuf> {
        let local = self.layout.local_private_key_path();
        if !force && tokio::fs::try_exists(&local).await.context(LocalIoSnafu { path: &local })? {
            return Ok(local);
        }
        self.download(PRIVATE_KEY_FILE, &local, "download service private key").await?;
        set_mode(&local, PRIVATE_KEY_MODE).await?;
        Ok(local)
    }

    // ========================================================================
    // NAT64 DNS
    // ========================================================================

    /// Point every IPv6-only node at NAT64 resolvers.
    pub async fn set_dns_all_nodes(&self) -> Result<DnsOutcome> {
        dns::set_dns_all_nodes(&self.executor, &self.topology.nodes, &self.config.nat64_nameservers).await
    }

    /// Undo [`set_dns_all_nodes`](Self::set_dns_all_nodes).
    pub async fn restore_dns_all_nodes(&self) -> Result<DnsOutcome> {
        dns::restore_dns_all_nodes(&self.executor, &self.topology.nodes).await
    }

    // ========================================================================
    // Control node software
    // ========================================================================

    /// A clone refused because the checkout already exists counts as done.
    async fn clone_repository(&self) -> Result<String> {
        let command = format!(
            "sudo -u {user} git clone -q -b {branch} {url} {dir}",
            user = self.layout.service_user(),
            branch = self.config.repo_branch,
            url = self.config.repo_url,
            dir = self.layout.repo_dir(),
        );
        let output = self.execute_on_control(&command, "clone repository").await?;

        let stderr = significant_stderr(&output.stderr);
        if stderr.contains(CLONE_EXISTS_MARKER) {
            info!(dir = %self.layout.repo_dir(), "repository already cloned");
        } else if !stderr.is_empty() {
            return CommandFailedSnafu {
                operation: "clone repository",
                node: self.control.name.clone(),
                stderr,
            }
            .fail();
        }
        Ok(DONE_VALUE.to_string())
    }

    async fn run_bootstrap_script(&self) -> Result<String> {
        let command = format!(
            "sudo -u {} {}/{}",
            self.layout.service_user(),
            self.layout.repo_dir(),
            BOOTSTRAP_SCRIPT
        );
        let output = self.execute_on_control(&command, "bootstrap script").await?;
        if output.has_stderr() {
            info!(stderr = %output.stderr.trim(), "bootstrap script stderr");
        }
        Ok(DONE_VALUE.to_string())
    }

    async fn run_bootstrap_playbook(&self) -> Result<String> {
        let user = self.layout.service_user();
        let repo = self.layout.repo_dir();
        let cfg = format!("{}/ansible.cfg", self.layout.common_dir());
        let command = format!(
            "sudo cp {repo}/{BOOTSTRAP_ANSIBLE_CFG} {cfg}; \
             sudo chown {user}:{user} {cfg}; \
             sudo -u {user} python3 {repo}/{BOOTSTRAP_PLAYBOOK_SCRIPT}"
        );
        let output = self.execute_on_control(&command, "bootstrap playbook").await?;
        if output.has_stderr() {
            info!(stderr = %output.stderr.trim(), "bootstrap playbook stderr");
        }
        Ok(DONE_VALUE.to_string())
    }

    // ========================================================================
    // Measurement network and hosts
    // ========================================================================

    async fn configure_measurement_network(&self, state: &mut RunState) -> Result<String> {
        let plan = plan_measurement_network(&self.topology, self.layout.service_user()).context(NetworkSnafu)?;
        let scripts: BTreeMap<String, String> = plan
            .nodes()
            .into_iter()
            .filter_map(|name| plan.node_script(name).map(|script| (name.to_string(), script)))
            .collect();
        let targets: Vec<Node> = self.topology.nodes.iter().filter(|n| scripts.contains_key(&n.name)).cloned().collect();

        let results = scatter_gather(&self.executor, &targets, |executor, node| {
            let script = scripts.get(&node.name).cloned().unwrap_or_default();
            async move {
                let output = executor.execute(&node, &script).await?;
                if output.has_stderr() {
                    warn!(node = %node.name, stderr = %output.stderr.trim(), "measurement interface setup reported errors");
                }
                Ok(())
            }
        })
        .await;
        let failed = failed_nodes(&results, "configure measurement interface");
        if !failed.is_empty() {
            return NodeFailuresSnafu {
                operation: "configure measurement interface",
                nodes: failed,
            }
            .fail();
        }

        let local = write_local_inventory(&self.layout, &plan.inventory).await.context(NetworkSnafu)?;
        publish_inventory(self.executor.as_ref(), &self.control, &self.layout, &local, self.retry)
            .await
            .context(NetworkSnafu)?;

        state.control_address = Some(plan.control_address());
        info!(control_address = %plan.control_address(), nodes = targets.len(), "measurement network configured");
        Ok(DONE_VALUE.to_string())
    }

    async fn set_hosts_entries(&self, state: &RunState) -> Result<String> {
        let address = match state.control_address.or_else(|| control_measurement_address(&self.topology)) {
            Some(address) => address,
            None => {
                // network stage was checkpointed by an earlier run
                let plan = plan_measurement_network(&self.topology, self.layout.service_user()).context(NetworkSnafu)?;
                info!(control_address = %plan.control_address(), "measurement address recomputed from the topology");
                plan.control_address()
            }
        };
        let command = hosts_entry_command(address, &self.config.measurement_node_name);

        let results = scatter_gather(&self.executor, &self.topology.nodes, |executor, node| {
            let command = command.clone();
            async move {
                let output = executor.execute(&node, &command).await?;
                if output.has_stderr() {
                    warn!(node = %node.name, stderr = %output.stderr.trim(), "hosts entry reported errors");
                }
                Ok(())
            }
        })
        .await;
        let failed = failed_nodes(&results, "add hosts entry");
        if !failed.is_empty() {
            return NodeFailuresSnafu {
                operation: "add hosts entry",
                nodes: failed,
            }
            .fail();
        }
        Ok(DONE_VALUE.to_string())
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn execute_on_control(&self, command: &str, operation: &str) -> Result<CommandOutput> {
        let output = self.executor.execute(&self.control, command).await.context(RemoteSnafu { operation })?;
        debug!(operation, stdout = %output.stdout, "control node command finished");
        Ok(output)
    }

    async fn download(&self, remote: &str, local: &Path, operation: &str) -> Result<()> {
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await.context(LocalIoSnafu { path: parent })?;
        }
        self.retry
            .run(operation, || self.executor.download_file(&self.control, remote, local))
            .await
            .context(RemoteSnafu { operation })
    }
}

/// Account, `.ssh` directory and sudo grant; each step is a no-op when
/// already applied.
fn account_prepare_command(user: &str, ssh_dir: &str) -> String {
    let grant = format!("{user} ALL=(ALL:ALL) NOPASSWD: ALL");
    format!(
        "id -u {user} > /dev/null 2>&1 || sudo useradd -G root -m {user}; \
         sudo mkdir -p {ssh_dir}; \
         sudo chmod 700 {ssh_dir}; \
         sudo chown -R {user}:{user} {ssh_dir}; \
         sudo grep -qxF '{grant}' {SUDOERS_FILE} || echo '{grant}' | sudo tee -a {SUDOERS_FILE} > /dev/null"
    )
}

/// Move the uploaded public key into place and authorize it once.
fn authorize_key_command(user: &str, ssh_dir: &str, staged: &str) -> String {
    let key = format!("{ssh_dir}/{staged}");
    let authorized = format!("{ssh_dir}/authorized_keys");
    format!(
        "sudo mv {staged} {key}; \
         sudo grep -qxF -f {key} {authorized} || sudo cat {key} | sudo tee -a {authorized} > /dev/null; \
         sudo chmod 644 {authorized}; \
         sudo chown -R {user}:{user} {ssh_dir}"
    )
}

fn hosts_entry_command(address: IpAddr, alias: &str) -> String {
    let entry = format!("{address} {alias}");
    format!("grep -qxF '{entry}' /etc/hosts || echo '{entry}' | sudo tee -a /etc/hosts > /dev/null")
}

/// Stderr without `sudo` hostname-resolution warnings.
fn significant_stderr(stderr: &str) -> String {
    stderr
        .lines()
        .filter(|line| !line.trim().is_empty() && !line.contains("unable to resolve host"))
        .collect::<Vec<_>>()
        .join("\n")
}
