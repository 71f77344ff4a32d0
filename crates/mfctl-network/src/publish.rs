use std::path::Path;
use std::path::PathBuf;

use mfctl_core::Layout;
use mfctl_core::Node;
use mfctl_core::RemoteExecutor;
use mfctl_core::RetryPolicy;
use mfctl_core::remote_temp_path;
use snafu::ResultExt;
use tracing::info;
use tracing::warn;

use crate::error::LocalIoSnafu;
use crate::error::PublishSnafu;
use crate::error::Result;
use crate::inventory::HostsInventory;

/// Write the rendered inventory to the topology's local `hosts.ini`.
pub async fn write_local_inventory(layout: &Layout, inventory: &HostsInventory) -> Result<PathBuf> {
    let path = layout.local_hosts_path();
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.context(LocalIoSnafu { path: parent })?;
    }
    tokio::fs::write(&path, inventory.render()).await.context(LocalIoSnafu { path: &path })?;
    Ok(path)
}

/// Install a local inventory file as the shared `services/common/hosts.ini`
/// on the control node.
///
/// The file is staged under a random `/tmp` name, moved into place, and the
/// services and repository trees are handed to the service account.
pub async fn publish_inventory(
    executor: &dyn RemoteExecutor,
    control: &Node,
    layout: &Layout,
    local: &Path,
    retry: RetryPolicy,
) -> Result<()> {
    let staged = remote_temp_path("mf_hosts_");
    retry
        .run("upload hosts inventory", || executor.upload_file(control, local, &staged))
        .await
        .context(PublishSnafu)?;

    let user = layout.service_user();
    let command = format!(
        "sudo mkdir -p {common}; sudo mv {staged} {hosts}; sudo chown -R {user}:{user} {services} {repo}",
        common = layout.common_dir(),
        hosts = layout.common_hosts_path(),
        services = layout.services_dir(),
        repo = layout.repo_dir(),
    );
    let output = executor.execute(control, &command).await.context(PublishSnafu)?;
    if output.has_stderr() {
        warn!(node = %control.name, stderr = %output.stderr.trim(), "installing hosts inventory reported errors");
    }

    info!(path = %layout.common_hosts_path(), "hosts inventory published");
    Ok(())
}
