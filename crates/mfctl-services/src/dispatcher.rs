use std::io::Write;
use std::path::Component;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use mfctl_core::Layout;
use mfctl_core::Node;
use mfctl_core::RemoteError;
use mfctl_core::RemoteExecutor;
use mfctl_core::RetryPolicy;
use mfctl_core::constants::COMMON_SERVICE_DIR;
use mfctl_core::remote_temp_path;
use serde_json::Value;
use snafu::ResultExt;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::command::Command;
use crate::error::DirectoryExistsSnafu;
use crate::error::EncodeSnafu;
use crate::error::InvalidLocalPathSnafu;
use crate::error::InvalidServiceNameSnafu;
use crate::error::ListingSnafu;
use crate::error::LocalIoSnafu;
use crate::error::PathTraversalSnafu;
use crate::error::Result;
use crate::error::TransferSnafu;
use crate::error::UnknownServiceSnafu;
use crate::reply::ServiceReply;
use crate::reply::parse_reply;

/// Runs service commands on the control node.
pub struct ServiceDispatcher {
    layout: Layout,
    control: Node,
    executor: Arc<dyn RemoteExecutor>,
    retry: RetryPolicy,
}

impl ServiceDispatcher {
    pub fn new(layout: Layout, control: Node, executor: Arc<dyn RemoteExecutor>, retry: RetryPolicy) -> Self {
        Self {
            layout,
            control,
            executor,
            retry,
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    // ========================================================================
    // Service commands
    // ========================================================================

    /// Names of the services installed on the control node, sorted.
    ///
    /// The shared `common` directory is not a service. A missing services
    /// tree lists as empty.
    pub async fn list_services(&self) -> Result<Vec<String>> {
        let services_dir = self.layout.services_dir();
        match self.executor.list_directory(&self.control, &services_dir).await {
            Ok(mut entries) => {
                entries.retain(|name| !name.is_empty() && name != COMMON_SERVICE_DIR);
                entries.sort();
                Ok(entries)
            }
            Err(RemoteError::NotFound { .. }) => {
                debug!(path = %services_dir, "no services directory on control node");
                Ok(Vec::new())
            }
            Err(source) => Err(source).context(ListingSnafu),
        }
    }

    /// Stage inputs and run `command` for `service`.
    ///
    /// Name and listing problems are errors. Once validation passes, any
    /// failure to stage inputs or run the script yields an indeterminate
    /// (empty) reply, as does output without a decodable JSON object.
    pub async fn invoke(
        &self,
        service: &str,
        command: Command,
        payload: Option<&Value>,
        files: &[PathBuf],
    ) -> Result<ServiceReply> {
        validate_service_name(service)?;
        for file in files {
            local_file_name(file)?;
        }
        if command.requires_listed_service() {
            self.ensure_listed(service).await?;
        }

        let empty = Value::Object(serde_json::Map::new());
        if let Err(err) = self.stage_data(service, payload.unwrap_or(&empty)).await {
            warn!(service, %command, error = %err, "cannot stage service data");
            return Ok(ServiceReply::empty());
        }
        for file in files {
            if let Err(err) = self.stage_file(service, file).await {
                warn!(service, %command, file = %file.display(), error = %err, "cannot stage service file");
                return Ok(ServiceReply::empty());
            }
        }

        let script = self.layout.service_script_path(service, command.as_str());
        let run = format!("sudo -u {} python3 {}", self.layout.service_user(), script);
        let output = match self.executor.execute(&self.control, &run).await {
            Ok(output) => output,
            Err(err) => {
                warn!(service, %command, error = %err, "service command did not run");
                return Ok(ServiceReply::empty());
            }
        };
        debug!(service, %command, stdout = %output.stdout, stderr = %output.stderr, "service command output");

        let reply = parse_reply(&output.stdout);
        if reply.is_indeterminate() {
            warn!(service, %command, stderr = %output.stderr.trim(), "service command returned no reply");
        } else {
            info!(service, %command, success = ?reply.success(), "service command finished");
        }
        Ok(reply)
    }

    pub async fn create(&self, service: &str, payload: Option<&Value>, files: &[PathBuf]) -> Result<ServiceReply> {
        self.invoke(service, Command::Create, payload, files).await
    }

    pub async fn update(&self, service: &str, payload: Option<&Value>, files: &[PathBuf]) -> Result<ServiceReply> {
        self.invoke(service, Command::Update, payload, files).await
    }

    pub async fn info(&self, service: &str, payload: Option<&Value>) -> Result<ServiceReply> {
        self.invoke(service, Command::Info, payload, &[]).await
    }

    /// Start each service in order, collecting one result per service.
    pub async fn start(&self, services: &[&str]) -> Vec<(String, Result<ServiceReply>)> {
        self.invoke_each(services, Command::Start).await
    }

    pub async fn stop(&self, services: &[&str]) -> Vec<(String, Result<ServiceReply>)> {
        self.invoke_each(services, Command::Stop).await
    }

    pub async fn remove(&self, services: &[&str]) -> Vec<(String, Result<ServiceReply>)> {
        self.invoke_each(services, Command::Remove).await
    }

    async fn invoke_each(&self, services: &[&str], command: Command) -> Vec<(String, Result<ServiceReply>)> {
        let mut results = Vec::with_capacity(services.len());
        for service in services {
            let result = self.invoke(service, command, None, &[]).await;
            results.push((service.to_string(), result));
        }
        results
    }

    // ========================================================================
    // Maintenance operations
    // ========================================================================

    /// Fetch the log `method` wrote for `service`. Returns the local path and
    /// the log text.
    pub async fn download_log(&self, service: &str, method: Command) -> Result<(PathBuf, String)> {
        validate_service_name(service)?;
        self.ensure_listed(service).await?;

        let remote = self.layout.remote_log_path(service, method.as_str());
        let local = self.layout.local_log_path(service, method.as_str());
        self.download(&remote, &local, "download service log").await?;
        let text = read_text(&local).await?;
        Ok((local, text))
    }

    /// Fetch a file from inside a service directory.
    ///
    /// `relative` is resolved against the service directory and may not
    /// leave it. Without `local`, the file lands at
    /// `<local storage>/<service>/<relative>`.
    pub async fn download_service_file(
        &self,
        service: &str,
        relative: &str,
        local: Option<&Path>,
    ) -> Result<PathBuf> {
        validate_service_name(service)?;
        validate_relative_path(relative)?;
        self.ensure_listed(service).await?;

        let remote = format!("{}/{}", self.layout.service_dir(service), relative);
        let local = match local {
            Some(path) => path.to_path_buf(),
            None => self.layout.local_service_file_path(service, relative),
        };
        self.download(&remote, &local, "download service file").await?;
        info!(service, file = relative, local = %local.display(), "service file downloaded");
        Ok(local)
    }

    /// Copy local files into the service's `files/` area. Returns the
    /// installed remote paths.
    pub async fn upload_service_files(&self, service: &str, files: &[PathBuf]) -> Result<Vec<String>> {
        validate_service_name(service)?;
        for file in files {
            local_file_name(file)?;
        }
        self.ensure_listed(service).await?;

        let mut installed = Vec::with_capacity(files.len());
        for file in files {
            installed.push(self.stage_file(service, file).await?);
        }
        Ok(installed)
    }

    /// Copy a local directory tree to `files/<dir name>` of a service.
    ///
    /// An existing target is replaced only when `overwrite` is set.
    pub async fn upload_service_directory(&self, service: &str, local_dir: &Path, overwrite: bool) -> Result<String> {
        validate_service_name(service)?;
        let name = local_dir_name(local_dir).await?;
        self.ensure_listed(service).await?;

        let files_dir = self.layout.service_files_dir(service);
        let target = format!("{files_dir}/{name}");
        let exists = match self.executor.list_directory(&self.control, &files_dir).await {
            Ok(entries) => entries.iter().any(|entry| *entry == name),
            Err(RemoteError::NotFound { .. }) => false,
            Err(source) => {
                return Err(source).context(TransferSnafu {
                    operation: "list service files",
                });
            }
        };
        if exists {
            if !overwrite {
                return DirectoryExistsSnafu { service, name }.fail();
            }
            info!(service, target = %target, "replacing existing service directory");
            self.run_checked(&format!("sudo rm -rf {target}"), "remove service directory").await?;
        }

        let staging = remote_temp_path("mf_dir_");
        let staged = format!("{staging}/{name}");
        self.retry
            .run("upload service directory", || {
                self.executor.upload_directory(&self.control, local_dir, &staged)
            })
            .await
            .context(TransferSnafu {
                operation: "upload service directory",
            })?;

        let user = self.layout.service_user();
        let install = format!(
            "sudo mkdir -p {files_dir}; sudo mv -f {staged} {files_dir}; sudo chown -R {user}:{user} {target}; sudo rm -rf {staging}"
        );
        self.run_checked(&install, "install service directory").await?;
        info!(service, target = %target, "service directory uploaded");
        Ok(target)
    }

    /// Fetch the shared hosts inventory. Returns the local path and its text.
    pub async fn download_common_hosts(&self) -> Result<(PathBuf, String)> {
        let local = self.layout.local_hosts_path();
        self.download(&self.layout.common_hosts_path(), &local, "download hosts inventory").await?;
        let text = read_text(&local).await?;
        Ok((local, text))
    }

    // ========================================================================
    // Staging
    // ========================================================================

    async fn ensure_listed(&self, service: &str) -> Result<()> {
        let services = self.list_services().await?;
        if services.iter().any(|name| name == service) {
            Ok(())
        } else {
            UnknownServiceSnafu { name: service }.fail()
        }
    }

    /// Install `payload` as the service's `data/data.json`.
    async fn stage_data(&self, service: &str, payload: &Value) -> Result<()> {
        let bytes = serde_json::to_vec(payload).context(EncodeSnafu)?;
        let mut local = tempfile::NamedTempFile::new().context(LocalIoSnafu {
            path: std::env::temp_dir(),
        })?;
        local.write_all(&bytes).context(LocalIoSnafu { path: local.path() })?;
        local.flush().context(LocalIoSnafu { path: local.path() })?;

        let staged = remote_temp_path("mf_service_data_");
        self.retry
            .run("upload service data", || self.executor.upload_file(&self.control, local.path(), &staged))
            .await
            .context(TransferSnafu {
                operation: "upload service data",
            })?;

        let user = self.layout.service_user();
        let data_path = self.layout.service_data_path(service);
        self.run_checked(
            &format!("sudo mv {staged} {data_path}; sudo chown {user}:{user} {data_path}"),
            "install service data",
        )
        .await?;
        debug!(service, path = %data_path, "service data staged");
        Ok(())
    }

    /// Install one local file into the service's `files/` area.
    async fn stage_file(&self, service: &str, file: &Path) -> Result<String> {
        let name = local_file_name(file)?;
        let staged = remote_temp_path("mf_file_");
        self.retry
            .run("upload service file", || self.executor.upload_file(&self.control, file, &staged))
            .await
            .context(TransferSnafu {
                operation: "upload service file",
            })?;

        let user = self.layout.service_user();
        let files_dir = self.layout.service_files_dir(service);
        let target = format!("{files_dir}/{name}");
        self.run_checked(
            &format!("sudo mkdir -p {files_dir}; sudo mv {staged} {target}; sudo chown {user}:{user} {target}"),
            "install service file",
        )
        .await?;
        debug!(service, path = %target, "service file staged");
        Ok(target)
    }

    /// Run a command, logging anything it wrote to stderr.
    async fn run_checked(&self, command: &str, operation: &str) -> Result<()> {
        let output = self
            .executor
            .execute(&self.control, command)
            .await
            .context(TransferSnafu { operation })?;
        if output.has_stderr() {
            warn!(operation, stderr = %output.stderr.trim(), "remote command reported errors");
        }
        Ok(())
    }

    async fn download(&self, remote: &str, local: &Path, operation: &str) -> Result<()> {
        if let Some(parent) = local.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.context(LocalIoSnafu { path: parent })?;
            }
        }
        self.retry
            .run(operation, || self.executor.download_file(&self.control, remote, local))
            .await
            .context(TransferSnafu { operation })
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Service names are single directory components of letters, digits, `_`,
/// `-` and `.`, and never the shared `common` directory.
fn validate_service_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        Some("name is empty")
    } else if name == "." || name == ".." {
        Some("name is a relative directory reference")
    } else if !name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')) {
        Some("only letters, digits, '_', '-' and '.' are allowed")
    } else if name == COMMON_SERVICE_DIR {
        Some("the common directory is not a service")
    } else {
        None
    };
    match reason {
        Some(reason) => InvalidServiceNameSnafu { name, reason }.fail(),
        None => Ok(()),
    }
}

fn validate_relative_path(relative: &str) -> Result<()> {
    let path = Path::new(relative);
    let escapes = relative.is_empty()
        || path.components().any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        || relative.contains('\0');
    if escapes {
        return PathTraversalSnafu { path: relative }.fail();
    }
    Ok(())
}

fn local_file_name(file: &Path) -> Result<String> {
    file.file_name().and_then(|n| n.to_str()).map(str::to_string).ok_or_else(|| {
        InvalidLocalPathSnafu {
            path: file,
            reason: "path has no usable file name",
        }
        .build()
    })
}

async fn local_dir_name(dir: &Path) -> Result<String> {
    let metadata = tokio::fs::metadata(dir).await.context(LocalIoSnafu { path: dir })?;
    if !metadata.is_dir() {
        return InvalidLocalPathSnafu {
            path: dir,
            reason: "not a directory",
        }
        .fail();
    }
    dir.file_name().and_then(|n| n.to_str()).map(str::to_string).ok_or_else(|| {
        InvalidLocalPathSnafu {
            path: dir,
            reason: "directory has no usable name",
        }
        .build()
    })
}

async fn read_text(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path).await.context(LocalIoSnafu { path })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
