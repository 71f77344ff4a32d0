use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use mfctl_core::Layout;
use mfctl_core::Node;
use mfctl_core::RemoteExecutor;
use mfctl_core::RetryPolicy;
use serde_json::Value;
use snafu::ResultExt;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::error::ClearRemoteSnafu;
use crate::error::EncodeSnafu;
use crate::error::FetchSnafu;
use crate::error::LocalIoSnafu;
use crate::error::Result;
use crate::error::UploadSnafu;
use crate::status::BootstrapStatus;

/// Where [`CheckpointStore::get_with`] reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Refresh {
    /// Always download the remote document.
    #[default]
    Force,
    /// Use the local cache when it exists, download otherwise.
    CachedFirst,
}

/// Bootstrap status mirrored on the control node and in a local cache.
///
/// Single writer: concurrent `set` calls from different controllers can
/// interleave their read-modify-write cycles and lose an update.
pub struct CheckpointStore {
    layout: Layout,
    control: Node,
    executor: Arc<dyn RemoteExecutor>,
    retry: RetryPolicy,
}

impl CheckpointStore {
    pub fn new(layout: Layout, control: Node, executor: Arc<dyn RemoteExecutor>, retry: RetryPolicy) -> Self {
        Self {
            layout,
            control,
            executor,
            retry,
        }
    }

    /// Path of the local cache.
    pub fn local_path(&self) -> PathBuf {
        self.layout.local_status_path()
    }

    /// Download and return the current status.
    ///
    /// A missing remote document is an empty status. Any other failure is
    /// returned as [`CheckpointError::Fetch`](crate::CheckpointError::Fetch).
    pub async fn get(&self) -> Result<BootstrapStatus> {
        self.get_with(Refresh::Force).await
    }

    pub async fn get_with(&self, refresh: Refresh) -> Result<BootstrapStatus> {
        let local = self.local_path();

        if refresh == Refresh::CachedFirst {
            match tokio::fs::read(&local).await {
                Ok(bytes) => return Ok(BootstrapStatus::from_slice(&bytes)),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(source) => return Err(source).context(LocalIoSnafu { path: local }),
            }
        }

        ensure_parent(&local).await?;
        let download = local.with_extension("json.download");
        let remote = self.layout.remote_status_path();

        let fetched = self
            .retry
            .run("download bootstrap status", || self.executor.download_file(&self.control, remote, &download))
            .await;

        match fetched {
            Ok(()) => {
                tokio::fs::rename(&download, &local).await.context(LocalIoSnafu { path: local.clone() })?;
                let bytes = tokio::fs::read(&local).await.context(LocalIoSnafu { path: local })?;
                let status = BootstrapStatus::from_slice(&bytes);
                debug!(keys = status.len(), "fetched bootstrap status");
                Ok(status)
            }
            Err(err) if err.is_not_found() => {
                debug!("no bootstrap status on control node");
                remove_if_exists(&download).await?;
                Ok(BootstrapStatus::new())
            }
            Err(source) => {
                remove_if_exists(&download).await?;
                warn!(node = %self.control.name, error = %source, "cannot fetch bootstrap status");
                Err(source).context(FetchSnafu)
            }
        }
    }

    /// Set one key and publish the whole document.
    ///
    /// The merged document is written locally before the upload. If the
    /// upload fails the local cache stays ahead of the control node; calling
    /// `set` again with the same key is safe.
    pub async fn set(&self, key: &str, value: impl Into<Value>) -> Result<BootstrapStatus> {
        let value = value.into();
        let mut status = self.get().await?;
        status.insert(key, value.clone());

        let local = self.local_path();
        write_atomic(&local, &status.to_vec().context(EncodeSnafu)?).await?;

        let remote = self.layout.remote_status_path();
        self.retry
            .run("upload bootstrap status", || self.executor.upload_file(&self.control, &local, remote))
            .await
            .context(UploadSnafu { key })?;

        info!(key, value = %value, "bootstrap status updated");
        Ok(status)
    }

    /// Delete both copies.
    ///
    /// The local copy is removed even when the remote removal fails.
    pub async fn clear(&self) -> Result<()> {
        remove_if_exists(&self.local_path()).await?;

        let command = format!("rm -f {}", self.layout.remote_status_path());
        let output = self.executor.execute(&self.control, &command).await.context(ClearRemoteSnafu)?;
        if output.has_stderr() {
            warn!(stderr = %output.stderr.trim(), "removing remote bootstrap status reported errors");
        }

        info!("bootstrap status cleared");
        Ok(())
    }
}

async fn ensure_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            tokio::fs::create_dir_all(parent).await.context(LocalIoSnafu { path: parent })
        }
        _ => Ok(()),
    }
}

async fn write_atomic(path: &Path, payload: &[u8]) -> Result<()> {
    ensure_parent(path).await?;

    let tmp_path = path.with_extension("json.tmp");
    let mut file = tokio::fs::File::create(&tmp_path).await.context(LocalIoSnafu { path: &tmp_path })?;
    file.write_all(payload).await.context(LocalIoSnafu { path: &tmp_path })?;
    file.sync_all().await.context(LocalIoSnafu { path: &tmp_path })?;
    tokio::fs::rename(&tmp_path, path).await.context(LocalIoSnafu { path })?;
    Ok(())
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(source).context(LocalIoSnafu { path }),
    }
}

#[cfg(test)]
mod tests {
    use mfctl_core::ErrorKind;
    use mfctl_core::MfConfig;
    use mfctl_testing::SimulatedExecutor;
    use mfctl_testing::fixtures;

    use super::*;
    use crate::CheckpointError;

    struct Harness {
        _dir: tempfile::TempDir,
        executor: Arc<SimulatedExecutor>,
        control: Node,
        store: CheckpointStore,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let config = MfConfig {
            local_storage_dir: dir.path().to_path_buf(),
            ..MfConfig::default()
        };
        let topology = fixtures::three_node_topology();
        let layout = Layout::new(&config, &topology.name).unwrap();
        let control = topology.control_node().unwrap().clone();
        let executor = Arc::new(SimulatedExecutor::new());
        let store = CheckpointStore::new(layout, control.clone(), executor.clone(), RetryPolicy::none());
        Harness {
            _dir: dir,
            executor,
            control,
            store,
        }
    }

    #[tokio::test]
    async fn test_missing_remote_reads_as_empty() {
        let h = harness();
        let status = h.store.get().await.unwrap();
        assert!(status.is_empty());
    }

    #[tokio::test]
    async fn test_set_then_get_merges_keys() {
        let h = harness();
        h.store.set("mfuser_keys", "ok").await.unwrap();
        h.store.set("k", "v").await.unwrap();

        let status = h.store.get().await.unwrap();
        assert_eq!(status.get_str("k"), Some("v"));
        assert_eq!(status.get_str("mfuser_keys"), Some("ok"));

        let remote = h.executor.file_text(&h.control, "bootstrap_status.json").await.unwrap();
        let remote: serde_json::Value = serde_json::from_str(&remote).unwrap();
        assert_eq!(remote["k"], "v");
        assert_eq!(remote["mfuser_keys"], "ok");
    }

    #[tokio::test]
    async fn test_set_overwrites_same_key() {
        let h = harness();
        h.store.set("ipv6_4_nat", "set").await.unwrap();
        let status = h.store.set("ipv6_4_nat", "not needed").await.unwrap();
        assert_eq!(status.get_str("ipv6_4_nat"), Some("not needed"));
        assert_eq!(status.len(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_is_distinct_from_empty() {
        let h = harness();
        h.executor.disconnect(&h.control.name).await;
        let err = h.store.get().await.unwrap_err();
        assert!(matches!(err, CheckpointError::Fetch { .. }));
        assert_eq!(err.kind(), ErrorKind::Transport);
    }

    #[tokio::test]
    async fn test_failed_upload_leaves_local_ahead() {
        let h = harness();
        h.store.set("mfuser_keys", "ok").await.unwrap();
        h.executor.fail_uploads_on(&h.control.name, "bootstrap_status.json").await;

        let err = h.store.set("repo_cloned", "ok").await.unwrap_err();
        assert!(matches!(err, CheckpointError::Upload { ref key, .. } if key == "repo_cloned"));
        assert_eq!(err.kind(), ErrorKind::Transport);

        let cached = h.store.get_with(Refresh::CachedFirst).await.unwrap();
        assert_eq!(cached.get_str("repo_cloned"), Some("ok"));
        assert_eq!(cached.get_str("mfuser_keys"), Some("ok"));

        let remote = h.executor.file_text(&h.control, "bootstrap_status.json").await.unwrap();
        assert!(!remote.contains("repo_cloned"));

        // Re-running the same set once the control node accepts uploads converges.
        h.executor.clear_rules().await;
        h.store.set("repo_cloned", "ok").await.unwrap();
        let status = h.store.get().await.unwrap();
        assert_eq!(status.get_str("repo_cloned"), Some("ok"));
        assert_eq!(status.get_str("mfuser_keys"), Some("ok"));
    }

    #[tokio::test]
    async fn test_retry_policy_covers_transient_download_failures() {
        let h = harness();
        h.store.set("mfuser_keys", "ok").await.unwrap();
        h.executor.fail_transfer_times("bootstrap_status.json", 1).await;

        let retrying = CheckpointStore::new(
            h.store.layout.clone(),
            h.control.clone(),
            h.executor.clone(),
            RetryPolicy::new(2, std::time::Duration::ZERO),
        );
        let status = retrying.get().await.unwrap();
        assert_eq!(status.get_str("mfuser_keys"), Some("ok"));
    }

    #[tokio::test]
    async fn test_cached_first_skips_download() {
        let h = harness();
        h.store.set("mfuser_keys", "ok").await.unwrap();
        h.executor.clear_operations().await;

        let status = h.store.get_with(Refresh::CachedFirst).await.unwrap();
        assert!(status.is_done("mfuser_keys", &["ok"]));
        assert!(h.executor.operations().await.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_remote_document_reads_as_empty() {
        let h = harness();
        h.executor.add_file(&h.control, "bootstrap_status.json", "{\"status\": ").await;
        assert!(h.store.get().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_removes_both_copies() {
        let h = harness();
        h.store.set("status", "ready").await.unwrap();
        assert!(h.store.local_path().exists());

        h.store.clear().await.unwrap();
        assert!(!h.store.local_path().exists());
        assert!(!h.executor.has_file(&h.control, "bootstrap_status.json").await);
        assert!(h.store.get().await.unwrap().is_empty());
    }
}
