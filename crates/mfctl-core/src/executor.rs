//! Remote execution capability.
//!
//! The controller never talks SSH itself. Everything it does on a node goes
//! through a [`RemoteExecutor`], supplied by the provisioning layer (or by
//! `mfctl-testing` in tests).

use std::path::Path;

use async_trait::async_trait;

use crate::error::RemoteError;
use crate::topology::Node;

/// Captured output of a remote shell command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Build an output from stdout/stderr text.
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// Output with only stdout set.
    pub fn stdout(stdout: impl Into<String>) -> Self {
        Self::new(stdout, "")
    }

    /// Whether anything was written to stderr.
    pub fn has_stderr(&self) -> bool {
        !self.stderr.trim().is_empty()
    }
}

/// Runs commands and moves files on remote nodes.
///
/// Remote paths are POSIX strings; relative paths resolve against the login
/// user's home directory. Implementations enforce their own timeouts; the
/// controller adds none.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run a shell command on `node` and capture its output.
    async fn execute(&self, node: &Node, command: &str) -> Result<CommandOutput, RemoteError>;

    /// Copy a local file to `remote` on `node`.
    async fn upload_file(&self, node: &Node, local: &Path, remote: &str) -> Result<(), RemoteError>;

    /// Copy `remote` on `node` to a local file.
    ///
    /// Returns [`RemoteError::NotFound`] when the remote file does not exist.
    async fn download_file(&self, node: &Node, remote: &str, local: &Path) -> Result<(), RemoteError>;

    /// Recursively copy a local directory so that it lands at `remote`.
    async fn upload_directory(&self, node: &Node, local: &Path, remote: &str) -> Result<(), RemoteError>;

    /// List entry names in a remote directory.
    ///
    /// Returns [`RemoteError::NotFound`] when the directory does not exist.
    async fn list_directory(&self, node: &Node, remote: &str) -> Result<Vec<String>, RemoteError>;
}
