use std::path::PathBuf;

use mfctl_core::ErrorKind;
use mfctl_core::RemoteError;
use snafu::Snafu;

/// Errors from the checkpoint store.
///
/// A missing remote document is never an error; it reads as an empty status.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CheckpointError {
    /// The remote document could not be fetched.
    #[snafu(display("failed to fetch bootstrap status: {source}"))]
    Fetch { source: RemoteError },

    /// The merged document was written locally but not uploaded.
    #[snafu(display("bootstrap status key '{key}' saved locally but upload failed: {source}"))]
    Upload { key: String, source: RemoteError },

    /// Removing the remote document failed.
    #[snafu(display("failed to remove remote bootstrap status: {source}"))]
    ClearRemote { source: RemoteError },

    #[snafu(display("local bootstrap status I/O on {} failed: {source}", path.display()))]
    LocalIo { path: PathBuf, source: std::io::Error },

    #[snafu(display("failed to encode bootstrap status: {source}"))]
    Encode { source: serde_json::Error },
}

impl CheckpointError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CheckpointError::Fetch { source }
            | CheckpointError::Upload { source, .. }
            | CheckpointError::ClearRemote { source } => source.kind(),
            CheckpointError::LocalIo { .. } => ErrorKind::Local,
            CheckpointError::Encode { .. } => ErrorKind::Parse,
        }
    }
}

pub type Result<T, E = CheckpointError> = std::result::Result<T, E>;
