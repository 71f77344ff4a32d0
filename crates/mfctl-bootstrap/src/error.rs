use std::path::PathBuf;

use mfctl_checkpoint::CheckpointError;
use mfctl_core::ErrorKind;
use mfctl_core::RemoteError;
use mfctl_core::TopologyError;
use mfctl_network::NetworkError;
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum BootstrapError {
    #[snafu(display("invalid topology: {source}"))]
    Topology { source: TopologyError },

    #[snafu(display("bootstrap status unavailable: {source}"))]
    Checkpoint { source: CheckpointError },

    #[snafu(display("{operation} failed: {source}"))]
    Remote { operation: String, source: RemoteError },

    /// Some nodes of a fan-out failed; the rest completed.
    #[snafu(display("{operation} failed on {}", nodes.join(", ")))]
    NodeFailures { operation: String, nodes: Vec<String> },

    #[snafu(display("{operation} on node {node} reported: {stderr}"))]
    CommandFailed {
        operation: String,
        node: String,
        stderr: String,
    },

    #[snafu(display("measurement network: {source}"))]
    Network { source: NetworkError },

    #[snafu(display("local I/O on {} failed: {source}", path.display()))]
    LocalIo { path: PathBuf, source: std::io::Error },
}

impl BootstrapError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BootstrapError::Topology { .. } => ErrorKind::Validation,
            BootstrapError::Checkpoint { source } => source.kind(),
            BootstrapError::Remote { source, .. } => source.kind(),
            BootstrapError::NodeFailures { .. } | BootstrapError::CommandFailed { .. } => ErrorKind::Transport,
            BootstrapError::Network { source } => source.kind(),
            BootstrapError::LocalIo { .. } => ErrorKind::Local,
        }
    }
}

pub type Result<T, E = BootstrapError> = std::result::Result<T, E>;
