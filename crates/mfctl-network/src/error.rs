use std::path::PathBuf;

use mfctl_core::ErrorKind;
use mfctl_core::RemoteError;
use mfctl_core::TopologyError;
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum NetworkError {
    #[snafu(display("invalid topology: {source}"))]
    Topology { source: TopologyError },

    /// The control node is not attached to any measurement network.
    #[snafu(display("control node {node} has no measurement network interface"))]
    NoControlNetwork { node: String },

    /// A network ran out of free addresses.
    #[snafu(display("measurement network {network} has no free address left for {node}/{interface}"))]
    PoolExhausted {
        network: String,
        node: String,
        interface: String,
    },

    #[snafu(display("failed to publish hosts inventory: {source}"))]
    Publish { source: RemoteError },

    #[snafu(display("hosts inventory I/O on {} failed: {source}", path.display()))]
    LocalIo { path: PathBuf, source: std::io::Error },
}

impl NetworkError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            NetworkError::Topology { .. } | NetworkError::NoControlNetwork { .. } | NetworkError::PoolExhausted { .. } => {
                ErrorKind::Validation
            }
            NetworkError::Publish { source } => source.kind(),
            NetworkError::LocalIo { .. } => ErrorKind::Local,
        }
    }
}

pub type Result<T, E = NetworkError> = std::result::Result<T, E>;
