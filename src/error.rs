use mfctl_bootstrap::BootstrapError;
use mfctl_checkpoint::CheckpointError;
use mfctl_core::ConfigError;
use mfctl_core::ErrorKind;
use mfctl_core::TopologyError;
use mfctl_services::ServiceError;
use snafu::Snafu;

/// Errors surfaced by [`MeasurementFramework`](crate::MeasurementFramework).
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MfError {
    #[snafu(display("invalid configuration: {source}"))]
    Config { source: ConfigError },

    #[snafu(display("invalid topology: {source}"))]
    Topology { source: TopologyError },

    #[snafu(display("bootstrap failed: {source}"))]
    Bootstrap { source: BootstrapError },

    #[snafu(display("bootstrap status: {source}"))]
    Checkpoint { source: CheckpointError },

    #[snafu(display("service command failed: {source}"))]
    Service { source: ServiceError },
}

impl MfError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MfError::Config { source } => source.kind(),
            MfError::Topology { .. } => ErrorKind::Validation,
            MfError::Bootstrap { source } => source.kind(),
            MfError::Checkpoint { source } => source.kind(),
            MfError::Service { source } => source.kind(),
        }
    }
}

pub type Result<T, E = MfError> = std::result::Result<T, E>;
