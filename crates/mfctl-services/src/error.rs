use std::path::PathBuf;

use mfctl_core::ErrorKind;
use mfctl_core::RemoteError;
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ServiceError {
    /// The name cannot denote a service directory.
    #[snafu(display("invalid service name '{name}': {reason}"))]
    InvalidServiceName { name: String, reason: String },

    /// The service is not in the control node's service listing.
    #[snafu(display("service '{name}' does not exist on the control node"))]
    UnknownService { name: String },

    /// A requested path escapes the service directory.
    #[snafu(display("path '{path}' must stay within the service directory"))]
    PathTraversal { path: String },

    #[snafu(display("local path {} cannot be uploaded: {reason}", path.display()))]
    InvalidLocalPath { path: PathBuf, reason: String },

    /// Directory upload refused because the target exists and overwrite was not requested.
    #[snafu(display("directory '{name}' already exists for service '{service}'; pass overwrite to replace it"))]
    DirectoryExists { service: String, name: String },

    #[snafu(display("failed to list services: {source}"))]
    Listing { source: RemoteError },

    #[snafu(display("{operation} failed: {source}"))]
    Transfer { operation: String, source: RemoteError },

    #[snafu(display("local I/O on {} failed: {source}", path.display()))]
    LocalIo { path: PathBuf, source: std::io::Error },

    #[snafu(display("failed to encode service payload: {source}"))]
    Encode { source: serde_json::Error },
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::InvalidServiceName { .. }
            | ServiceError::UnknownService { .. }
            | ServiceError::PathTraversal { .. }
            | ServiceError::InvalidLocalPath { .. }
            | ServiceError::DirectoryExists { .. } => ErrorKind::Validation,
            ServiceError::Listing { source } | ServiceError::Transfer { source, .. } => source.kind(),
            ServiceError::LocalIo { .. } => ErrorKind::Local,
            ServiceError::Encode { .. } => ErrorKind::Parse,
        }
    }
}

pub type Result<T, E = ServiceError> = std::result::Result<T, E>;
