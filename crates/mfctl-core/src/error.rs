//! Error types shared by every mfctl component.
//!
//! Each crate defines its own snafu enum; all of them classify into an
//! [`ErrorKind`] so callers can branch on the failure class without
//! matching on display strings.

use std::fmt;
use std::path::PathBuf;

use snafu::Snafu;

/// Coarse classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Remote execution, upload or download failed (connectivity, SFTP, ...).
    Transport,
    /// A remote artifact does not exist yet. Usually "not done", not a fault.
    NotFound,
    /// Input rejected before any remote I/O was attempted.
    Validation,
    /// Output from a remote command or a stored document could not be decoded.
    Parse,
    /// Local filesystem failure.
    Local,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Transport => "transport",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Validation => "validation",
            ErrorKind::Parse => "parse",
            ErrorKind::Local => "local",
        };
        f.write_str(s)
    }
}

/// Errors produced by a [`RemoteExecutor`](crate::RemoteExecutor).
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RemoteError {
    /// The operation could not be carried out on the node.
    #[snafu(display("{operation} on node {node} failed: {message}"))]
    Transport {
        /// Node the operation targeted.
        node: String,
        /// Short operation name (`execute`, `upload`, `download`, ...).
        operation: String,
        /// Transport-level description.
        message: String,
    },

    /// The remote path does not exist.
    #[snafu(display("remote path {path} not found on node {node}"))]
    NotFound {
        /// Node the operation targeted.
        node: String,
        /// Remote path that was missing.
        path: String,
    },

    /// Reading or writing the local side of a transfer failed.
    #[snafu(display("local I/O on {} failed: {source}", path.display()))]
    LocalIo { path: PathBuf, source: std::io::Error },
}

impl RemoteError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RemoteError::Transport { .. } => ErrorKind::Transport,
            RemoteError::NotFound { .. } => ErrorKind::NotFound,
            RemoteError::LocalIo { .. } => ErrorKind::Local,
        }
    }

    /// Whether this error only signals a missing remote artifact.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound { .. })
    }
}

/// Errors raised while interpreting a topology snapshot.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TopologyError {
    /// No node carries the control role.
    #[snafu(display("topology {topology} has no control node"))]
    NoControlNode { topology: String },

    /// More than one node carries the control role.
    #[snafu(display("topology {topology} has {count} control nodes, expected exactly one"))]
    MultipleControlNodes { topology: String, count: usize },

    /// A network references a node that is not part of the topology.
    #[snafu(display("node {name} is not part of the topology"))]
    UnknownNode { name: String },

    /// A network references an interface the node does not have.
    #[snafu(display("node {node} has no interface named {interface}"))]
    UnknownInterface { node: String, interface: String },

    /// A subnet string could not be parsed.
    #[snafu(display("invalid subnet '{input}': {reason}"))]
    InvalidSubnet { input: String, reason: String },

    /// The topology name cannot be used as a directory name.
    #[snafu(display("invalid topology name '{name}'"))]
    InvalidTopologyName { name: String },
}

impl TopologyError {
    /// Topology errors are always input validation failures.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Validation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_kinds() {
        let err = RemoteError::NotFound {
            node: "meas-node".into(),
            path: "bootstrap_status.json".into(),
        };
        assert!(err.is_not_found());
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = RemoteError::Transport {
            node: "meas-node".into(),
            operation: "download".into(),
            message: "connection reset".into(),
        };
        assert!(!err.is_not_found());
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(err.to_string().contains("connection reset"));
    }
}
