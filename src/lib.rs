//! Controller for a measurement framework overlay on a provisioned
//! experiment.
//!
//! [`MeasurementFramework`] ties the pieces together for one topology:
//!
//! - bootstrap: service account, NAT64 DNS, repository checkout, measurement
//!   network and hosts entries, then the framework's own bootstrap scripts,
//!   each step checkpointed on the control node ([`mfctl_bootstrap`])
//! - service commands: `create`/`update`/`info`/`start`/`stop`/`remove`
//!   dispatched to per-service scripts on the control node
//!   ([`mfctl_services`])
//!
//! All remote actions go through a caller-supplied
//! [`RemoteExecutor`](mfctl_core::RemoteExecutor).

mod error;
mod framework;

pub use error::MfError;
pub use error::Result;
pub use framework::INSTRUMENTIZE_SERVICES;
pub use framework::MeasurementFramework;
pub use mfctl_bootstrap::BootstrapReport;
pub use mfctl_bootstrap::DnsOutcome;
pub use mfctl_bootstrap::Stage;
pub use mfctl_bootstrap::StageOutcome;
pub use mfctl_checkpoint::BootstrapStatus;
pub use mfctl_core::MfConfig;
pub use mfctl_core::RemoteExecutor;
pub use mfctl_core::Topology;
pub use mfctl_services::Command;
pub use mfctl_services::ServiceReply;

/// Install a `tracing` subscriber filtered by `RUST_LOG` (default `info`).
///
/// Meant for binaries and notebooks embedding the controller; libraries
/// should leave subscriber setup to their caller.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).compact().init();
}
