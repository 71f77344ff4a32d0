//! Core types for the measurement framework controller.
//!
//! This crate holds what every other mfctl crate shares:
//!
//! - [`Topology`], [`Node`] and [`Network`]: the snapshot of an already
//!   provisioned experiment the controller operates on
//! - [`RemoteExecutor`]: the capability used for every remote action
//! - [`MfConfig`] and [`Layout`]: configuration and the paths derived from it
//! - [`ErrorKind`]: the failure classification all crate errors map onto
//! - [`RetryPolicy`]: bounded retry for file transfers

pub mod config;
pub mod constants;
pub mod error;
pub mod executor;
pub mod layout;
pub mod retry;
pub mod subnet;
pub mod topology;

pub use config::ConfigError;
pub use config::MfConfig;
pub use config::StageFailurePolicy;
pub use config::load_config;
pub use error::ErrorKind;
pub use error::RemoteError;
pub use error::TopologyError;
pub use executor::CommandOutput;
pub use executor::RemoteExecutor;
pub use layout::Layout;
pub use layout::remote_temp_path;
pub use retry::RetryPolicy;
pub use subnet::Subnet;
pub use topology::Interface;
pub use topology::InterfaceRef;
pub use topology::Network;
pub use topology::NetworkKind;
pub use topology::Node;
pub use topology::NodeRole;
pub use topology::Topology;
