//! Testing infrastructure for mfctl.
//!
//! - [`SimulatedExecutor`]: in-memory [`RemoteExecutor`](mfctl_core::RemoteExecutor)
//!   with a per-node filesystem, scripted command replies, and fault injection
//! - [`fixtures`]: ready-made topologies (one control node, experiment nodes,
//!   measurement networks)
//!
//! # Usage
//!
//! ```ignore
//! let topology = fixtures::three_node_topology();
//! let executor = Arc::new(SimulatedExecutor::new());
//! executor.respond("git clone", CommandOutput::default()).await;
//!
//! let store = CheckpointStore::new(layout, control, executor.clone(), RetryPolicy::none());
//! store.set("mfuser_keys", "ok").await?;
//! assert!(executor.has_file(&control, "bootstrap_status.json").await);
//! ```

pub mod fixtures;
pub mod simulated;

pub use simulated::Operation;
pub use simulated::SimulatedExecutor;
