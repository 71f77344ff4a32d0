//! Network/Hosts Materializer.
//!
//! Turns a topology snapshot into a [`NetworkPlan`]: one measurement address
//! per participating interface (taken from each network's free pool in
//! order), the routes each node needs, and the [`HostsInventory`] consumed
//! by the framework's automation. Planning is pure; applying the per-node
//! scripts and publishing the inventory go through the remote executor.

mod error;
mod inventory;
mod plan;
mod publish;

pub use error::NetworkError;
pub use error::Result;
pub use inventory::HostEntry;
pub use inventory::HostsInventory;
pub use plan::AddressAssignment;
pub use plan::NetworkPlan;
pub use plan::Route;
pub use plan::control_measurement_address;
pub use plan::plan_measurement_network;
pub use publish::publish_inventory;
pub use publish::write_local_inventory;
