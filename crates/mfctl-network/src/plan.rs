use std::collections::VecDeque;
use std::net::IpAddr;

use mfctl_core::Network;
use mfctl_core::Node;
use mfctl_core::Subnet;
use mfctl_core::Topology;
use mfctl_core::TopologyError;
use snafu::ResultExt;
use tracing::debug;

use crate::error::NoControlNetworkSnafu;
use crate::error::PoolExhaustedSnafu;
use crate::error::Result;
use crate::error::TopologySnafu;
use crate::inventory::HostEntry;
use crate::inventory::HostsInventory;

/// Address handed to one interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressAssignment {
    pub node: String,
    pub interface: String,
    pub device: String,
    pub network: String,
    pub address: IpAddr,
    pub subnet: Subnet,
}

/// Static route to install on a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub node: String,
    pub destination: Subnet,
    pub gateway: IpAddr,
}

/// Everything the measurement network stage applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkPlan {
    pub assignments: Vec<AddressAssignment>,
    pub routes: Vec<Route>,
    pub inventory: HostsInventory,
}

impl NetworkPlan {
    /// Control node's measurement address.
    pub fn control_address(&self) -> IpAddr {
        self.inventory.control().address
    }

    /// Nodes touched by the plan, in first-assignment order.
    pub fn nodes(&self) -> Vec<&str> {
        let mut nodes: Vec<&str> = Vec::new();
        for assignment in &self.assignments {
            if !nodes.contains(&assignment.node.as_str()) {
                nodes.push(&assignment.node);
            }
        }
        nodes
    }

    /// Shell script configuring `node`: addresses, link state, routes.
    ///
    /// Returns `None` when the plan does not touch the node.
    pub fn node_script(&self, node: &str) -> Option<String> {
        let mut lines = Vec::new();
        for a in self.assignments.iter().filter(|a| a.node == node) {
            lines.push(format!(
                "sudo ip addr add {}/{} dev {}",
                a.address,
                a.subnet.prefix_len(),
                a.device
            ));
            lines.push(format!("sudo ip link set dev {} up", a.device));
        }
        for r in self.routes.iter().filter(|r| r.node == node) {
            lines.push(format!("sudo ip route add {} via {}", r.destination, r.gateway));
        }
        if lines.is_empty() { None } else { Some(lines.join("; ")) }
    }
}

/// Plan the measurement network for `topology`.
///
/// Networks and their interfaces are walked in discovery order; each
/// interface takes the next free address of its network's pool. The control
/// node gets a route to every other measurement subnet through the gateway
/// of the network it sits on. Every experiment node outside the control
/// node's own network gets one route to the control node's subnet through
/// its local gateway.
pub fn plan_measurement_network(topology: &Topology, ssh_user: &str) -> Result<NetworkPlan> {
    let control = topology.control_node().context(TopologySnafu)?;
    let networks: Vec<&Network> = topology.measurement_networks().collect();

    let control_network = networks
        .iter()
        .copied()
        .find(|net| net.interfaces.iter().any(|i| i.node == control.name))
        .ok_or_else(|| {
            NoControlNetworkSnafu {
                node: control.name.clone(),
            }
            .build()
        })?;

    let mut assignments = Vec::new();
    let mut routes = Vec::new();

    for network in &networks {
        let mut pool: VecDeque<IpAddr> = network.available_addresses.iter().copied().collect();

        for iref in &network.interfaces {
            let node = lookup_node(topology, &iref.node)?;
            let device = node
                .interface(&iref.interface)
                .map(|i| i.device.clone())
                .ok_or_else(|| TopologyError::UnknownInterface {
                    node: iref.node.clone(),
                    interface: iref.interface.clone(),
                })
                .context(TopologySnafu)?;

            let address = pool.pop_front().ok_or_else(|| {
                PoolExhaustedSnafu {
                    network: network.name.clone(),
                    node: iref.node.clone(),
                    interface: iref.interface.clone(),
                }
                .build()
            })?;

            debug!(node = %node.name, interface = %iref.interface, %address, network = %network.name, "assigned measurement address");
            assignments.push(AddressAssignment {
                node: node.name.clone(),
                interface: iref.interface.clone(),
                device,
                network: network.name.clone(),
                address,
                subnet: network.subnet,
            });

            if node.is_control() {
                for other in networks.iter().filter(|other| other.name != network.name) {
                    routes.push(Route {
                        node: node.name.clone(),
                        destination: other.subnet,
                        gateway: network.gateway,
                    });
                }
            } else if network.name != control_network.name {
                // experiment nodes on the control network get no route
                routes.push(Route {
                    node: node.name.clone(),
                    destination: control_network.subnet,
                    gateway: network.gateway,
                });
            }
        }
    }

    let control_entry = first_entry(&assignments, &control.name).ok_or_else(|| {
        NoControlNetworkSnafu {
            node: control.name.clone(),
        }
        .build()
    })?;

    let workers: Vec<HostEntry> = assignments
        .iter()
        .filter(|a| a.node != control.name)
        .map(|a| HostEntry {
            name: a.node.clone(),
            address: a.address,
        })
        .collect();

    Ok(NetworkPlan {
        inventory: HostsInventory::new(control_entry, workers, ssh_user),
        assignments,
        routes,
    })
}

/// Measurement address recorded on the control node's interfaces, if any.
pub fn control_measurement_address(topology: &Topology) -> Option<IpAddr> {
    let control = topology.control_node().ok()?;
    let measurement: Vec<&str> = topology.measurement_networks().map(|n| n.name.as_str()).collect();
    control
        .interfaces
        .iter()
        .filter(|iface| iface.network.as_deref().is_some_and(|n| measurement.contains(&n)))
        .find_map(|iface| iface.address)
}

fn lookup_node<'a>(topology: &'a Topology, name: &str) -> Result<&'a Node> {
    topology
        .node(name)
        .ok_or_else(|| TopologyError::UnknownNode { name: name.to_string() })
        .context(TopologySnafu)
}

fn first_entry(assignments: &[AddressAssignment], node: &str) -> Option<HostEntry> {
    assignments.iter().find(|a| a.node == node).map(|a| HostEntry {
        name: a.node.clone(),
        address: a.address,
    })
}
