//! Topology snapshot: the nodes and networks the controller acts on.
//!
//! The topology is owned by the provisioning layer. The controller only
//! reads a snapshot of it; nodes are cloned into fan-out tasks and never
//! mutated.

use std::net::IpAddr;

use serde::Deserialize;
use serde::Serialize;

use crate::error::TopologyError;
use crate::subnet::Subnet;

/// Role a node plays in the measurement framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    /// The measurement node hosting services and the checkpoint document.
    Control,
    /// Any other node of the experiment.
    #[default]
    Experiment,
}

/// A network interface on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    /// Interface name as known to the provisioning layer.
    pub name: String,
    /// OS device name (`ens7`, `eth1`, ...).
    pub device: String,
    /// Name of the network this interface is attached to.
    #[serde(default)]
    pub network: Option<String>,
    /// Address currently configured on the interface, if any.
    #[serde(default)]
    pub address: Option<IpAddr>,
}

/// A remote machine of the topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Unique node name.
    pub name: String,
    /// Control or experiment node.
    #[serde(default)]
    pub role: NodeRole,
    /// Management address used to reach the node.
    pub management_ip: IpAddr,
    /// Login user for the management connection.
    pub username: String,
    /// Interfaces in discovery order.
    #[serde(default)]
    pub interfaces: Vec<Interface>,
}

impl Node {
    /// Whether this is the control (measurement) node.
    pub fn is_control(&self) -> bool {
        self.role == NodeRole::Control
    }

    /// Whether the node is reachable over IPv6 only.
    pub fn is_ipv6_only(&self) -> bool {
        self.management_ip.is_ipv6()
    }

    /// Look up an interface by name.
    pub fn interface(&self, name: &str) -> Option<&Interface> {
        self.interfaces.iter().find(|iface| iface.name == name)
    }
}

/// Network classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NetworkKind {
    /// Overlay subnet connecting monitoring interfaces.
    Measurement,
    /// Experiment or management network, ignored by the controller.
    #[default]
    Other,
}

impl NetworkKind {
    /// Classify a network by its name prefix.
    pub fn from_name(name: &str, measurement_prefix: &str) -> Self {
        if name.starts_with(measurement_prefix) {
            NetworkKind::Measurement
        } else {
            NetworkKind::Other
        }
    }
}

/// Reference to one interface of one node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InterfaceRef {
    pub node: String,
    pub interface: String,
}

/// A network of the topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub name: String,
    #[serde(default)]
    pub site: String,
    #[serde(default)]
    pub kind: NetworkKind,
    pub subnet: Subnet,
    pub gateway: IpAddr,
    /// Free addresses, in the order they should be handed out.
    #[serde(default)]
    pub available_addresses: Vec<IpAddr>,
    /// Attached interfaces in discovery order.
    #[serde(default)]
    pub interfaces: Vec<InterfaceRef>,
}

impl Network {
    /// Whether this network belongs to the measurement overlay.
    pub fn is_measurement(&self) -> bool {
        self.kind == NetworkKind::Measurement
    }
}

/// Snapshot of the experiment topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    /// Topology (slice) name; namespaces all local state.
    pub name: String,
    /// Nodes in discovery order.
    pub nodes: Vec<Node>,
    /// Networks in discovery order.
    #[serde(default)]
    pub networks: Vec<Network>,
}

impl Topology {
    /// Check structural invariants: a usable name, exactly one control
    /// node, and network attachments that resolve to real interfaces.
    pub fn validate(&self) -> Result<(), TopologyError> {
        if self.name.is_empty() || self.name.contains('/') || self.name == "." || self.name == ".." {
            return Err(TopologyError::InvalidTopologyName {
                name: self.name.clone(),
            });
        }

        self.control_node()?;

        for network in &self.networks {
            for iref in &network.interfaces {
                let node = self.node(&iref.node).ok_or_else(|| TopologyError::UnknownNode {
                    name: iref.node.clone(),
                })?;
                if node.interface(&iref.interface).is_none() {
                    return Err(TopologyError::UnknownInterface {
                        node: iref.node.clone(),
                        interface: iref.interface.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// The single control node.
    pub fn control_node(&self) -> Result<&Node, TopologyError> {
        let mut controls = self.nodes.iter().filter(|n| n.is_control());
        let first = controls.next().ok_or_else(|| TopologyError::NoControlNode {
            topology: self.name.clone(),
        })?;
        let extra = controls.count();
        if extra > 0 {
            return Err(TopologyError::MultipleControlNodes {
                topology: self.name.clone(),
                count: extra + 1,
            });
        }
        Ok(first)
    }

    /// Look up a node by name.
    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Experiment nodes in discovery order.
    pub fn experiment_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| !n.is_control())
    }

    /// Measurement networks in discovery order.
    pub fn measurement_networks(&self) -> impl Iterator<Item = &Network> {
        self.networks.iter().filter(|n| n.is_measurement())
    }

    /// Mark every unclassified network whose name starts with
    /// `measurement_prefix` as a measurement network. Explicit
    /// [`NetworkKind::Measurement`] entries are left alone.
    pub fn classify_networks(&mut self, measurement_prefix: &str) {
        for network in self.networks.iter_mut().filter(|n| n.kind == NetworkKind::Other) {
            network.kind = NetworkKind::from_name(&network.name, measurement_prefix);
        }
    }
}
