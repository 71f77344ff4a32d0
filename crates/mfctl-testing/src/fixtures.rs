//! Topology fixtures.

use std::net::IpAddr;

use mfctl_core::Interface;
use mfctl_core::InterfaceRef;
use mfctl_core::Network;
use mfctl_core::NetworkKind;
use mfctl_core::Node;
use mfctl_core::NodeRole;
use mfctl_core::Topology;

/// Name of the control node in every fixture.
pub const CONTROL_NODE: &str = "meas-node";

/// Build a node with a single measurement interface attached to `network`.
pub fn node(name: &str, role: NodeRole, management_ip: &str, network: &str) -> Node {
    Node {
        name: name.to_string(),
        role,
        management_ip: parse_ip(management_ip),
        username: "ubuntu".to_string(),
        interfaces: vec![Interface {
            name: format!("{name}-meas_nic"),
            device: "ens7".to_string(),
            network: Some(network.to_string()),
            address: None,
        }],
    }
}

/// Build a measurement network with `pool` free host addresses starting at `.2`.
pub fn measurement_network(site: &str, third_octet: u8, pool: u8, members: &[&str]) -> Network {
    Network {
        name: format!("l3_meas_net_{site}"),
        site: site.to_string(),
        kind: NetworkKind::Measurement,
        subnet: format!("10.132.{third_octet}.0/24").parse().expect("fixture subnet is valid"),
        gateway: parse_ip(&format!("10.132.{third_octet}.1")),
        available_addresses: (2..2 + pool).map(|host| parse_ip(&format!("10.132.{third_octet}.{host}"))).collect(),
        interfaces: members
            .iter()
            .map(|node| InterfaceRef {
                node: node.to_string(),
                interface: format!("{node}-meas_nic"),
            })
            .collect(),
    }
}

/// One control node and two experiment nodes on a single measurement network.
pub fn three_node_topology() -> Topology {
    Topology {
        name: "slice-one".to_string(),
        nodes: vec![
            node(CONTROL_NODE, NodeRole::Control, "192.0.2.10", "l3_meas_net_UTAH"),
            node("node1", NodeRole::Experiment, "192.0.2.11", "l3_meas_net_UTAH"),
            node("node2", NodeRole::Experiment, "192.0.2.12", "l3_meas_net_UTAH"),
        ],
        networks: vec![measurement_network("UTAH", 1, 8, &[CONTROL_NODE, "node1", "node2"])],
    }
}

/// Control node and `node1` at one site, `node2` at another site with its
/// own measurement network.
pub fn two_site_topology() -> Topology {
    Topology {
        name: "slice-two".to_string(),
        nodes: vec![
            node(CONTROL_NODE, NodeRole::Control, "192.0.2.10", "l3_meas_net_UTAH"),
            node("node1", NodeRole::Experiment, "192.0.2.11", "l3_meas_net_UTAH"),
            node("node2", NodeRole::Experiment, "198.51.100.12", "l3_meas_net_STAR"),
        ],
        networks: vec![
            measurement_network("UTAH", 1, 8, &[CONTROL_NODE, "node1"]),
            measurement_network("STAR", 2, 8, &["node2"]),
        ],
    }
}

/// [`three_node_topology`] with `node2` reachable over IPv6 only.
pub fn ipv6_topology() -> Topology {
    let mut topology = three_node_topology();
    topology.name = "slice-v6".to_string();
    if let Some(node) = topology.nodes.iter_mut().find(|n| n.name == "node2") {
        node.management_ip = parse_ip("2001:db8::12");
    }
    topology
}

fn parse_ip(s: &str) -> IpAddr {
    s.parse().expect("fixture address is valid")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixtures_validate() {
        for topology in [three_node_topology(), two_site_topology(), ipv6_topology()] {
            topology.validate().unwrap();
            assert_eq!(topology.control_node().unwrap().name, CONTROL_NODE);
        }
    }
}
