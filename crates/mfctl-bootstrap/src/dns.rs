//! NAT64 DNS workaround for IPv6-only nodes.
//!
//! IPv6-only nodes cannot reach IPv4-only upstreams (package mirrors, the
//! framework repository). The workaround swaps `/etc/resolv.conf` for public
//! NAT64 resolvers, keeping the original as `/etc/resolv.old`, and overrides
//! systemd-resolved on hosts that expose the configured interface.

use std::fmt;
use std::sync::Arc;

use mfctl_core::Node;
use mfctl_core::RemoteExecutor;
use mfctl_core::constants::RESOLVED_INTERFACE;
use tracing::info;
use tracing::warn;

use crate::error::NodeFailuresSnafu;
use crate::error::Result;
use crate::fanout::failed_nodes;
use crate::fanout::scatter_gather;
use crate::stage::NAT64_NOT_NEEDED;
use crate::stage::NAT64_SET;

/// Result of applying or reverting the workaround across a topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsOutcome {
    Set,
    Restored,
    /// No node is IPv6-only.
    NotNeeded,
}

impl DnsOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DnsOutcome::Set => NAT64_SET,
            DnsOutcome::Restored => "restored",
            DnsOutcome::NotNeeded => NAT64_NOT_NEEDED,
        }
    }
}

impl fmt::Display for DnsOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shell chain installing `nameservers` on one node.
///
/// The node's own hostname is mapped to loopback first so `sudo` keeps
/// resolving it once the resolvers change. The original resolver file is
/// only saved the first time, so re-applying keeps the real backup.
pub fn set_dns_command(nameservers: &[String]) -> String {
    let resolv: String = nameservers.iter().map(|ns| format!("nameserver {ns}\\n")).collect();
    let iface = RESOLVED_INTERFACE;
    [
        "grep -qx \"127.0.0.1 $(cat /etc/hostname)\" /etc/hosts || echo \"127.0.0.1 $(cat /etc/hostname)\" | sudo tee -a /etc/hosts > /dev/null".to_string(),
        format!("printf '{resolv}' > resolv.new"),
        "[ -e /etc/resolv.old ] || sudo mv /etc/resolv.conf /etc/resolv.old".to_string(),
        "sudo mv resolv.new /etc/resolv.conf".to_string(),
        format!(
            "if [ -e /sys/class/net/{iface} ]; then sudo resolvectl dns {iface} {}; fi",
            nameservers.join(" ")
        ),
    ]
    .join("; ")
}

/// Shell chain reverting [`set_dns_command`].
pub fn restore_dns_command() -> String {
    let iface = RESOLVED_INTERFACE;
    format!(
        "if [ -e /etc/resolv.old ]; then sudo mv /etc/resolv.old /etc/resolv.conf; fi; \
         if [ -e /sys/class/net/{iface} ]; then sudo resolvectl revert {iface}; fi"
    )
}

/// Apply the workaround to every IPv6-only node.
pub(crate) async fn set_dns_all_nodes(
    executor: &Arc<dyn RemoteExecutor>,
    nodes: &[Node],
    nameservers: &[String],
) -> Result<DnsOutcome> {
    apply(executor, nodes, set_dns_command(nameservers), "set NAT64 resolvers", DnsOutcome::Set).await
}

/// Revert the workaround on every IPv6-only node.
pub(crate) async fn restore_dns_all_nodes(executor: &Arc<dyn RemoteExecutor>, nodes: &[Node]) -> Result<DnsOutcome> {
    apply(executor, nodes, restore_dns_command(), "restore resolvers", DnsOutcome::Restored).await
}

async fn apply(
    executor: &Arc<dyn RemoteExecutor>,
    nodes: &[Node],
    command: String,
    operation: &str,
    done: DnsOutcome,
) -> Result<DnsOutcome> {
    let targets: Vec<Node> = nodes.iter().filter(|n| n.is_ipv6_only()).cloned().collect();
    if targets.is_empty() {
        info!(operation, "no IPv6-only nodes");
        return Ok(DnsOutcome::NotNeeded);
    }

    let results = scatter_gather(executor, &targets, |executor, node| {
        let command = command.clone();
        async move {
            let output = executor.execute(&node, &command).await?;
            if output.has_stderr() {
                warn!(node = %node.name, stderr = %output.stderr.trim(), "resolver change reported errors");
            }
            Ok(())
        }
    })
    .await;

    let failed = failed_nodes(&results, operation);
    if !failed.is_empty() {
        return NodeFailuresSnafu { operation, nodes: failed }.fail();
    }
    info!(operation, nodes = targets.len(), "resolvers updated");
    Ok(done)
}

#[cfg(test)]
mod tests {
    use mfctl_testing::SimulatedExecutor;
    use mfctl_testing::fixtures;

    use super::*;

    fn nameservers() -> Vec<String> {
        vec!["2a00:1098:2c::1".to_string(), "2a01:4f8:c2c:123f::1".to_string()]
    }

    #[test]
    fn test_set_command_shape() {
        let command = set_dns_command(&nameservers());
        assert!(command.contains("printf 'nameserver 2a00:1098:2c::1\\nnameserver 2a01:4f8:c2c:123f::1\\n' > resolv.new"));
        assert!(command.contains("[ -e /etc/resolv.old ] || sudo mv /etc/resolv.conf /etc/resolv.old"));
        assert!(command.contains("if [ -e /sys/class/net/eth0 ]; then sudo resolvectl dns eth0 2a00:1098:2c::1 2a01:4f8:c2c:123f::1; fi"));
        assert!(!command.contains('\n'));
    }

    #[tokio::test]
    async fn test_ipv4_topology_needs_nothing() {
        let simulated = Arc::new(SimulatedExecutor::new());
        let executor: Arc<dyn RemoteExecutor> = simulated.clone();
        let nodes = fixtures::three_node_topology().nodes;

        assert_eq!(set_dns_all_nodes(&executor, &nodes, &nameservers()).await.unwrap(), DnsOutcome::NotNeeded);
        assert_eq!(restore_dns_all_nodes(&executor, &nodes).await.unwrap(), DnsOutcome::NotNeeded);
        assert!(simulated.operations().await.is_empty());
    }

    #[tokio::test]
    async fn test_only_ipv6_nodes_are_touched() {
        let simulated = Arc::new(SimulatedExecutor::new());
        let executor: Arc<dyn RemoteExecutor> = simulated.clone();
        let nodes = fixtures::ipv6_topology().nodes;

        assert_eq!(set_dns_all_nodes(&executor, &nodes, &nameservers()).await.unwrap(), DnsOutcome::Set);
        assert_eq!(simulated.commands_on("node2").await.len(), 1);
        assert!(simulated.commands_on("node1").await.is_empty());
        assert!(simulated.commands_on("meas-node").await.is_empty());

        assert_eq!(restore_dns_all_nodes(&executor, &nodes).await.unwrap(), DnsOutcome::Restored);
        assert_eq!(simulated.commands_on("node2").await.last().unwrap(), &restore_dns_command());
    }

    #[tokio::test]
    async fn test_unreachable_node_is_reported() {
        let simulated = Arc::new(SimulatedExecutor::new());
        simulated.disconnect("node2").await;
        let executor: Arc<dyn RemoteExecutor> = simulated;
        let nodes = fixtures::ipv6_topology().nodes;

        let err = set_dns_all_nodes(&executor, &nodes, &nameservers()).await.unwrap_err();
        assert!(matches!(err, crate::BootstrapError::NodeFailures { ref nodes, .. } if nodes == &["node2"]));
    }
}
