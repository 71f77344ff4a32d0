use std::fmt;

use mfctl_checkpoint::DONE_VALUE;

/// Result recorded when at least one node needed the NAT64 workaround.
pub const NAT64_SET: &str = "set";
/// Result recorded when no node needed the NAT64 workaround.
pub const NAT64_NOT_NEEDED: &str = "not needed";
/// Underscore spelling written by older controllers.
const NAT64_NOT_NEEDED_LEGACY: &str = "not_needed";

/// Bootstrap stages in execution order.
///
/// The final `status = ready` write is not a stage: it happens
/// unconditionally once every stage is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Generate the service account keypair and park it on the control node.
    ServiceKeys,
    /// Create the service account and its SSH access on every node.
    ServiceAccounts,
    /// Point IPv6-only nodes at NAT64 resolvers.
    Nat64Dns,
    /// Clone the framework repository onto the control node.
    RepoClone,
    /// Address measurement interfaces, install routes, publish the inventory.
    MeasurementNetwork,
    /// Add the control node's measurement address to every `/etc/hosts`.
    HostsFile,
    BootstrapScript,
    BootstrapPlaybook,
}

impl Stage {
    pub const ALL: [Stage; 8] = [
        Stage::ServiceKeys,
        Stage::ServiceAccounts,
        Stage::Nat64Dns,
        Stage::RepoClone,
        Stage::MeasurementNetwork,
        Stage::HostsFile,
        Stage::BootstrapScript,
        Stage::BootstrapPlaybook,
    ];

    /// Checkpoint key.
    pub fn key(&self) -> &'static str {
        match self {
            Stage::ServiceKeys => "mfuser_keys",
            Stage::ServiceAccounts => "mfuser_accounts",
            Stage::Nat64Dns => "ipv6_4_nat",
            Stage::RepoClone => "repo_cloned",
            Stage::MeasurementNetwork => "meas_network",
            Stage::HostsFile => "hosts_set",
            Stage::BootstrapScript => "bootstrap_script",
            Stage::BootstrapPlaybook => "bootstrap_ansible",
        }
    }

    /// Checkpoint values meaning the stage is done.
    pub fn accepted_values(&self) -> &'static [&'static str] {
        match self {
            Stage::Nat64Dns => &[NAT64_SET, NAT64_NOT_NEEDED, NAT64_NOT_NEEDED_LEGACY],
            _ => &[DONE_VALUE],
        }
    }

    /// Value written when a failed stage is recorded as done anyway.
    pub fn recorded_value(&self) -> &'static str {
        match self {
            Stage::Nat64Dns => NAT64_SET,
            _ => DONE_VALUE,
        }
    }

    /// Failures that end the run whatever the failure policy says.
    pub fn is_always_fatal(&self) -> bool {
        matches!(self, Stage::RepoClone)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_keys_are_unique_and_not_the_ready_marker() {
        let keys: HashSet<&str> = Stage::ALL.iter().map(Stage::key).collect();
        assert_eq!(keys.len(), Stage::ALL.len());
        assert!(!keys.contains(mfctl_checkpoint::STATUS_KEY));
    }

    #[test]
    fn test_recorded_value_is_accepted() {
        for stage in Stage::ALL {
            assert!(stage.accepted_values().contains(&stage.recorded_value()), "{stage}");
        }
    }

    #[test]
    fn test_nat64_accepts_both_spellings() {
        let accepted = Stage::Nat64Dns.accepted_values();
        assert!(accepted.contains(&"not needed"));
        assert!(accepted.contains(&"not_needed"));
        assert!(accepted.contains(&"set"));
        assert!(!Stage::RepoClone.accepted_values().contains(&"set"));
    }
}
