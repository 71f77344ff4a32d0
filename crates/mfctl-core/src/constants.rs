//! Constants for the measurement framework controller.
//!
//! Tiger Style: All constants are explicitly typed with fixed limits
//! to prevent unbounded resource allocation.

// ============================================================================
// Local State
// ============================================================================

/// Default root directory for per-topology local state.
pub const DEFAULT_LOCAL_STORAGE_DIR: &str = "/tmp/mflib";

/// File name of the bootstrap status document, both locally and remotely.
pub const BOOTSTRAP_STATUS_FILE: &str = "bootstrap_status.json";

/// File name of the rendered hosts inventory.
pub const HOSTS_INVENTORY_FILE: &str = "hosts.ini";

/// Base name of the service account private key.
pub const PRIVATE_KEY_FILE: &str = "mfuser_private_key";

/// Base name of the service account public key.
pub const PUBLIC_KEY_FILE: &str = "mfuser_public_key";

/// Unix mode for the private key (owner read/write only).
pub const PRIVATE_KEY_MODE: u32 = 0o600;

/// Unix mode for the public key (world readable).
pub const PUBLIC_KEY_MODE: u32 = 0o644;

// ============================================================================
// Remote Layout
// ============================================================================

/// Default dedicated service account created on every node.
pub const DEFAULT_SERVICE_USER: &str = "mfuser";

/// Default name of the measurement (control) node.
pub const DEFAULT_MEASUREMENT_NODE_NAME: &str = "meas-node";

/// Name prefix identifying measurement networks in a topology.
pub const DEFAULT_MEASUREMENT_NETWORK_PREFIX: &str = "l3_meas_net_";

/// Directory under the services root holding shared artifacts.
///
/// Never reported as a service by the listing.
pub const COMMON_SERVICE_DIR: &str = "common";

/// Directory on the control node used for staging uploads.
pub const REMOTE_STAGING_DIR: &str = "/tmp";

/// Length of the random suffix appended to staged remote file names.
pub const STAGING_SUFFIX_LEN: usize = 10;

// ============================================================================
// Software Repository
// ============================================================================

/// Default measurement framework repository.
pub const DEFAULT_REPO_URL: &str = "https://github.com/fabric-testbed/MeasurementFramework.git";

/// Default branch cloned onto the control node.
pub const DEFAULT_REPO_BRANCH: &str = "main";

/// Name of the clone directory in the service account's home.
pub const REPO_DIR_NAME: &str = "mf_git";

// ============================================================================
// Bootstrap
// ============================================================================

/// Sudoers drop-in granting the service account passwordless sudo.
pub const SUDOERS_FILE: &str = "/etc/sudoers.d/90-cloud-init-users";

/// Bootstrap shell script, relative to the repository checkout.
pub const BOOTSTRAP_SCRIPT: &str = "instrumentize/experiment_bootstrap/bootstrap.sh";

/// Bootstrap playbook driver, relative to the repository checkout.
pub const BOOTSTRAP_PLAYBOOK_SCRIPT: &str = "instrumentize/experiment_bootstrap/bootstrap_playbooks.py";

/// Ansible configuration shipped with the repository, relative to the checkout.
pub const BOOTSTRAP_ANSIBLE_CFG: &str = "instrumentize/experiment_bootstrap/ansible.cfg";

/// `git clone` diagnostic meaning an earlier clone already succeeded.
pub const CLONE_EXISTS_MARKER: &str = "already exists and is not an empty directory";

/// Interface whose systemd-resolved DNS is overridden when present.
pub const RESOLVED_INTERFACE: &str = "eth0";

// ============================================================================
// Transfers
// ============================================================================

/// Default number of attempts for a file transfer (1 = no retry).
pub const DEFAULT_TRANSFER_ATTEMPTS: u32 = 1;

/// Maximum number of attempts for a file transfer.
///
/// Tiger Style: Bounded so a flapping node cannot stall a stage forever.
pub const MAX_TRANSFER_ATTEMPTS: u32 = 5;

/// Default delay between transfer attempts in milliseconds.
pub const DEFAULT_TRANSFER_RETRY_DELAY_MS: u64 = 2_000;

/// Maximum delay between transfer attempts in milliseconds.
pub const MAX_TRANSFER_RETRY_DELAY_MS: u64 = 60_000;

// ============================================================================
// NAT64 Workaround
// ============================================================================

/// Public NAT64 resolvers installed on IPv6-only nodes.
pub const DEFAULT_NAT64_NAMESERVERS: [&str; 3] = ["2a00:1098:2c::1", "2a01:4f8:c2c:123f::1", "2a01:4f9:c010:3f02::1"];

// ============================================================================
// Tunnels
// ============================================================================

/// Default local port forwarded to Grafana on the control node.
pub const DEFAULT_GRAFANA_TUNNEL_PORT: u16 = 10010;

/// Default local port forwarded to Kibana on the control node.
pub const DEFAULT_KIBANA_TUNNEL_PORT: u16 = 10020;

/// Remote port Grafana listens on.
pub const GRAFANA_REMOTE_PORT: u16 = 443;

/// Remote port Kibana listens on.
pub const KIBANA_REMOTE_PORT: u16 = 80;

/// SSH client config shipped with the user's testbed tunnel tools.
pub const TUNNEL_SSH_CONFIG: &str = "ssh_config";

/// Slice key shipped with the user's testbed tunnel tools.
pub const TUNNEL_PRIVATE_KEY: &str = "slice_key";
