use std::fmt;
use std::net::IpAddr;

/// Group holding the control node.
pub const CONTROL_GROUP: &str = "Meas_Node";
/// Group holding every experiment node.
pub const WORKER_GROUP: &str = "Experiment_Nodes";

/// Fixed trailer declaring the group aliases used by the playbooks.
const GROUP_TRAILER: &str = "\n\n[elk:children]\nMeas_Node\n\n[workers:children]\nExperiment_Nodes\n";

/// One host of the inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEntry {
    pub name: String,
    /// Measurement-network address.
    pub address: IpAddr,
}

/// Ansible-style inventory with exactly one control entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostsInventory {
    control: HostEntry,
    workers: Vec<HostEntry>,
    ssh_user: String,
}

impl HostsInventory {
    /// Build an inventory. Worker entries keep their order; a name seen
    /// twice (or equal to the control entry) is dropped after its first use.
    pub fn new(control: HostEntry, workers: impl IntoIterator<Item = HostEntry>, ssh_user: impl Into<String>) -> Self {
        let mut deduped: Vec<HostEntry> = Vec::new();
        for entry in workers {
            if entry.name != control.name && !deduped.iter().any(|e| e.name == entry.name) {
                deduped.push(entry);
            }
        }
        Self {
            control,
            workers: deduped,
            ssh_user: ssh_user.into(),
        }
    }

    pub fn control(&self) -> &HostEntry {
        &self.control
    }

    pub fn workers(&self) -> &[HostEntry] {
        &self.workers
    }

    fn host_line(&self, entry: &HostEntry) -> String {
        format!(
            "{name} ansible_host={ip} hostname={ip} ansible_ssh_user={user} node_exporter_listen_ip={ip} \
             ansible_ssh_common_args='-o StrictHostKeyChecking=no'",
            name = entry.name,
            ip = entry.address,
            user = self.ssh_user,
        )
    }

    /// Render the `hosts.ini` text.
    pub fn render(&self) -> String {
        let mut out = format!("[{CONTROL_GROUP}]\n{}\n\n[{WORKER_GROUP}]\n", self.host_line(&self.control));
        for worker in &self.workers {
            out.push_str(&self.host_line(worker));
            out.push('\n');
        }
        out.push_str(GROUP_TRAILER);
        out
    }
}

impl fmt::Display for HostsInventory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
