//! Local and remote path layout.
//!
//! Every file the controller reads or writes is named here, so components
//! never assemble paths from string fragments of their own.

use std::path::Path;
use std::path::PathBuf;

use rand::Rng;
use rand::distr::Alphabetic;

use crate::config::MfConfig;
use crate::constants::BOOTSTRAP_STATUS_FILE;
use crate::constants::COMMON_SERVICE_DIR;
use crate::constants::HOSTS_INVENTORY_FILE;
use crate::constants::PRIVATE_KEY_FILE;
use crate::constants::PUBLIC_KEY_FILE;
use crate::constants::REMOTE_STAGING_DIR;
use crate::constants::REPO_DIR_NAME;
use crate::constants::STAGING_SUFFIX_LEN;
use crate::error::TopologyError;

/// Paths for one topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    local_dir: PathBuf,
    service_user: String,
}

impl Layout {
    /// Build the layout for `topology_name` under the configured storage root.
    ///
    /// The topology name becomes a directory name, so it must be a single
    /// normal path component.
    pub fn new(config: &MfConfig, topology_name: &str) -> Result<Self, TopologyError> {
        if !is_single_component(topology_name) {
            return Err(TopologyError::InvalidTopologyName {
                name: topology_name.to_string(),
            });
        }

        Ok(Self {
            local_dir: config.local_storage_dir.join(topology_name),
            service_user: config.service_user.clone(),
        })
    }

    /// Service account name.
    pub fn service_user(&self) -> &str {
        &self.service_user
    }

    // ========================================================================
    // Local paths
    // ========================================================================

    /// `<root>/<topology>`.
    pub fn local_dir(&self) -> &Path {
        &self.local_dir
    }

    pub fn local_status_path(&self) -> PathBuf {
        self.local_dir.join(BOOTSTRAP_STATUS_FILE)
    }

    pub fn local_hosts_path(&self) -> PathBuf {
        self.local_dir.join(HOSTS_INVENTORY_FILE)
    }

    pub fn local_private_key_path(&self) -> PathBuf {
        self.local_dir.join(PRIVATE_KEY_FILE)
    }

    pub fn local_public_key_path(&self) -> PathBuf {
        self.local_dir.join(PUBLIC_KEY_FILE)
    }

    /// Default destination for a file downloaded from a service directory.
    pub fn local_service_file_path(&self, service: &str, relative: &str) -> PathBuf {
        self.local_dir.join(service).join(relative)
    }

    /// Destination for a downloaded service log.
    pub fn local_log_path(&self, service: &str, method: &str) -> PathBuf {
        self.local_dir.join(service).join("log").join(format!("{method}.log"))
    }

    // ========================================================================
    // Remote paths (control node)
    // ========================================================================

    /// Checkpoint document, relative to the login user's home directory.
    pub fn remote_status_path(&self) -> &'static str {
        BOOTSTRAP_STATUS_FILE
    }

    /// `/home/<user>`.
    pub fn service_home(&self) -> String {
        format!("/home/{}", self.service_user)
    }

    /// `/home/<user>/.ssh`.
    pub fn service_ssh_dir(&self) -> String {
        format!("{}/.ssh", self.service_home())
    }

    /// Root of all service directories.
    pub fn services_dir(&self) -> String {
        format!("{}/services", self.service_home())
    }

    pub fn service_dir(&self, service: &str) -> String {
        format!("{}/{}", self.services_dir(), service)
    }

    /// `data/data.json` slot of a service.
    pub fn service_data_path(&self, service: &str) -> String {
        format!("{}/data/data.json", self.service_dir(service))
    }

    /// `files/` area of a service.
    pub fn service_files_dir(&self, service: &str) -> String {
        format!("{}/files", self.service_dir(service))
    }

    /// Script implementing `command` for a service.
    pub fn service_script_path(&self, service: &str, command: &str) -> String {
        format!("{}/{}.py", self.service_dir(service), command)
    }

    pub fn remote_log_path(&self, service: &str, method: &str) -> String {
        format!("{}/log/{}.log", self.service_dir(service), method)
    }

    pub fn common_dir(&self) -> String {
        self.service_dir(COMMON_SERVICE_DIR)
    }

    /// Shared inventory read by every service's automation.
    pub fn common_hosts_path(&self) -> String {
        format!("{}/{}", self.common_dir(), HOSTS_INVENTORY_FILE)
    }

    /// Framework repository checkout.
    pub fn repo_dir(&self) -> String {
        format!("{}/{}", self.service_home(), REPO_DIR_NAME)
    }
}

/// Randomized staging path under `/tmp`, e.g. `/tmp/mf_file_AbCdEfGhIj`.
pub fn remote_temp_path(prefix: &str) -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphabetic)
        .take(STAGING_SUFFIX_LEN)
        .map(char::from)
        .collect();
    format!("{REMOTE_STAGING_DIR}/{prefix}{suffix}")
}

fn is_single_component(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains('/') && !name.contains('\0')
}
