//! Controller configuration.
//!
//! Configuration is loaded in layers with the following precedence (lowest to highest):
//! 1. Environment variables (MFCTL_*)
//! 2. TOML configuration file
//! 3. Explicit overrides supplied by the caller
//!
//! The resulting value is validated once and then shared, read-only, by every
//! component through [`Layout`](crate::Layout).

use std::net::IpAddr;
use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use snafu::ResultExt;
use snafu::Snafu;

use crate::constants::DEFAULT_GRAFANA_TUNNEL_PORT;
use crate::constants::DEFAULT_KIBANA_TUNNEL_PORT;
use crate::constants::DEFAULT_LOCAL_STORAGE_DIR;
use crate::constants::DEFAULT_MEASUREMENT_NETWORK_PREFIX;
use crate::constants::DEFAULT_MEASUREMENT_NODE_NAME;
use crate::constants::DEFAULT_NAT64_NAMESERVERS;
use crate::constants::DEFAULT_REPO_BRANCH;
use crate::constants::DEFAULT_REPO_URL;
use crate::constants::DEFAULT_SERVICE_USER;
use crate::constants::DEFAULT_TRANSFER_ATTEMPTS;
use crate::constants::DEFAULT_TRANSFER_RETRY_DELAY_MS;
use crate::constants::MAX_TRANSFER_ATTEMPTS;
use crate::error::ErrorKind;
use crate::retry::RetryPolicy;

/// What the orchestrator does when a non-fatal stage fails.
///
/// Account installation on the control node and the repository clone are
/// always fatal regardless of this setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StageFailurePolicy {
    /// Leave the stage's checkpoint unwritten, keep running later stages,
    /// and withhold `status = ready` so the next run retries the stage.
    #[default]
    Defer,
    /// Write the stage's checkpoint anyway (legacy behaviour).
    Record,
    /// Abort the run at the first failing stage.
    Halt,
}

impl FromStr for StageFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "defer" => Ok(Self::Defer),
            "record" => Ok(Self::Record),
            "halt" => Ok(Self::Halt),
            _ => Err(format!("invalid stage failure policy: '{}' (expected: defer, record, halt)", s)),
        }
    }
}

/// Measurement framework controller configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MfConfig {
    /// Root directory for local per-topology state.
    #[serde(default = "default_local_storage_dir")]
    pub local_storage_dir: PathBuf,

    /// Measurement framework git repository.
    #[serde(default = "default_repo_url")]
    pub repo_url: String,

    /// Branch cloned onto the control node.
    #[serde(default = "default_repo_branch")]
    pub repo_branch: String,

    /// Dedicated service account created on every node.
    #[serde(default = "default_service_user")]
    pub service_user: String,

    /// Host alias written to `/etc/hosts` for the control node.
    #[serde(default = "default_measurement_node_name")]
    pub measurement_node_name: String,

    /// Name prefix identifying measurement networks.
    #[serde(default = "default_measurement_network_prefix")]
    pub measurement_network_prefix: String,

    /// Resolvers installed by the NAT64 workaround on IPv6-only nodes.
    #[serde(default = "default_nat64_nameservers")]
    pub nat64_nameservers: Vec<String>,

    /// Handling of non-fatal stage failures.
    #[serde(default)]
    pub stage_failure_policy: StageFailurePolicy,

    /// Attempts per file transfer (1 = no retry).
    #[serde(default = "default_transfer_attempts")]
    pub transfer_attempts: u32,

    /// Delay between transfer attempts in milliseconds.
    #[serde(default = "default_transfer_retry_delay_ms")]
    pub transfer_retry_delay_ms: u64,

    /// Local port for the Grafana SSH tunnel.
    #[serde(default = "default_grafana_tunnel_port")]
    pub grafana_tunnel_port: u16,

    /// Local port for the Kibana SSH tunnel.
    #[serde(default = "default_kibana_tunnel_port")]
    pub kibana_tunnel_port: u16,
}

impl Default for MfConfig {
    fn default() -> Self {
        Self {
            local_storage_dir: default_local_storage_dir(),
            repo_url: default_repo_url(),
            repo_branch: default_repo_branch(),
            service_user: default_service_user(),
            measurement_node_name: default_measurement_node_name(),
            measurement_network_prefix: default_measurement_network_prefix(),
            nat64_nameservers: default_nat64_nameservers(),
            stage_failure_policy: StageFailurePolicy::default(),
            transfer_attempts: default_transfer_attempts(),
            transfer_retry_delay_ms: default_transfer_retry_delay_ms(),
            grafana_tunnel_port: default_grafana_tunnel_port(),
            kibana_tunnel_port: default_kibana_tunnel_port(),
        }
    }
}

impl MfConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;
        toml::from_str(&content).context(ParseTomlSnafu { path })
    }

    /// Load configuration from environment variables.
    ///
    /// Variables follow the pattern MFCTL_<FIELD_NAME> (uppercase).
    pub fn from_env() -> Self {
        Self {
            local_storage_dir: parse_env("MFCTL_LOCAL_STORAGE_DIR").unwrap_or_else(default_local_storage_dir),
            repo_url: parse_env("MFCTL_REPO_URL").unwrap_or_else(default_repo_url),
            repo_branch: parse_env("MFCTL_REPO_BRANCH").unwrap_or_else(default_repo_branch),
            service_user: parse_env("MFCTL_SERVICE_USER").unwrap_or_else(default_service_user),
            measurement_node_name: parse_env("MFCTL_MEASUREMENT_NODE_NAME")
                .unwrap_or_else(default_measurement_node_name),
            measurement_network_prefix: parse_env("MFCTL_MEASUREMENT_NETWORK_PREFIX")
                .unwrap_or_else(default_measurement_network_prefix),
            nat64_nameservers: Some(parse_env_vec("MFCTL_NAT64_NAMESERVERS"))
                .filter(|v| !v.is_empty())
                .unwrap_or_else(default_nat64_nameservers),
            stage_failure_policy: parse_env("MFCTL_STAGE_FAILURE_POLICY").unwrap_or_default(),
            transfer_attempts: parse_env("MFCTL_TRANSFER_ATTEMPTS").unwrap_or_else(default_transfer_attempts),
            transfer_retry_delay_ms: parse_env("MFCTL_TRANSFER_RETRY_DELAY_MS")
                .unwrap_or_else(default_transfer_retry_delay_ms),
            grafana_tunnel_port: parse_env("MFCTL_GRAFANA_TUNNEL_PORT").unwrap_or_else(default_grafana_tunnel_port),
            kibana_tunnel_port: parse_env("MFCTL_KIBANA_TUNNEL_PORT").unwrap_or_else(default_kibana_tunnel_port),
        }
    }

    /// Merge configuration from another source.
    ///
    /// Fields in `other` that differ from their defaults override fields in `self`.
    pub fn merge(&mut self, other: Self) {
        if other.local_storage_dir != default_local_storage_dir() {
            self.local_storage_dir = other.local_storage_dir;
        }
        if other.repo_url != default_repo_url() {
            self.repo_url = other.repo_url;
        }
        if other.repo_branch != default_repo_branch() {
            self.repo_branch = other.repo_branch;
        }
        if other.service_user != default_service_user() {
            self.service_user = other.service_user;
        }
        if other.measurement_node_name != default_measurement_node_name() {
            self.measurement_node_name = other.measurement_node_name;
        }
        if other.measurement_network_prefix != default_measurement_network_prefix() {
            self.measurement_network_prefix = other.measurement_network_prefix;
        }
        if other.nat64_nameservers != default_nat64_nameservers() {
            self.nat64_nameservers = other.nat64_nameservers;
        }
        if other.stage_failure_policy != StageFailurePolicy::default() {
            self.stage_failure_policy = other.stage_failure_policy;
        }
        if other.transfer_attempts != default_transfer_attempts() {
            self.transfer_attempts = other.transfer_attempts;
        }
        if other.transfer_retry_delay_ms != default_transfer_retry_delay_ms() {
            self.transfer_retry_delay_ms = other.transfer_retry_delay_ms;
        }
        if other.grafana_tunnel_port != default_grafana_tunnel_port() {
            self.grafana_tunnel_port = other.grafana_tunnel_port;
        }
        if other.kibana_tunnel_port != default_kibana_tunnel_port() {
            self.kibana_tunnel_port = other.kibana_tunnel_port;
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.local_storage_dir.as_os_str().is_empty() {
            return ValidationSnafu {
                message: "local_storage_dir must not be empty",
            }
            .fail();
        }

        if !is_valid_account_name(&self.service_user) {
            return ValidationSnafu {
                message: format!("service_user '{}' is not a valid account name", self.service_user),
            }
            .fail();
        }

        if self.repo_branch.is_empty() || self.repo_branch.chars().any(|c| c.is_whitespace() || c == ';') {
            return ValidationSnafu {
                message: format!("repo_branch '{}' is not a valid branch name", self.repo_branch),
            }
            .fail();
        }

        if self.repo_url.is_empty() || self.repo_url.chars().any(char::is_whitespace) {
            return ValidationSnafu {
                message: "repo_url must be a non-empty URL without whitespace",
            }
            .fail();
        }

        if self.measurement_node_name.is_empty() || self.measurement_node_name.chars().any(char::is_whitespace) {
            return ValidationSnafu {
                message: "measurement_node_name must be a non-empty host alias",
            }
            .fail();
        }

        if self.transfer_attempts == 0 || self.transfer_attempts > MAX_TRANSFER_ATTEMPTS {
            return ValidationSnafu {
                message: format!("transfer_attempts must be in 1..={}", MAX_TRANSFER_ATTEMPTS),
            }
            .fail();
        }

        for ns in &self.nat64_nameservers {
            if ns.parse::<IpAddr>().is_err() {
                return ValidationSnafu {
                    message: format!("nat64 nameserver '{}' is not an IP address", ns),
                }
                .fail();
            }
        }

        if self.grafana_tunnel_port == 0 || self.kibana_tunnel_port == 0 {
            return ValidationSnafu {
                message: "tunnel ports must be non-zero",
            }
            .fail();
        }

        Ok(())
    }

    /// Retry policy for file transfers.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.transfer_attempts, Duration::from_millis(self.transfer_retry_delay_ms))
    }
}

/// Load configuration with env < TOML < overrides precedence, then validate.
pub fn load_config(toml_path: Option<&Path>, overrides: MfConfig) -> Result<MfConfig, ConfigError> {
    let mut config = MfConfig::from_env();

    if let Some(path) = toml_path {
        config.merge(MfConfig::from_toml_file(path)?);
    }

    config.merge(overrides);
    config.validate()?;
    Ok(config)
}

fn is_valid_account_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 32 && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

// Default value functions
fn default_local_storage_dir() -> PathBuf {
    PathBuf::from(DEFAULT_LOCAL_STORAGE_DIR)
}

fn default_repo_url() -> String {
    DEFAULT_REPO_URL.into()
}

fn default_repo_branch() -> String {
    DEFAULT_REPO_BRANCH.into()
}

fn default_service_user() -> String {
    DEFAULT_SERVICE_USER.into()
}

fn default_measurement_node_name() -> String {
    DEFAULT_MEASUREMENT_NODE_NAME.into()
}

fn default_measurement_network_prefix() -> String {
    DEFAULT_MEASUREMENT_NETWORK_PREFIX.into()
}

fn default_nat64_nameservers() -> Vec<String> {
    DEFAULT_NAT64_NAMESERVERS.iter().map(|s| s.to_string()).collect()
}

fn default_transfer_attempts() -> u32 {
    DEFAULT_TRANSFER_ATTEMPTS
}

fn default_transfer_retry_delay_ms() -> u64 {
    DEFAULT_TRANSFER_RETRY_DELAY_MS
}

fn default_grafana_tunnel_port() -> u16 {
    DEFAULT_GRAFANA_TUNNEL_PORT
}

fn default_kibana_tunnel_port() -> u16 {
    DEFAULT_KIBANA_TUNNEL_PORT
}

// Helper functions for parsing environment variables
fn parse_env<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.parse().ok()
}

fn parse_env_vec(key: &str) -> Vec<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
        .unwrap_or_default()
}

/// Configuration loading and parsing errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    #[snafu(display("failed to read config file {}: {source}", path.display()))]
    ReadFile { path: PathBuf, source: std::io::Error },

    #[snafu(display("failed to parse TOML config file {}: {source}", path.display()))]
    ParseToml { path: PathBuf, source: toml::de::Error },

    #[snafu(display("configuration validation failed: {message}"))]
    Validation { message: String },
}

impl ConfigError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConfigError::ReadFile { .. } => ErrorKind::Local,
            ConfigError::ParseToml { .. } => ErrorKind::Parse,
            ConfigError::Validation { .. } => ErrorKind::Validation,
        }
    }
}
