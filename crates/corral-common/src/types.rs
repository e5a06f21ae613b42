//! Domain primitive types used across the corral workspace.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::CONTAINER_NAME_LEN;
use crate::error::{CorralError, Result};

/// Unique, filesystem-safe name of a container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerName(String);

impl ContainerName {
    /// Validates a caller-supplied container name.
    ///
    /// Names become directory and cgroup names, so only ASCII
    /// alphanumerics plus `-`, `_` and `.` are accepted.
    ///
    /// # Errors
    ///
    /// Returns a usage error if the name is empty, too long, or contains
    /// characters outside the accepted set.
    pub fn parse(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let valid_chars = name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if name.is_empty() || name.len() > 64 || !valid_chars || name.starts_with('.') {
            return Err(CorralError::usage(format!("invalid container name: {name:?}")));
        }
        Ok(Self(name))
    }

    /// Generates a random name of [`CONTAINER_NAME_LEN`] characters.
    #[must_use]
    pub fn generate() -> Self {
        let mut hex = uuid::Uuid::new_v4().simple().to_string();
        hex.truncate(CONTAINER_NAME_LEN);
        Self(hex)
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ContainerName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Lifecycle state of a container.
///
/// `Removed` is not a state: removal deletes the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerStatus {
    /// Container has been created but its process never ran.
    Created,
    /// Container-init (or the command it became) is alive.
    Running,
    /// The container process has exited or was stopped.
    Stopped,
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Resource constraints requested for a container.
///
/// Values stay unparsed; each is empty when the constraint is not requested.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Memory limit, e.g. `100m` or `536870912`.
    pub memory_limit: String,
    /// Relative CPU weight in cgroup-v1 shares.
    pub cpu_share: String,
    /// CPU list such as `0-1,3`.
    pub cpu_set: String,
}

impl ResourceConfig {
    /// Returns `true` if no constraint was requested.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.memory_limit.is_empty() && self.cpu_share.is_empty() && self.cpu_set.is_empty()
    }
}

/// A parsed `hostPort:containerPort` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortMapping {
    /// Port on the host.
    pub host: u16,
    /// Port inside the container.
    pub container: u16,
}

impl FromStr for PortMapping {
    type Err = CorralError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || CorralError::usage(format!("invalid port mapping: {s:?}"));
        let (host, container) = s.split_once(':').ok_or_else(invalid)?;
        Ok(Self {
            host: host.trim().parse().map_err(|_| invalid())?,
            container: container.trim().parse().map_err(|_| invalid())?,
        })
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.container)
    }
}

/// Authoritative lifecycle record of a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    /// Host pid of container-init, only meaningful while `Running`.
    pub pid: Option<u32>,
    /// User payload command tokens.
    pub command: Vec<String>,
    /// Unique container name.
    pub name: ContainerName,
    /// Image the container was launched from.
    #[serde(default)]
    pub image: String,
    /// Host bind specification (`HOST:CONTAINER`), empty if none.
    #[serde(default)]
    pub volume: String,
    /// Ordered `hostPort:containerPort` pairs.
    #[serde(default)]
    pub port_mapping: Vec<String>,
    /// Current lifecycle state.
    pub status: ContainerStatus,
    /// Creation timestamp.
    pub created_time: DateTime<Utc>,
    /// Network the container is attached to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    /// Address assigned by the network fabric.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

impl ContainerInfo {
    /// Creates a record in the `Created` state.
    #[must_use]
    pub fn new(name: ContainerName, command: Vec<String>) -> Self {
        Self {
            pid: None,
            command,
            name,
            image: String::new(),
            volume: String::new(),
            port_mapping: Vec::new(),
            status: ContainerStatus::Created,
            created_time: Utc::now(),
            network: None,
            ip_address: None,
        }
    }

    /// Marks the record as running under `pid`.
    pub const fn mark_running(&mut self, pid: u32) {
        self.pid = Some(pid);
        self.status = ContainerStatus::Running;
    }

    /// Marks the record as stopped and clears the stale pid.
    pub const fn mark_stopped(&mut self) {
        self.pid = None;
        self.status = ContainerStatus::Stopped;
    }

    /// Returns the pid if the record claims the container is running.
    #[must_use]
    pub const fn running_pid(&self) -> Option<u32> {
        match self.status {
            ContainerStatus::Running => self.pid,
            ContainerStatus::Created | ContainerStatus::Stopped => None,
        }
    }
}

/// SHA-256 hash digest used to identify committed images.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sha256Hash(String);

impl Sha256Hash {
    /// Creates a hash from a hex-encoded string.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not a valid 64-character hex string.
    pub fn from_hex(hex: impl Into<String>) -> Result<Self> {
        let hex = hex.into();
        if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CorralError::Config {
                message: format!("invalid SHA-256 hex string: {hex}"),
            });
        }
        Ok(Self(hex))
    }

    /// Returns the hex-encoded hash string.
    #[must_use]
    pub fn as_hex(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Sha256Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_names_have_fixed_length() {
        for _ in 0..32 {
            let name = ContainerName::generate();
            assert_eq!(name.as_str().len(), CONTAINER_NAME_LEN);
            assert!(ContainerName::parse(name.as_str()).is_ok());
        }
    }

    #[test]
    fn parse_rejects_path_like_names() {
        assert!(ContainerName::parse("../etc").is_err());
        assert!(ContainerName::parse("a/b").is_err());
        assert!(ContainerName::parse("").is_err());
        assert!(ContainerName::parse(".hidden").is_err());
        assert!(ContainerName::parse("web-1_v2.0").is_ok());
    }

    #[test]
    fn status_display() {
        assert_eq!(ContainerStatus::Created.to_string(), "created");
        assert_eq!(ContainerStatus::Running.to_string(), "running");
        assert_eq!(ContainerStatus::Stopped.to_string(), "stopped");
    }

    #[test]
    fn port_mapping_parses_pairs() {
        let p: PortMapping = "8080:80".parse().expect("valid mapping");
        assert_eq!(p, PortMapping { host: 8080, container: 80 });
        assert_eq!(p.to_string(), "8080:80");
        assert!("8080".parse::<PortMapping>().is_err());
        assert!("80:http".parse::<PortMapping>().is_err());
        assert!("70000:80".parse::<PortMapping>().is_err());
    }

    #[test]
    fn stopping_clears_pid() {
        let mut info = ContainerInfo::new(ContainerName::generate(), vec!["sh".into()]);
        assert_eq!(info.status, ContainerStatus::Created);
        assert_eq!(info.running_pid(), None);

        info.mark_running(4242);
        assert_eq!(info.running_pid(), Some(4242));

        info.mark_stopped();
        assert_eq!(info.pid, None);
        assert_eq!(info.status, ContainerStatus::Stopped);
    }

    #[test]
    fn resource_config_emptiness() {
        assert!(ResourceConfig::default().is_empty());
        let cfg = ResourceConfig {
            memory_limit: "100m".into(),
            ..ResourceConfig::default()
        };
        assert!(!cfg.is_empty());
    }

    #[test]
    fn container_info_serializes_name_as_plain_string() {
        let info = ContainerInfo::new(ContainerName::parse("web").expect("name"), vec![]);
        let json = serde_json::to_value(&info).expect("serialize");
        assert_eq!(json["name"], "web");
        assert_eq!(json["status"], "Created");
        assert!(json.get("network").is_none());
    }

    #[test]
    fn sha256_from_hex_validates_length() {
        assert!(Sha256Hash::from_hex("abc").is_err());
        let hex = "a".repeat(64);
        let hash = Sha256Hash::from_hex(hex.clone()).expect("valid hex");
        assert_eq!(hash.to_string(), format!("sha256:{hex}"));
    }
}
