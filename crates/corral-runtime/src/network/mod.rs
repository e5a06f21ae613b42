//! Container networks and address assignment.
//!
//! [`NetworkStore`] keeps network definitions as JSON files and hands out
//! addresses through [`ipam::Ipam`]. Building bridges and veth pairs is not
//! done here; attaching only records the addressing on the container.

pub mod ipam;

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use corral_common::config::CorralConfig;
use corral_common::error::{CorralError, Result};
use corral_common::types::{ContainerInfo, ContainerName, PortMapping};

use self::ipam::{Ipam, Subnet};

/// The only supported driver.
pub const BRIDGE_DRIVER: &str = "bridge";

/// A named virtual network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    /// Network name.
    pub name: String,
    /// Driver that owns the network.
    pub driver: String,
    /// Address range.
    pub subnet: Subnet,
    /// Address reserved for the gateway.
    pub gateway: Ipv4Addr,
}

/// Attaches containers to virtual networks.
pub trait NetworkFabric: Send + Sync {
    /// Prepares on-disk state. Safe to call repeatedly.
    ///
    /// # Errors
    ///
    /// Returns an error if the state directories cannot be created.
    fn init(&self) -> Result<()>;

    /// Assigns `info` an address on `network` and records it on `info`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown network, a usage error for a
    /// malformed port mapping, or an error if no address is free.
    fn attach(&self, network: &str, info: &mut ContainerInfo) -> Result<()>;

    /// Releases the address `info` holds on `network`.
    ///
    /// # Errors
    ///
    /// Returns an error if the allocation cannot be updated.
    fn detach(&self, network: &str, info: &ContainerInfo) -> Result<()>;

    /// Creates a network.
    ///
    /// # Errors
    ///
    /// Returns a usage error for an unsupported driver, a malformed subnet,
    /// or a name that is taken.
    fn create(&self, driver: &str, subnet: &str, name: &str) -> Result<Network>;

    /// Lists networks sorted by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the definitions cannot be read.
    fn list(&self) -> Result<Vec<Network>>;

    /// Deletes a network and its address allocations.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the network does not exist.
    fn delete(&self, name: &str) -> Result<()>;
}

/// File-backed network fabric.
#[derive(Debug, Clone)]
pub struct NetworkStore {
    networks_dir: PathBuf,
    ipam: Ipam,
}

impl NetworkStore {
    /// Creates a store under `config`'s network directory.
    #[must_use]
    pub fn new(config: &CorralConfig) -> Self {
        let dir = config.network_dir();
        Self {
            networks_dir: dir.join("networks"),
            ipam: Ipam::new(dir.join("ipam").join("subnet.json")),
        }
    }

    fn definition_path(&self, name: &str) -> PathBuf {
        self.networks_dir.join(format!("{name}.json"))
    }

    fn load(&self, name: &str) -> Result<Network> {
        let path = self.definition_path(name);
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(network_not_found(name)),
            Err(e) => Err(io_error(&path, e)),
        }
    }
}

impl NetworkFabric for NetworkStore {
    fn init(&self) -> Result<()> {
        std::fs::create_dir_all(&self.networks_dir).map_err(|e| io_error(&self.networks_dir, e))
    }

    fn attach(&self, network: &str, info: &mut ContainerInfo) -> Result<()> {
        for mapping in &info.port_mapping {
            let _: PortMapping = mapping.parse()?;
        }
        let net = self.load(network)?;
        let ip = self.ipam.allocate(&net.subnet)?;
        info.network = Some(net.name);
        info.ip_address = Some(ip.to_string());
        tracing::info!(
            name = %info.name,
            network,
            ip = %ip,
            ports = ?info.port_mapping,
            "container attached to network"
        );
        Ok(())
    }

    fn detach(&self, network: &str, info: &ContainerInfo) -> Result<()> {
        let Some(address) = info.ip_address.as_deref() else {
            return Ok(());
        };
        let net = match self.load(network) {
            Ok(net) => net,
            Err(CorralError::NotFound { .. }) => {
                tracing::warn!(name = %info.name, network, "network vanished before detach");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let ip: Ipv4Addr = address
            .parse()
            .map_err(|_| CorralError::usage(format!("invalid recorded address {address:?}")))?;
        self.ipam.release(&net.subnet, ip)?;
        tracing::info!(name = %info.name, network, ip = %ip, "container detached from network");
        Ok(())
    }

    fn create(&self, driver: &str, subnet: &str, name: &str) -> Result<Network> {
        if driver != BRIDGE_DRIVER {
            return Err(CorralError::usage(format!("unsupported network driver: {driver}")));
        }
        let _ = ContainerName::parse(name)
            .map_err(|_| CorralError::usage(format!("invalid network name: {name:?}")))?;
        let subnet: Subnet = subnet.parse()?;

        self.init()?;
        if self.definition_path(name).exists() {
            return Err(CorralError::usage(format!("network {name} already exists")));
        }
        if let Some(clash) = self.list()?.into_iter().find(|n| n.subnet == subnet) {
            return Err(CorralError::usage(format!(
                "subnet {subnet} is already used by network {}",
                clash.name
            )));
        }

        self.ipam.release_subnet(&subnet)?;
        let gateway = self.ipam.allocate(&subnet)?;
        let network = Network {
            name: name.to_owned(),
            driver: driver.to_owned(),
            subnet,
            gateway,
        };
        let path = self.definition_path(name);
        std::fs::write(&path, serde_json::to_string_pretty(&network)?)
            .map_err(|e| io_error(&path, e))?;
        tracing::info!(network = name, %subnet, %gateway, "network created");
        Ok(network)
    }

    fn list(&self) -> Result<Vec<Network>> {
        let entries = match std::fs::read_dir(&self.networks_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&self.networks_dir, e)),
        };
        let mut networks = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let content = std::fs::read_to_string(&path).map_err(|e| io_error(&path, e))?;
            networks.push(serde_json::from_str::<Network>(&content)?);
        }
        networks.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(networks)
    }

    fn delete(&self, name: &str) -> Result<()> {
        let network = self.load(name)?;
        self.ipam.release_subnet(&network.subnet)?;
        let path = self.definition_path(name);
        std::fs::remove_file(&path).map_err(|e| io_error(&path, e))?;
        tracing::info!(network = name, "network removed");
        Ok(())
    }
}

fn network_not_found(name: &str) -> CorralError {
    CorralError::NotFound {
        kind: "network",
        id: name.to_owned(),
    }
}

fn io_error(path: &Path, source: std::io::Error) -> CorralError {
    CorralError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &Path) -> NetworkStore {
        NetworkStore::new(&CorralConfig::with_root(dir))
    }

    fn container(name: &str, ports: &[&str]) -> ContainerInfo {
        let mut info =
            ContainerInfo::new(ContainerName::parse(name).expect("name"), vec!["sh".into()]);
        info.port_mapping = ports.iter().map(|p| (*p).to_string()).collect();
        info
    }

    #[test]
    fn create_reserves_gateway() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(dir.path());
        let net = store.create("bridge", "192.168.10.0/24", "testnet").expect("create");
        assert_eq!(net.gateway, Ipv4Addr::new(192, 168, 10, 1));
        assert_eq!(store.list().expect("list"), vec![net]);
    }

    #[test]
    fn create_rejects_bad_input() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(dir.path());
        assert!(store.create("macvlan", "10.0.0.0/24", "n").is_err());
        assert!(store.create("bridge", "10.0.0.0/8", "n").is_err());
        assert!(store.create("bridge", "10.0.0.0/24", "../n").is_err());
        store.create("bridge", "10.0.0.0/24", "n").expect("create");
        assert!(store.create("bridge", "10.0.1.0/24", "n").is_err());
        assert!(store.create("bridge", "10.0.0.0/24", "other").is_err());
    }

    #[test]
    fn attach_assigns_address_after_gateway() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(dir.path());
        store.create("bridge", "10.9.0.0/24", "mynet").expect("create");

        let mut info = container("web", &["8080:80"]);
        store.attach("mynet", &mut info).expect("attach");
        assert_eq!(info.network.as_deref(), Some("mynet"));
        assert_eq!(info.ip_address.as_deref(), Some("10.9.0.2"));
    }

    #[test]
    fn detach_frees_the_address() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(dir.path());
        store.create("bridge", "10.9.0.0/24", "mynet").expect("create");

        let mut first = container("a", &[]);
        store.attach("mynet", &mut first).expect("attach");
        store.detach("mynet", &first).expect("detach");

        let mut second = container("b", &[]);
        store.attach("mynet", &mut second).expect("attach");
        assert_eq!(second.ip_address, first.ip_address);
    }

    #[test]
    fn attach_to_unknown_network_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(dir.path());
        store.init().expect("init");
        let mut info = container("web", &[]);
        let err = store.attach("missing", &mut info).expect_err("unknown");
        assert!(matches!(err, CorralError::NotFound { kind: "network", .. }));
        assert_eq!(info.ip_address, None);
    }

    #[test]
    fn attach_rejects_malformed_port_mapping() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(dir.path());
        store.create("bridge", "10.9.0.0/24", "mynet").expect("create");
        let mut info = container("web", &["8080"]);
        let err = store.attach("mynet", &mut info).expect_err("bad port");
        assert!(matches!(err, CorralError::Usage { .. }));
    }

    #[test]
    fn delete_removes_definition() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(dir.path());
        store.create("bridge", "10.9.0.0/24", "mynet").expect("create");
        store.delete("mynet").expect("delete");
        assert!(store.list().expect("list").is_empty());
        assert!(matches!(
            store.delete("mynet"),
            Err(CorralError::NotFound { .. })
        ));
    }
}
