//! IPv4 address management.
//!
//! Each subnet owns a bitmap with one slot per usable host address (the
//! network and broadcast addresses are excluded). Slot `i` maps to
//! `network + i + 1`, so the first allocation of a fresh subnet is always
//! the `.1` gateway. All bitmaps live in a single JSON document guarded by
//! an advisory lock.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use nix::fcntl::{Flock, FlockArg};
use serde::{Deserialize, Serialize};

use corral_common::error::{CorralError, Result};

/// Narrowest accepted prefix: two usable hosts.
const MAX_PREFIX: u8 = 30;
/// Widest accepted prefix.
const MIN_PREFIX: u8 = 16;

/// An IPv4 subnet in CIDR notation, normalized to its network address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Subnet {
    network: Ipv4Addr,
    prefix: u8,
}

impl Subnet {
    /// Network address.
    #[must_use]
    pub const fn network(&self) -> Ipv4Addr {
        self.network
    }

    /// Prefix length.
    #[must_use]
    pub const fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Number of usable host addresses.
    #[must_use]
    pub const fn host_count(&self) -> u32 {
        (1u32 << (32 - self.prefix)) - 2
    }

    /// Host address for bitmap slot `index`.
    #[must_use]
    pub fn host(&self, index: u32) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.network) + index + 1)
    }

    /// Bitmap slot of `ip`, if it is a host address of this subnet.
    #[must_use]
    pub fn slot_of(&self, ip: Ipv4Addr) -> Option<u32> {
        u32::from(ip)
            .checked_sub(u32::from(self.network) + 1)
            .filter(|slot| *slot < self.host_count())
    }

    /// The gateway address (first host).
    #[must_use]
    pub fn gateway(&self) -> Ipv4Addr {
        self.host(0)
    }
}

impl FromStr for Subnet {
    type Err = CorralError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |why: &str| CorralError::usage(format!("invalid subnet {s:?}: {why}"));
        let (addr, prefix) = s.split_once('/').ok_or_else(|| invalid("expected CIDR"))?;
        let addr: Ipv4Addr = addr.parse().map_err(|_| invalid("bad address"))?;
        let prefix: u8 = prefix.parse().map_err(|_| invalid("bad prefix"))?;
        if !(MIN_PREFIX..=MAX_PREFIX).contains(&prefix) {
            return Err(invalid("prefix must be between /16 and /30"));
        }
        let mask = u32::MAX << (32 - prefix);
        Ok(Self {
            network: Ipv4Addr::from(u32::from(addr) & mask),
            prefix,
        })
    }
}

impl TryFrom<String> for Subnet {
    type Error = CorralError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Subnet> for String {
    fn from(subnet: Subnet) -> Self {
        subnet.to_string()
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

/// Persistent allocator over all subnets.
#[derive(Debug, Clone)]
pub struct Ipam {
    path: PathBuf,
}

type Bitmaps = BTreeMap<String, String>;

impl Ipam {
    /// Allocator persisting its bitmaps at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Allocates the lowest free host address in `subnet`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the subnet is exhausted, or an I/O
    /// error if the allocation file cannot be read or written.
    pub fn allocate(&self, subnet: &Subnet) -> Result<Ipv4Addr> {
        self.update(|maps| {
            let bitmap = maps
                .entry(subnet.to_string())
                .or_insert_with(|| "0".repeat(subnet.host_count() as usize));
            let slot = bitmap.find('0').ok_or_else(|| CorralError::Config {
                message: format!("no free address left in {subnet}"),
            })?;
            bitmap.replace_range(slot..=slot, "1");
            #[allow(clippy::cast_possible_truncation)]
            let index = slot as u32;
            Ok(subnet.host(index))
        })
    }

    /// Returns `ip` to the pool. Releasing a free address is a no-op.
    ///
    /// # Errors
    ///
    /// Returns a usage error if `ip` is outside `subnet`.
    pub fn release(&self, subnet: &Subnet, ip: Ipv4Addr) -> Result<()> {
        let slot = subnet
            .slot_of(ip)
            .ok_or_else(|| CorralError::usage(format!("{ip} is not a host of {subnet}")))?;
        self.update(|maps| {
            if let Some(bitmap) = maps.get_mut(&subnet.to_string()) {
                let slot = slot as usize;
                if slot < bitmap.len() {
                    bitmap.replace_range(slot..=slot, "0");
                }
            }
            Ok(())
        })
    }

    /// Forgets every allocation in `subnet`.
    ///
    /// # Errors
    ///
    /// Returns an error if the allocation file cannot be updated.
    pub fn release_subnet(&self, subnet: &Subnet) -> Result<()> {
        self.update(|maps| {
            let _ = maps.remove(&subnet.to_string());
            Ok(())
        })
    }

    /// Number of allocated addresses in `subnet`, gateway included.
    ///
    /// # Errors
    ///
    /// Returns an error if the allocation file cannot be read.
    pub fn allocated(&self, subnet: &Subnet) -> Result<usize> {
        let maps = load(&self.path)?;
        Ok(maps
            .get(&subnet.to_string())
            .map_or(0, |bitmap| bitmap.matches('1').count()))
    }

    fn update<T>(&self, f: impl FnOnce(&mut Bitmaps) -> Result<T>) -> Result<T> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir).map_err(|e| io_error(dir, e))?;
        let lock_path = self.path.with_extension("lock");
        let lock_file = File::options()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| io_error(&lock_path, e))?;
        let _guard = Flock::lock(lock_file, FlockArg::LockExclusive)
            .map_err(|(_, errno)| io_error(&lock_path, errno.into()))?;

        let mut maps = load(&self.path)?;
        let out = f(&mut maps)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec(&maps)?).map_err(|e| io_error(&tmp, e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| io_error(&self.path, e))?;
        Ok(out)
    }
}

fn load(path: &Path) -> Result<Bitmaps> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(serde_json::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Bitmaps::new()),
        Err(e) => Err(io_error(path, e)),
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

    fn ipam(dir: &Path) -> Ipam {
        Ipam::new(dir.join("ipam/subnet.json"))
    }

    #[test]
    fn subnet_normalizes_host_bits() {
        let subnet: Subnet = "192.168.7.42/24".parse().expect("subnet");
        assert_eq!(subnet.to_string(), "192.168.7.0/24");
        assert_eq!(subnet.host_count(), 254);
        assert_eq!(subnet.gateway(), Ipv4Addr::new(192, 168, 7, 1));
        assert_eq!(subnet.slot_of(Ipv4Addr::new(192, 168, 7, 254)), Some(253));
        assert_eq!(subnet.slot_of(Ipv4Addr::new(192, 168, 7, 255)), None);
        assert_eq!(subnet.slot_of(Ipv4Addr::new(192, 168, 7, 0)), None);
    }

    #[test]
    fn subnet_rejects_out_of_range_prefixes() {
        assert!("10.0.0.0/8".parse::<Subnet>().is_err());
        assert!("10.0.0.0/31".parse::<Subnet>().is_err());
        assert!("10.0.0.0".parse::<Subnet>().is_err());
        assert!("10.0.0/24".parse::<Subnet>().is_err());
        assert!("10.0.0.0/16".parse::<Subnet>().is_ok());
    }

    #[test]
    fn allocation_starts_at_gateway_and_is_sequential() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ipam = ipam(dir.path());
        let subnet: Subnet = "10.1.0.0/24".parse().expect("subnet");
        assert_eq!(ipam.allocate(&subnet).expect("gw"), Ipv4Addr::new(10, 1, 0, 1));
        assert_eq!(ipam.allocate(&subnet).expect("ip"), Ipv4Addr::new(10, 1, 0, 2));
        assert_eq!(ipam.allocated(&subnet).expect("count"), 2);
    }

    #[test]
    fn released_address_is_reused() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ipam = ipam(dir.path());
        let subnet: Subnet = "10.1.0.0/24".parse().expect("subnet");
        let _gw = ipam.allocate(&subnet).expect("gw");
        let ip = ipam.allocate(&subnet).expect("ip");
        let _next = ipam.allocate(&subnet).expect("next");
        ipam.release(&subnet, ip).expect("release");
        assert_eq!(ipam.allocate(&subnet).expect("reuse"), ip);
    }

    #[test]
    fn exhausted_subnet_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ipam = ipam(dir.path());
        let subnet: Subnet = "10.2.0.0/30".parse().expect("subnet");
        let _ = ipam.allocate(&subnet).expect("first");
        let _ = ipam.allocate(&subnet).expect("second");
        let err = ipam.allocate(&subnet).expect_err("full");
        assert!(matches!(err, CorralError::Config { .. }));
    }

    #[test]
    fn release_subnet_forgets_allocations() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ipam = ipam(dir.path());
        let subnet: Subnet = "10.3.0.0/29".parse().expect("subnet");
        let _ = ipam.allocate(&subnet).expect("gw");
        ipam.release_subnet(&subnet).expect("release");
        assert_eq!(ipam.allocated(&subnet).expect("count"), 0);
    }

    #[test]
    fn subnet_serializes_as_cidr_string() {
        let subnet: Subnet = "172.18.0.0/16".parse().expect("subnet");
        let json = serde_json::to_string(&subnet).expect("serialize");
        assert_eq!(json, "\"172.18.0.0/16\"");
        let back: Subnet = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, subnet);
    }
}
