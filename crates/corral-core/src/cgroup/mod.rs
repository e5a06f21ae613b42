//! Cgroups v2 resource management.
//!
//! Each container gets its own scope directory below a configurable root
//! (`/sys/fs/cgroup/corral` by default). Limits are written to the
//! subsystem control files, and processes join by pid.

pub mod cpu;
pub mod cpuset;
pub mod memory;

use std::path::{Path, PathBuf};

use corral_common::error::{CorralError, Result};
use corral_common::types::ResourceConfig;

/// Controllers corral may write limits for.
const CONTROLLERS: [&str; 3] = ["cpu", "cpuset", "memory"];

/// Handle to a cgroup for a specific container.
#[derive(Debug)]
pub struct CgroupManager {
    /// Path to this container's cgroup directory.
    path: PathBuf,
}

impl CgroupManager {
    /// Creates the cgroup `<root>/<name>`.
    ///
    /// # Errors
    ///
    /// Returns an error if the cgroup directory cannot be created.
    pub fn create(root: &Path, name: &str) -> Result<Self> {
        let path = root.join(name);
        std::fs::create_dir_all(&path).map_err(|e| CorralError::Io {
            path: path.clone(),
            source: e,
        })?;
        tracing::info!(path = %path.display(), "cgroup created");
        Ok(Self { path })
    }

    /// Returns a handle to `<root>/<name>` without touching the filesystem.
    #[must_use]
    pub fn open(root: &Path, name: &str) -> Self {
        Self {
            path: root.join(name),
        }
    }

    /// Returns the cgroup directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Applies resource limits to this cgroup.
    ///
    /// Empty fields are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be parsed or a control file
    /// cannot be written.
    pub fn apply_limits(&self, config: &ResourceConfig) -> Result<()> {
        if !config.memory_limit.is_empty() {
            let bytes = memory::parse_memory_limit(&config.memory_limit)?;
            memory::set_memory_max(&self.path, bytes)?;
        }
        if !config.cpu_share.is_empty() {
            let shares = config.cpu_share.trim().parse::<u64>().map_err(|_| {
                CorralError::Config {
                    message: format!("invalid cpu share: {:?}", config.cpu_share),
                }
            })?;
            cpu::set_cpu_weight(&self.path, cpu::shares_to_weight(shares))?;
        }
        if !config.cpu_set.is_empty() {
            cpuset::set_cpus(&self.path, &config.cpu_set)?;
        }
        Ok(())
    }

    /// Adds a process to this cgroup by writing its PID.
    ///
    /// # Errors
    ///
    /// Returns an error if writing to `cgroup.procs` fails.
    pub fn add_process(&self, pid: u32) -> Result<()> {
        let procs_path = self.path.join("cgroup.procs");
        std::fs::write(&procs_path, pid.to_string()).map_err(|e| CorralError::Io {
            path: procs_path,
            source: e,
        })?;
        tracing::debug!(pid, "added process to cgroup");
        Ok(())
    }

    /// Removes the cgroup directory. Removing an absent cgroup succeeds.
    ///
    /// The kernel only allows `rmdir` on a cgroup without member processes.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be removed.
    pub fn destroy(&self) -> Result<()> {
        match std::fs::remove_dir(&self.path) {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), "cgroup destroyed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CorralError::Io {
                path: self.path.clone(),
                source: e,
            }),
        }
    }
}

/// Delegates the controllers corral uses to the children of `root`.
///
/// Writes `+<controller>` into `cgroup.subtree_control` of both the
/// parent of `root` and `root` itself. Failures are logged only: a
/// controller that is unavailable surfaces later as a write error on the
/// matching limit file.
pub fn enable_controllers(root: &Path) {
    for dir in root.parent().into_iter().chain(std::iter::once(root)) {
        let control = dir.join("cgroup.subtree_control");
        if !control.exists() {
            continue;
        }
        for controller in CONTROLLERS {
            if let Err(e) = std::fs::write(&control, format!("+{controller}")) {
                tracing::debug!(path = %control.display(), controller, error = %e, "controller not delegated");
            }
        }
    }
}
