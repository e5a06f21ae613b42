//! Lifecycle commands on persisted containers.
//!
//! Each command takes the container's name lock, reconciles the record
//! against the OS (a `Running` record whose process is gone becomes
//! `Stopped`), and only then acts on it.

use std::io::Write;
use std::time::Duration;

use corral_common::error::{CorralError, Result};
use corral_common::types::{ContainerInfo, ContainerName, ContainerStatus};
use corral_core::process;

use crate::engine::Engine;
use crate::logs;
use crate::registry::NameLock;
use crate::resource;
use crate::workspace::CommittedImage;

impl Engine {
    /// Returns every container record, oldest first, reconciled.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be read.
    pub fn list(&self) -> Result<Vec<ContainerInfo>> {
        let mut records = self.registry.list()?;
        for info in &mut records {
            if info.running_pid().is_some_and(|pid| !process::is_alive(pid)) {
                let name = info.name.to_string();
                match self.load_locked(&name) {
                    Ok((_lock, current)) => *info = current,
                    Err(e) => tracing::warn!(name = %name, error = %e, "failed to reconcile record"),
                }
            }
        }
        Ok(records)
    }

    /// Returns the reconciled record of `name`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such container exists.
    pub fn inspect(&self, name: &str) -> Result<ContainerInfo> {
        self.load_locked(name).map(|(_lock, info)| info)
    }

    /// Reads the log of `name`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such container exists.
    pub fn logs(&self, name: &str) -> Result<String> {
        let _ = self.inspect(name)?;
        logs::read_logs(&self.registry.log_path(name))
    }

    /// Streams the log of `name` to `out` until the container stops.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such container exists, or an I/O error.
    pub fn follow_logs(&self, name: &str, out: &mut dyn Write) -> Result<()> {
        let info = self.inspect(name)?;
        let pid = info.running_pid();
        logs::follow_logs(
            &self.registry.log_path(name),
            out,
            || pid.is_some_and(process::is_alive),
            logs::FOLLOW_POLL,
        )
    }

    /// Stops `name`: SIGTERM, grace period, then SIGKILL.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `AlreadyStopped`, `InvalidState` for a container
    /// that never ran, or `SignalFailure` if the process survives.
    pub fn stop(&self, name: &str) -> Result<ContainerInfo> {
        let (_lock, info) = self.load_locked(name)?;
        self.stop_locked(info)
    }

    /// Removes `name` and its workspace. A running container is refused
    /// unless `force` is set, in which case it is stopped first.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, or `InvalidState` for a running container
    /// without `force`.
    pub fn remove(&self, name: &str, force: bool) -> Result<()> {
        let (_lock, mut info) = self.load_locked(name)?;
        if info.status == ContainerStatus::Running {
            if !force {
                return Err(CorralError::InvalidState {
                    name: name.to_owned(),
                    status: info.status,
                    operation: "remove",
                });
            }
            info = self.stop_locked(info)?;
        }

        self.factory.remove_workspace(name, &info.volume);
        resource::release_resources(self.limiter.as_ref(), name);
        self.registry.delete(name)?;
        tracing::info!(name, "container removed");
        Ok(())
    }

    /// Packages the root filesystem of `name` as image `image`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such container exists.
    pub fn commit(&self, name: &str, image: &str) -> Result<CommittedImage> {
        let (_lock, _info) = self.load_locked(name)?;
        self.factory.commit(name, image)
    }

    /// Loads `name` under its lock, persisting a reconciled status.
    ///
    /// Names that `run` could never have produced are not found; they are
    /// rejected before they reach any path.
    fn load_locked(&self, name: &str) -> Result<(NameLock, ContainerInfo)> {
        let name = ContainerName::parse(name)
            .map_err(|_| CorralError::container_not_found(name))?;
        let name = name.as_str();
        let lock = self.registry.lock(name)?;
        let mut info = self
            .registry
            .get(name)?
            .ok_or_else(|| CorralError::container_not_found(name))?;
        if let Some(pid) = info.running_pid() {
            if !process::is_alive(pid) {
                tracing::info!(name, pid, "container exited on its own");
                self.release_runtime(&mut info);
                info.mark_stopped();
                self.registry.put(&info)?;
            }
        }
        Ok((lock, info))
    }

    /// Stops a container whose lock the caller holds.
    fn stop_locked(&self, mut info: ContainerInfo) -> Result<ContainerInfo> {
        let name = info.name.to_string();
        let pid = match info.status {
            ContainerStatus::Stopped => return Err(CorralError::AlreadyStopped { name }),
            ContainerStatus::Created => {
                return Err(CorralError::InvalidState {
                    name,
                    status: info.status,
                    operation: "stop",
                });
            }
            ContainerStatus::Running => info.pid,
        };

        if let Some(pid) = pid {
            process::terminate(pid, Duration::from_secs(self.config.stop_timeout_secs))?;
        }
        self.release_runtime(&mut info);
        info.mark_stopped();
        self.registry.put(&info)?;
        tracing::info!(name = %name, "container stopped");
        Ok(info)
    }

    /// Releases the scope and network address of a container that stopped.
    fn release_runtime(&self, info: &mut ContainerInfo) {
        resource::release_resources(self.limiter.as_ref(), info.name.as_str());
        let Some(network) = info.network.clone() else {
            return;
        };
        if let Err(e) = self.network.detach(&network, info) {
            tracing::warn!(name = %info.name, network = %network, error = %e, "network detach failed");
            return;
        }
        info.ip_address = None;
    }
}
