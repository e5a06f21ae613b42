//! Launch orchestration.
//!
//! A launch is a strictly ordered sequence: create the process and its
//! workspace, start it, persist the record, attach the network, apply
//! resource limits, hand the command to container-init. Every completed
//! step records its compensation in a [`Saga`]; if a later step fails the
//! earlier ones are undone newest-first, so a failed `run` leaves neither
//! a process nor a record behind.

use std::cell::RefCell;

use corral_common::config::CorralConfig;
use corral_common::constants::NAME_GENERATION_ATTEMPTS;
use corral_common::error::{CorralError, Result};
use corral_common::types::{ContainerInfo, ContainerName, PortMapping, ResourceConfig};
use corral_core::process::send_signal;
use nix::sys::signal::Signal;

use crate::handoff::HandoffWriter;
use crate::network::{Network, NetworkFabric, NetworkStore};
use crate::process::{ContainerProcess, NamespaceProcessFactory, ProcessFactory, ProcessRequest};
use crate::registry::{FileRegistry, NameLock, Registry};
use crate::resource::{self, CgroupLimiter, ResourceLimiter};
use crate::saga::Saga;
use crate::workspace::VolumeSpec;

/// Everything `run` needs to launch a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunRequest {
    /// Attach the caller's terminal and wait for the container to exit.
    pub interactive: bool,
    /// Return as soon as the container is running.
    pub detach: bool,
    /// Command tokens executed inside the container.
    pub command: Vec<String>,
    /// Requested resource limits.
    pub resources: ResourceConfig,
    /// `HOST:CONTAINER` bind specification, empty for none.
    pub volume: String,
    /// Caller-chosen name; generated when absent.
    pub name: Option<String>,
    /// Image providing the root filesystem.
    pub image: String,
    /// Extra `KEY=VALUE` environment entries.
    pub env: Vec<String>,
    /// Network to attach to.
    pub network: Option<String>,
    /// `hostPort:containerPort` pairs.
    pub port_mapping: Vec<String>,
    /// Abort the launch if resource limits cannot be applied.
    pub strict_limits: bool,
}

impl RunRequest {
    /// Rejects malformed or contradictory requests before any side effect.
    ///
    /// # Errors
    ///
    /// Returns a usage error describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.command.is_empty() {
            return Err(CorralError::usage("missing container command"));
        }
        if self.interactive && self.detach {
            return Err(CorralError::usage("interactive and detached modes are exclusive"));
        }
        if let Some(bad) = self.env.iter().find(|e| !e.contains('=')) {
            return Err(CorralError::usage(format!(
                "environment entry must be KEY=VALUE: {bad:?}"
            )));
        }
        for mapping in &self.port_mapping {
            let _: PortMapping = mapping.parse()?;
        }
        if !self.port_mapping.is_empty() && self.network.is_none() {
            return Err(CorralError::usage("port mappings require a network"));
        }
        let _ = VolumeSpec::parse(&self.volume)?;
        if let Some(name) = &self.name {
            let _ = ContainerName::parse(name.as_str())?;
        }
        Ok(())
    }
}

/// Result of a successful `run`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The container keeps running in the background.
    Detached {
        /// Container name.
        name: ContainerName,
        /// Host pid of container-init.
        pid: u32,
    },
    /// An interactive container ran to completion and was torn down.
    Exited {
        /// Container name.
        name: ContainerName,
        /// Exit code of the container command.
        code: i32,
    },
}

/// The orchestrator and its collaborators.
pub struct Engine {
    pub(crate) config: CorralConfig,
    pub(crate) factory: Box<dyn ProcessFactory>,
    pub(crate) registry: Box<dyn Registry>,
    pub(crate) limiter: Box<dyn ResourceLimiter>,
    pub(crate) network: Box<dyn NetworkFabric>,
}

impl Engine {
    /// Creates an engine wired to the Linux collaborators.
    #[must_use]
    pub fn new(config: CorralConfig) -> Self {
        Self {
            factory: Box::new(NamespaceProcessFactory::new(&config)),
            registry: Box::new(FileRegistry::new(&config)),
            limiter: Box::new(CgroupLimiter::new(&config)),
            network: Box::new(NetworkStore::new(&config)),
            config,
        }
    }

    /// Creates an engine from explicit collaborators.
    #[must_use]
    pub fn with_components(
        config: CorralConfig,
        factory: Box<dyn ProcessFactory>,
        registry: Box<dyn Registry>,
        limiter: Box<dyn ResourceLimiter>,
        network: Box<dyn NetworkFabric>,
    ) -> Self {
        Self {
            config,
            factory,
            registry,
            limiter,
            network,
        }
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &CorralConfig {
        &self.config
    }

    /// Launches a container.
    ///
    /// Interactive launches block until the command exits and then tear
    /// the container down; the record stays behind as `Stopped`. Detached
    /// launches return once container-init received its command.
    ///
    /// # Errors
    ///
    /// Returns a usage error or `NameConflict` before any side effect,
    /// and `LaunchFailure` (or `HandoffFailure`) after rolling back every
    /// completed step.
    pub fn run(&self, request: &RunRequest) -> Result<RunOutcome> {
        request.validate()?;
        let (name, lock) = self.claim_name(request.name.as_deref())?;
        tracing::info!(name = %name, image = %request.image, command = ?request.command, "launching container");

        let mut info = ContainerInfo::new(name.clone(), request.command.clone());
        info.image.clone_from(&request.image);
        info.volume.clone_from(&request.volume);
        info.port_mapping.clone_from(&request.port_mapping);

        let process_request = ProcessRequest {
            interactive: request.interactive,
            volume: request.volume.clone(),
            name: name.to_string(),
            image: request.image.clone(),
            env: request.env.clone(),
        };
        let (process, writer) = match self.factory.create(&process_request) {
            Ok(created) => created,
            Err(e) => {
                if let Err(cleanup) = self.registry.delete(name.as_str()) {
                    tracing::warn!(name = %name, error = %cleanup, "failed to remove container directory");
                }
                return Err(CorralError::launch("create process", e));
            }
        };
        let process = RefCell::new(process);

        let mut saga = Saga::new("run");
        saga.record("create process", || {
            self.factory.remove_workspace(name.as_str(), &request.volume);
            self.registry.delete(name.as_str())
        });
        let pid = match self.launch(&mut saga, &process, writer, &mut info, request) {
            Ok(pid) => {
                saga.commit();
                pid
            }
            Err(e) => {
                tracing::error!(name = %name, error = %e, "launch failed");
                saga.rollback();
                return Err(e);
            }
        };
        drop(lock);

        if !request.interactive {
            tracing::info!(name = %name, pid, "container running detached");
            return Ok(RunOutcome::Detached { name, pid });
        }

        let waited = process.borrow_mut().wait();
        self.teardown_interactive(&info);
        let code = waited?;
        Ok(RunOutcome::Exited { name, code })
    }

    fn launch<'a>(
        &'a self,
        saga: &mut Saga<'a>,
        process: &'a RefCell<Box<dyn ContainerProcess>>,
        writer: HandoffWriter,
        info: &mut ContainerInfo,
        request: &'a RunRequest,
    ) -> Result<u32> {
        let pid = process
            .borrow_mut()
            .start()
            .map_err(|e| CorralError::launch("start process", e))?;
        saga.record("start process", move || kill_and_reap(process, pid));

        info.mark_running(pid);
        self.registry
            .create(info)
            .map_err(|e| CorralError::launch("persist record", e))?;

        if let Some(network) = request.network.as_deref() {
            self.network
                .init()
                .and_then(|()| self.network.attach(network, info))
                .map_err(|e| CorralError::launch("attach network", e))?;
            let attached = info.clone();
            saga.record("attach network", move || self.network.detach(network, &attached));
            self.registry
                .put(info)
                .map_err(|e| CorralError::launch("persist record", e))?;
        }

        let id = info.name.to_string();
        let applied = resource::apply_resources(
            self.limiter.as_ref(),
            &id,
            &request.resources,
            pid,
            request.strict_limits,
        )
        .map_err(|e| CorralError::launch("apply resources", e))?;
        if applied {
            saga.record("apply resources", move || self.limiter.release(&id));
        }

        writer.send(&request.command)?;
        tracing::debug!(name = %info.name, pid, "init handoff complete");
        Ok(pid)
    }

    /// Reserves a container name under its lock.
    fn claim_name(&self, requested: Option<&str>) -> Result<(ContainerName, NameLock)> {
        if let Some(requested) = requested {
            let name = ContainerName::parse(requested)?;
            let lock = self.registry.lock(name.as_str())?;
            if self.registry.get(name.as_str())?.is_some() {
                return Err(CorralError::NameConflict {
                    name: name.to_string(),
                });
            }
            return Ok((name, lock));
        }

        for _ in 0..NAME_GENERATION_ATTEMPTS {
            let name = ContainerName::generate();
            let lock = self.registry.lock(name.as_str())?;
            if self.registry.get(name.as_str())?.is_none() {
                return Ok((name, lock));
            }
            tracing::debug!(name = %name, "generated name in use, retrying");
        }
        Err(CorralError::NameConflict {
            name: "<generated>".into(),
        })
    }

    /// Tears down an interactive container after its command exited.
    ///
    /// The network address is released from the stored record, under its
    /// lock: a concurrent `stop` may already have released it.
    fn teardown_interactive(&self, launched: &ContainerInfo) {
        let name = launched.name.as_str();
        resource::release_resources(self.limiter.as_ref(), name);
        self.factory.remove_workspace(name, &launched.volume);

        let updated = self.registry.lock(name).and_then(|_lock| {
            let Some(mut info) = self.registry.get(name)? else {
                return Ok(());
            };
            let holding = info.ip_address.as_ref().and(info.network.clone());
            if let Some(network) = holding {
                match self.network.detach(&network, &info) {
                    Ok(()) => info.ip_address = None,
                    Err(e) => tracing::warn!(name, error = %e, "network detach failed"),
                }
            }
            info.mark_stopped();
            self.registry.put(&info)
        });
        match updated {
            Ok(()) => tracing::info!(name, "interactive container torn down"),
            Err(e) => tracing::warn!(name, error = %e, "failed to record container exit"),
        }
    }

    /// Creates a network.
    ///
    /// # Errors
    ///
    /// Returns a usage error for bad parameters or a taken name.
    pub fn create_network(&self, driver: &str, subnet: &str, name: &str) -> Result<Network> {
        self.network.init()?;
        self.network.create(driver, subnet, name)
    }

    /// Lists networks.
    ///
    /// # Errors
    ///
    /// Returns an error if the network definitions cannot be read.
    pub fn list_networks(&self) -> Result<Vec<Network>> {
        self.network.init()?;
        self.network.list()
    }

    /// Removes a network.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the network does not exist.
    pub fn remove_network(&self, name: &str) -> Result<()> {
        self.network.init()?;
        self.network.delete(name)
    }
}

fn kill_and_reap(process: &RefCell<Box<dyn ContainerProcess>>, pid: u32) -> Result<()> {
    send_signal(pid, Signal::SIGKILL)?;
    let code = process.borrow_mut().wait()?;
    tracing::debug!(pid, code, "started process killed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(command: &[&str]) -> RunRequest {
        RunRequest {
            command: command.iter().map(|c| (*c).to_string()).collect(),
            image: "busybox".into(),
            ..RunRequest::default()
        }
    }

    #[test]
    fn empty_command_is_a_usage_error() {
        assert!(matches!(
            request(&[]).validate(),
            Err(CorralError::Usage { .. })
        ));
    }

    #[test]
    fn interactive_and_detached_are_exclusive() {
        let mut req = request(&["sh"]);
        req.interactive = true;
        req.detach = true;
        assert!(matches!(req.validate(), Err(CorralError::Usage { .. })));
        req.detach = false;
        assert!(req.validate().is_ok());
    }

    #[test]
    fn malformed_inputs_are_rejected() {
        let mut req = request(&["sh"]);
        req.env = vec!["NOEQUALS".into()];
        assert!(req.validate().is_err());

        let mut req = request(&["sh"]);
        req.network = Some("mynet".into());
        req.port_mapping = vec!["80".into()];
        assert!(req.validate().is_err());

        let mut req = request(&["sh"]);
        req.port_mapping = vec!["8080:80".into()];
        assert!(req.validate().is_err(), "ports without a network");

        let mut req = request(&["sh"]);
        req.volume = "/only-host".into();
        assert!(req.validate().is_err());

        let mut req = request(&["sh"]);
        req.name = Some("../escape".into());
        assert!(req.validate().is_err());
    }
}
