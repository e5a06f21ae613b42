//! Container process creation.
//!
//! [`NamespaceProcessFactory`] prepares a `clone(2)` of the current
//! executable running the `init` subcommand inside fresh namespaces. A
//! prepared process has not run anything: [`ContainerProcess::start`]
//! performs the clone, and the child only sets up descriptors before
//! `execve`, so no allocation happens between the two.

use std::ffi::{CString, OsString};
use std::fs::File;
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::ffi::OsStringExt;
use std::path::PathBuf;

use nix::sched::CloneFlags;
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::Pid;

use corral_common::config::CorralConfig;
use corral_common::constants::HANDOFF_FD;
use corral_common::error::{CorralError, Result};
use corral_core::namespace::NamespaceConfig;

use crate::handoff::{self, HandoffWriter};
use crate::workspace::{CommittedImage, Workspace};

const STACK_SIZE: usize = 1024 * 1024;

/// Exit status used by the cloned child when setup before `execve` fails.
const SETUP_FAILED: i32 = 126;
/// Exit status used by the cloned child when `execve` itself fails.
const EXEC_FAILED: i32 = 127;

/// Parameters of a container process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessRequest {
    /// Inherit the caller's terminal instead of logging to a file.
    pub interactive: bool,
    /// `HOST:CONTAINER` bind specification, empty for none.
    pub volume: String,
    /// Container name.
    pub name: String,
    /// Image providing the root filesystem.
    pub image: String,
    /// Extra `KEY=VALUE` environment entries.
    pub env: Vec<String>,
}

/// A created, not yet started, container process.
pub trait ContainerProcess: Send {
    /// Starts the process and returns its host pid.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be started.
    fn start(&mut self) -> Result<u32>;

    /// Blocks until the process exits and returns its exit code.
    ///
    /// # Errors
    ///
    /// Returns an error if the process was not started or cannot be reaped.
    fn wait(&mut self) -> Result<i32>;
}

/// Creates container processes together with their workspace.
pub trait ProcessFactory: Send + Sync {
    /// Prepares the workspace and a process that will run container-init.
    /// The returned writer is the orchestrator's end of the handoff pipe.
    ///
    /// # Errors
    ///
    /// Returns an error if the workspace or the pipe cannot be set up.
    fn create(&self, request: &ProcessRequest)
    -> Result<(Box<dyn ContainerProcess>, HandoffWriter)>;

    /// Tears down the workspace of `name`. Failures are logged.
    fn remove_workspace(&self, name: &str, volume: &str);

    /// Packages the root filesystem of `name` as image `image`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the container has no root filesystem.
    fn commit(&self, name: &str, image: &str) -> Result<CommittedImage>;
}

/// Factory cloning the current executable into new namespaces.
#[derive(Debug, Clone)]
pub struct NamespaceProcessFactory {
    config: CorralConfig,
    workspace: Workspace,
    namespaces: NamespaceConfig,
}

impl NamespaceProcessFactory {
    /// Creates a factory for `config`.
    #[must_use]
    pub fn new(config: &CorralConfig) -> Self {
        Self {
            config: config.clone(),
            workspace: Workspace::new(config),
            namespaces: NamespaceConfig::default(),
        }
    }

    fn prepare(&self, request: &ProcessRequest, workdir: PathBuf) -> Result<NamespaceProcess> {
        let exe = std::env::current_exe().map_err(|e| CorralError::Io {
            path: PathBuf::from("/proc/self/exe"),
            source: e,
        })?;
        let stdio = if request.interactive {
            None
        } else {
            Some(self.log_stdio(&request.name)?)
        };
        Ok(NamespaceProcess {
            name: request.name.clone(),
            exe: to_cstring(exe.into_os_string())?,
            args: vec![to_cstring(exe_arg0())?, to_cstring("init".into())?],
            env: container_env(std::env::vars_os(), &request.env)?,
            workdir: to_cstring(workdir.into_os_string())?,
            handoff: None,
            stdio,
            flags: self.namespaces.clone_flags(),
            pid: None,
        })
    }

    fn log_stdio(&self, name: &str) -> Result<LogStdio> {
        let dir = self.config.container_dir(name);
        std::fs::create_dir_all(&dir).map_err(|e| CorralError::Io {
            path: dir.clone(),
            source: e,
        })?;
        let path = self.config.log_path(name);
        let log = File::options()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| CorralError::Io {
                path: path.clone(),
                source: e,
            })?;
        let null = File::open("/dev/null").map_err(|e| CorralError::Io {
            path: PathBuf::from("/dev/null"),
            source: e,
        })?;
        Ok(LogStdio {
            log: log.into(),
            null: null.into(),
        })
    }
}

impl ProcessFactory for NamespaceProcessFactory {
    fn create(
        &self,
        request: &ProcessRequest,
    ) -> Result<(Box<dyn ContainerProcess>, HandoffWriter)> {
        let workdir = self
            .workspace
            .create(&request.name, &request.image, &request.volume)?;
        let prepared = self.prepare(request, workdir).and_then(|mut process| {
            let (reader, writer) = handoff::channel()?;
            process.handoff = Some(reader.into());
            Ok((process, writer))
        });
        match prepared {
            Ok((process, writer)) => {
                tracing::debug!(
                    name = %request.name,
                    interactive = request.interactive,
                    "container process prepared"
                );
                let process: Box<dyn ContainerProcess> = Box::new(process);
                Ok((process, writer))
            }
            Err(e) => {
                self.workspace.remove(&request.name, &request.volume);
                Err(e)
            }
        }
    }

    fn remove_workspace(&self, name: &str, volume: &str) {
        self.workspace.remove(name, volume);
    }

    fn commit(&self, name: &str, image: &str) -> Result<CommittedImage> {
        self.workspace.commit(name, image)
    }
}

#[derive(Debug)]
struct LogStdio {
    log: OwnedFd,
    null: OwnedFd,
}

/// A container-init process prepared by [`NamespaceProcessFactory`].
#[derive(Debug)]
pub struct NamespaceProcess {
    name: String,
    exe: CString,
    args: Vec<CString>,
    env: Vec<CString>,
    workdir: CString,
    handoff: Option<OwnedFd>,
    stdio: Option<LogStdio>,
    flags: CloneFlags,
    pid: Option<Pid>,
}

impl ContainerProcess for NamespaceProcess {
    fn start(&mut self) -> Result<u32> {
        if self.pid.is_some() {
            return Err(CorralError::usage("container process already started"));
        }
        let handoff_fd = self
            .handoff
            .as_ref()
            .map(AsRawFd::as_raw_fd)
            .ok_or_else(|| CorralError::usage("handoff pipe missing"))?;
        let stdio = self
            .stdio
            .as_ref()
            .map(|s| (s.null.as_raw_fd(), s.log.as_raw_fd()));

        let argv = null_terminated(&self.args);
        let envp = null_terminated(&self.env);
        let exe = self.exe.as_ptr();
        let workdir = self.workdir.as_ptr();

        let child = Box::new(move || -> isize {
            // SAFETY: the child owns a private copy of the parent's memory
            // (no CLONE_VM); every pointer below refers to data prepared
            // before the clone, and only async-signal-safe calls are made.
            unsafe {
                if libc::chdir(workdir) == -1 {
                    libc::_exit(SETUP_FAILED);
                }
                if let Some((null, log)) = stdio {
                    if libc::dup2(null, 0) == -1
                        || libc::dup2(log, 1) == -1
                        || libc::dup2(log, 2) == -1
                    {
                        libc::_exit(SETUP_FAILED);
                    }
                }
                let placed = if handoff_fd == HANDOFF_FD {
                    libc::fcntl(HANDOFF_FD, libc::F_SETFD, 0)
                } else {
                    libc::dup2(handoff_fd, HANDOFF_FD)
                };
                if placed == -1 {
                    libc::_exit(SETUP_FAILED);
                }
                let _ = libc::execve(exe, argv.as_ptr(), envp.as_ptr());
                libc::_exit(EXEC_FAILED)
            }
        });

        let mut stack = vec![0u8; STACK_SIZE];
        // SAFETY: the callback only performs descriptor setup and `execve`
        // in the child, and the stack outlives the call.
        let pid = unsafe { nix::sched::clone(child, &mut stack, self.flags, Some(libc::SIGCHLD)) }
            .map_err(|e| CorralError::PermissionDenied {
                message: format!("clone of container-init failed: {e}"),
            })?;

        // The child holds its own copies now; dropping ours lets a dead
        // reader surface as a broken pipe on the orchestrator side.
        self.handoff = None;
        self.stdio = None;
        self.pid = Some(pid);
        let raw = pid.as_raw().unsigned_abs();
        tracing::info!(name = %self.name, pid = raw, "container-init started");
        Ok(raw)
    }

    fn wait(&mut self) -> Result<i32> {
        let pid = self
            .pid
            .ok_or_else(|| CorralError::usage("container process was never started"))?;
        loop {
            let status = waitpid(pid, None).map_err(|e| CorralError::SignalFailure {
                pid: pid.as_raw().unsigned_abs(),
                message: format!("waitpid failed: {e}"),
            })?;
            if let Some(code) = exit_code(status) {
                tracing::info!(name = %self.name, pid = pid.as_raw(), code, "container exited");
                return Ok(code);
            }
        }
    }
}

/// Maps a terminal wait status to a shell-style exit code.
fn exit_code(status: WaitStatus) -> Option<i32> {
    match status {
        WaitStatus::Exited(_, code) => Some(code),
        WaitStatus::Signaled(_, signal, _) => Some(128 + signal as i32),
        _ => None,
    }
}

/// The caller's environment followed by the user's `KEY=VALUE` entries.
fn container_env(
    inherited: impl IntoIterator<Item = (OsString, OsString)>,
    extra: &[String],
) -> Result<Vec<CString>> {
    let mut env = Vec::new();
    for (key, value) in inherited {
        let mut entry = key.into_vec();
        entry.push(b'=');
        entry.extend(value.into_vec());
        env.push(to_cstring(OsString::from_vec(entry))?);
    }
    for entry in extra {
        env.push(to_cstring(entry.into())?);
    }
    Ok(env)
}

fn exe_arg0() -> OsString {
    std::env::args_os()
        .next()
        .unwrap_or_else(|| corral_common::constants::APP_NAME.into())
}

fn to_cstring(value: OsString) -> Result<CString> {
    CString::new(value.into_vec())
        .map_err(|e| CorralError::usage(format!("argument contains a NUL byte: {e}")))
}

fn null_terminated(values: &[CString]) -> Vec<*const libc::c_char> {
    values
        .iter()
        .map(|v| v.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect()
}

#[cfg(test)]
mod tests {
    use nix::sys::signal::Signal;

    use super::*;

    #[test]
    fn user_entries_follow_inherited_environment() {
        let inherited = vec![(OsString::from("PATH"), OsString::from("/bin"))];
        let env = container_env(inherited, &["FOO=bar".to_string()]).expect("env");
        let env: Vec<_> = env.iter().map(|c| c.to_str().expect("utf8")).collect();
        assert_eq!(env, vec!["PATH=/bin", "FOO=bar"]);
    }

    #[test]
    fn nul_bytes_are_rejected() {
        let err = container_env(Vec::new(), &["A=\0".to_string()]).expect_err("nul");
        assert!(matches!(err, CorralError::Usage { .. }));
    }

    #[test]
    fn wait_status_maps_to_exit_code() {
        let pid = Pid::from_raw(10);
        assert_eq!(exit_code(WaitStatus::Exited(pid, 3)), Some(3));
        assert_eq!(
            exit_code(WaitStatus::Signaled(pid, Signal::SIGKILL, false)),
            Some(137)
        );
        assert_eq!(exit_code(WaitStatus::StillAlive), None);
    }

    #[test]
    fn argv_is_null_terminated() {
        let args = vec![CString::new("corral").expect("c"), CString::new("init").expect("c")];
        let argv = null_terminated(&args);
        assert_eq!(argv.len(), 3);
        assert!(argv[2].is_null());
    }

    #[test]
    fn wait_before_start_is_refused() {
        let mut process = NamespaceProcess {
            name: "web".into(),
            exe: CString::new("/bin/true").expect("c"),
            args: Vec::new(),
            env: Vec::new(),
            workdir: CString::new("/").expect("c"),
            handoff: None,
            stdio: None,
            flags: CloneFlags::empty(),
            pid: None,
        };
        assert!(process.wait().is_err());
        assert!(process.start().is_err(), "no handoff pipe");
    }
}
