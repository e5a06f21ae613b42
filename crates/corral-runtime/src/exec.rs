//! Running commands inside a live container.
//!
//! Exec happens in two phases. [`resolve_target`] finds the pid of a
//! running container. [`enter_namespaces_and_exec`] joins its namespaces
//! and runs the command. Joining a mount namespace requires a
//! single-threaded caller, so the CLI runs phase two in a fresh copy of
//! itself selected by the [`ENV_EXEC_PID`] marker.

use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{Command, ExitStatus};

use corral_common::constants::{ENV_EXEC_CMD, ENV_EXEC_PID};
use corral_common::error::{CorralError, Result};
use corral_core::namespace::join::join_namespaces;
use corral_core::process::read_environ;

use crate::engine::Engine;

/// A running container selected for exec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecTarget {
    /// Host pid of the container's init process.
    pub pid: u32,
}

/// Phase one: finds the pid of running container `name`.
///
/// # Errors
///
/// Returns `NotFound` unless the container exists and is running.
pub fn resolve_target(engine: &Engine, name: &str) -> Result<ExecTarget> {
    let info = engine.inspect(name)?;
    let pid = info
        .running_pid()
        .ok_or_else(|| CorralError::container_not_found(name))?;
    tracing::debug!(name, pid, "exec target resolved");
    Ok(ExecTarget { pid })
}

/// Re-invokes the current executable with the exec markers set and waits
/// for it. Returns the command's exit code.
///
/// # Errors
///
/// Returns an error if the command is empty or the re-invocation cannot
/// be spawned.
pub fn spawn_reentry(target: ExecTarget, command: &[String]) -> Result<i32> {
    if command.is_empty() {
        return Err(CorralError::usage("missing exec command"));
    }
    let exe = std::env::current_exe().map_err(|e| CorralError::Io {
        path: PathBuf::from("/proc/self/exe"),
        source: e,
    })?;
    let status = Command::new(&exe)
        .env(ENV_EXEC_PID, target.pid.to_string())
        .env(ENV_EXEC_CMD, serde_json::to_string(command)?)
        .status()
        .map_err(|e| CorralError::Io { path: exe, source: e })?;
    Ok(exit_code(status))
}

/// The parsed exec markers of a re-entrant invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecReentry {
    /// Pid whose namespaces are joined.
    pub pid: u32,
    /// Command to run inside them.
    pub command: Vec<String>,
}

impl ExecReentry {
    /// Reads the markers from the process environment.
    ///
    /// # Errors
    ///
    /// Returns a usage error if the markers are present but malformed.
    pub fn from_env() -> Result<Option<Self>> {
        Self::from_vars(
            std::env::var(ENV_EXEC_PID).ok(),
            std::env::var(ENV_EXEC_CMD).ok(),
        )
    }

    /// Parses marker values. An absent or empty pid marker means this is
    /// not a re-entrant invocation.
    ///
    /// # Errors
    ///
    /// Returns a usage error if the pid or the command is malformed.
    pub fn from_vars(pid: Option<String>, command: Option<String>) -> Result<Option<Self>> {
        let Some(pid) = pid.filter(|p| !p.is_empty()) else {
            return Ok(None);
        };
        let pid = pid
            .parse()
            .map_err(|_| CorralError::usage(format!("invalid {ENV_EXEC_PID}: {pid:?}")))?;
        let command: Vec<String> = serde_json::from_str(command.as_deref().unwrap_or("[]"))
            .map_err(|e| CorralError::usage(format!("invalid {ENV_EXEC_CMD}: {e}")))?;
        if command.is_empty() {
            return Err(CorralError::usage("missing exec command"));
        }
        Ok(Some(Self { pid, command }))
    }

    /// Runs phase two.
    ///
    /// # Errors
    ///
    /// See [`enter_namespaces_and_exec`].
    pub fn run(self) -> Result<i32> {
        enter_namespaces_and_exec(self.pid, &self.command)
    }
}

/// Phase two: joins the namespaces of `pid` and runs `command` there with
/// the container's environment. Returns the command's exit code.
///
/// # Errors
///
/// Returns an error if the namespaces cannot be joined or the command
/// cannot be spawned.
pub fn enter_namespaces_and_exec(pid: u32, command: &[String]) -> Result<i32> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| CorralError::usage("missing exec command"))?;
    // Read before joining: the container's /proc numbers pids differently.
    let environ = read_environ(pid)?;
    join_namespaces(pid)?;

    let status = Command::new(program)
        .args(args)
        .env_clear()
        .envs(environ.iter().filter_map(|entry| entry.split_once('=')))
        .status()
        .map_err(|e| CorralError::Io {
            path: PathBuf::from(program),
            source: e,
        })?;
    Ok(exit_code(status))
}

fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_or_empty_marker_is_first_pass() {
        assert_eq!(ExecReentry::from_vars(None, None).expect("parse"), None);
        assert_eq!(
            ExecReentry::from_vars(Some(String::new()), Some("[\"sh\"]".into())).expect("parse"),
            None
        );
    }

    #[test]
    fn markers_carry_pid_and_tokens_with_spaces() {
        let reentry = ExecReentry::from_vars(
            Some("4242".into()),
            Some(r#"["sh","-c","echo hello world"]"#.into()),
        )
        .expect("parse")
        .expect("present");
        assert_eq!(reentry.pid, 4242);
        assert_eq!(reentry.command, vec!["sh", "-c", "echo hello world"]);
    }

    #[test]
    fn malformed_markers_are_usage_errors() {
        for (pid, cmd) in [("abc", r#"["sh"]"#), ("42", "not json"), ("42", "[]")] {
            let err = ExecReentry::from_vars(Some(pid.into()), Some(cmd.into()))
                .expect_err("malformed");
            assert!(matches!(err, CorralError::Usage { .. }), "{pid} {cmd}");
        }
    }

    #[test]
    fn exit_codes_follow_shell_conventions() {
        assert_eq!(exit_code(ExitStatus::from_raw(0)), 0);
        assert_eq!(exit_code(ExitStatus::from_raw(3 << 8)), 3);
        assert_eq!(exit_code(ExitStatus::from_raw(9)), 137);
    }

    #[test]
    fn empty_command_is_rejected_before_joining() {
        let err = enter_namespaces_and_exec(std::process::id(), &[]).expect_err("empty");
        assert!(matches!(err, CorralError::Usage { .. }));
    }
}
