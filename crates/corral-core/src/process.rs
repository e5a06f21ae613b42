//! Process probing and signal delivery for container processes.
//!
//! Container processes are usually not children of the caller (`stop`
//! runs in a fresh CLI invocation), so exit is observed by polling
//! rather than `waitpid(2)`.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

use corral_common::error::{CorralError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Converts a pid to the signed representation used by the kernel.
///
/// # Errors
///
/// Returns a signal failure if the value does not fit a `pid_t`.
pub fn to_pid(pid: u32) -> Result<Pid> {
    i32::try_from(pid)
        .ok()
        .filter(|&raw| raw > 0)
        .map(Pid::from_raw)
        .ok_or_else(|| CorralError::SignalFailure {
            pid,
            message: "pid out of range".into(),
        })
}

/// Returns `true` if `pid` exists and is not a zombie.
#[must_use]
pub fn is_alive(pid: u32) -> bool {
    let Ok(target) = to_pid(pid) else {
        return false;
    };
    match kill(target, None) {
        Ok(()) | Err(Errno::EPERM) => !is_zombie(pid),
        Err(_) => false,
    }
}

/// Reads the state letter from `/proc/<pid>/stat`.
fn is_zombie(pid: u32) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return false;
    };
    // The command name may contain spaces and parentheses; the state
    // follows the last closing parenthesis.
    stat.rfind(')')
        .and_then(|idx| stat[idx + 1..].split_whitespace().next())
        .is_some_and(|state| state == "Z" || state == "X")
}

/// Sends `signal` to `pid`. A process that is already gone is not an error.
///
/// # Errors
///
/// Returns a signal failure if the kernel refuses delivery.
pub fn send_signal(pid: u32, signal: Signal) -> Result<()> {
    match kill(to_pid(pid)?, signal) {
        Ok(()) | Err(Errno::ESRCH) => {
            tracing::debug!(pid, signal = %signal, "signal sent");
            Ok(())
        }
        Err(e) => Err(CorralError::SignalFailure {
            pid,
            message: format!("{signal}: {e}"),
        }),
    }
}

/// Polls until `pid` is gone or `timeout` elapses; returns whether it exited.
#[must_use]
pub fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if !is_alive(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Stops `pid` with SIGTERM, escalating to SIGKILL after `grace`.
///
/// # Errors
///
/// Returns a signal failure if a signal cannot be delivered or the
/// process survives SIGKILL.
pub fn terminate(pid: u32, grace: Duration) -> Result<()> {
    send_signal(pid, Signal::SIGTERM)?;
    if wait_for_exit(pid, grace) {
        tracing::info!(pid, "process exited after SIGTERM");
        return Ok(());
    }

    send_signal(pid, Signal::SIGKILL)?;
    tracing::info!(pid, "sent SIGKILL");
    if wait_for_exit(pid, Duration::from_secs(1)) {
        Ok(())
    } else {
        Err(CorralError::SignalFailure {
            pid,
            message: "process still alive after SIGKILL".into(),
        })
    }
}

/// Returns the environment of `pid` as `KEY=VALUE` entries.
///
/// # Errors
///
/// Returns an error if `/proc/<pid>/environ` cannot be read.
pub fn read_environ(pid: u32) -> Result<Vec<String>> {
    let path = PathBuf::from(format!("/proc/{pid}/environ"));
    let raw = std::fs::read(&path).map_err(|e| CorralError::Io { path, source: e })?;
    Ok(raw
        .split(|&b| b == 0)
        .filter(|entry| !entry.is_empty())
        .map(|entry| String::from_utf8_lossy(entry).into_owned())
        .collect())
}
