//! Joining the namespaces of a running process.

use corral_common::error::{CorralError, Result};

/// Namespaces joined by `exec`, in join order. Mount goes last because it
/// changes what `/proc` resolves to.
#[cfg(target_os = "linux")]
const JOIN_ORDER: [(&str, nix::sched::CloneFlags); 5] = [
    ("ipc", nix::sched::CloneFlags::CLONE_NEWIPC),
    ("uts", nix::sched::CloneFlags::CLONE_NEWUTS),
    ("net", nix::sched::CloneFlags::CLONE_NEWNET),
    ("pid", nix::sched::CloneFlags::CLONE_NEWPID),
    ("mnt", nix::sched::CloneFlags::CLONE_NEWNS),
];

/// Moves the calling process into the namespaces of `pid`.
///
/// All namespace files are opened before the first `setns(2)`. Joining the
/// PID namespace only affects children created afterwards, so callers
/// must spawn the payload as a child. `setns(CLONE_NEWNS)` fails in a
/// multi-threaded process.
///
/// # Errors
///
/// Returns an error if a namespace file cannot be opened or `setns(2)`
/// is refused.
#[cfg(target_os = "linux")]
pub fn join_namespaces(pid: u32) -> Result<()> {
    use nix::sched::setns;

    let mut handles = Vec::with_capacity(JOIN_ORDER.len());
    for (kind, flag) in JOIN_ORDER {
        let path = std::path::PathBuf::from(format!("/proc/{pid}/ns/{kind}"));
        let file = std::fs::File::open(&path).map_err(|e| CorralError::Io { path, source: e })?;
        handles.push((kind, flag, file));
    }

    for (kind, flag, file) in &handles {
        setns(file, *flag).map_err(|e| CorralError::PermissionDenied {
            message: format!("setns {kind} for pid {pid} failed: {e}"),
        })?;
        tracing::debug!(pid, kind, "joined namespace");
    }
    Ok(())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error — namespace joining requires Linux.
#[cfg(not(target_os = "linux"))]
pub fn join_namespaces(_pid: u32) -> Result<()> {
    Err(CorralError::Config {
        message: "Linux required for native container operations".into(),
    })
}
