//! Mount utilities for container filesystem setup.
//!
//! Covers the bind mounts used for volumes, the mounts container-init
//! needs inside its new mount namespace, and detaching mounts on teardown.

use std::path::Path;

use corral_common::error::{CorralError, Result};

/// Stops mount events from propagating between the container and the host.
///
/// Must run inside the new mount namespace before any other mount.
///
/// # Errors
///
/// Returns an error if remounting `/` fails.
#[cfg(target_os = "linux")]
pub fn make_root_private() -> Result<()> {
    use nix::mount::{MsFlags, mount};

    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_PRIVATE | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| CorralError::PermissionDenied {
        message: format!("making / private failed: {e}"),
    })?;
    tracing::debug!("mount propagation set to private");
    Ok(())
}

/// Mounts `/proc` and a tmpfs `/dev` inside the current root.
///
/// # Errors
///
/// Returns an error if either mount fails.
#[cfg(target_os = "linux")]
pub fn mount_essential_filesystems() -> Result<()> {
    use nix::mount::{MsFlags, mount};

    let proc_flags = MsFlags::MS_NOEXEC | MsFlags::MS_NOSUID | MsFlags::MS_NODEV;
    ensure_dir(Path::new("/proc"))?;
    mount(Some("proc"), "/proc", Some("proc"), proc_flags, None::<&str>).map_err(|e| {
        CorralError::PermissionDenied {
            message: format!("mounting /proc failed: {e}"),
        }
    })?;

    ensure_dir(Path::new("/dev"))?;
    mount(
        Some("tmpfs"),
        "/dev",
        Some("tmpfs"),
        MsFlags::MS_NOSUID | MsFlags::MS_STRICTATIME,
        Some("mode=755"),
    )
    .map_err(|e| CorralError::PermissionDenied {
        message: format!("mounting /dev failed: {e}"),
    })?;

    tracing::debug!("essential filesystems mounted");
    Ok(())
}

/// Creates a bind mount from source to target.
///
/// # Errors
///
/// Returns an error if the `mount(2)` syscall fails.
#[cfg(target_os = "linux")]
pub fn bind_mount(source: &Path, target: &Path, readonly: bool) -> Result<()> {
    use nix::mount::{MsFlags, mount};

    let map_err = |e| CorralError::PermissionDenied {
        message: format!(
            "bind mount {} -> {} failed: {e}",
            source.display(),
            target.display()
        ),
    };
    mount(
        Some(source),
        target,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(map_err)?;

    if readonly {
        mount(
            None::<&str>,
            target,
            None::<&str>,
            MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
            None::<&str>,
        )
        .map_err(map_err)?;
    }
    tracing::debug!(
        source = %source.display(),
        target = %target.display(),
        readonly,
        "bind mount created"
    );
    Ok(())
}

/// Lazily detaches the mount at `target`.
///
/// A target that is not a mount point (`EINVAL`) or does not exist
/// (`ENOENT`) counts as already unmounted.
///
/// # Errors
///
/// Returns an error for any other `umount2(2)` failure.
#[cfg(target_os = "linux")]
pub fn unmount(target: &Path) -> Result<()> {
    use nix::errno::Errno;
    use nix::mount::{MntFlags, umount2};

    match umount2(target, MntFlags::MNT_DETACH) {
        Ok(()) => {
            tracing::debug!(path = %target.display(), "unmounted");
            Ok(())
        }
        Err(Errno::EINVAL | Errno::ENOENT) => Ok(()),
        Err(e) => Err(CorralError::PermissionDenied {
            message: format!("unmount {} failed: {e}", target.display()),
        }),
    }
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error — mount namespaces require Linux.
#[cfg(not(target_os = "linux"))]
pub fn make_root_private() -> Result<()> {
    Err(linux_required())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error — mount namespaces require Linux.
#[cfg(not(target_os = "linux"))]
pub fn mount_essential_filesystems() -> Result<()> {
    Err(linux_required())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error — bind mounts require Linux.
#[cfg(not(target_os = "linux"))]
pub fn bind_mount(_source: &Path, _target: &Path, _readonly: bool) -> Result<()> {
    Err(linux_required())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error — unmounting requires Linux.
#[cfg(not(target_os = "linux"))]
pub fn unmount(_target: &Path) -> Result<()> {
    Err(linux_required())
}

#[cfg(not(target_os = "linux"))]
fn linux_required() -> CorralError {
    CorralError::Config {
        message: "Linux required for native container operations".into(),
    }
}

fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| CorralError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(target_os = "linux")]
    #[test]
    fn unmount_of_plain_directory_is_noop() {
        let dir = tempfile::tempdir().expect("tempdir");
        // EINVAL (not a mount point) or EPERM for unprivileged callers.
        match unmount(dir.path()) {
            Ok(()) | Err(CorralError::PermissionDenied { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn unmount_of_missing_path_is_noop() {
        let dir = tempfile::tempdir().expect("tempdir");
        match unmount(&dir.path().join("missing")) {
            Ok(()) | Err(CorralError::PermissionDenied { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
}
