//! Secure root filesystem switching via `pivot_root(2)`.
//!
//! More secure than `chroot` because it actually changes the root mount
//! point rather than just the process's view of `/`.

use std::path::Path;

use corral_common::error::{CorralError, Result};

/// Name of the temporary directory holding the old root.
const OLD_ROOT: &str = ".pivot_root";

/// Makes `new_root` the root filesystem and discards the old one.
///
/// `new_root` is bind-mounted onto itself first because `pivot_root(2)`
/// requires the new root to be a mount point. The old root is moved to a
/// temporary directory inside the new one, lazily unmounted, and removed.
///
/// # Errors
///
/// Returns an error if any mount, `pivot_root(2)`, or cleanup step fails.
#[cfg(target_os = "linux")]
pub fn pivot_root(new_root: &Path) -> Result<()> {
    use nix::mount::{MntFlags, MsFlags, mount, umount2};

    let denied = |step: &str, e: nix::errno::Errno| CorralError::PermissionDenied {
        message: format!("pivot_root {step} failed: {e}"),
    };

    mount(
        Some(new_root),
        new_root,
        Some("bind"),
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| denied("self bind mount", e))?;

    let put_old = new_root.join(OLD_ROOT);
    std::fs::create_dir_all(&put_old).map_err(|e| CorralError::Io {
        path: put_old.clone(),
        source: e,
    })?;

    nix::unistd::pivot_root(new_root, &put_old).map_err(|e| denied("syscall", e))?;
    nix::unistd::chdir("/").map_err(|e| denied("chdir", e))?;

    let old_root = Path::new("/").join(OLD_ROOT);
    umount2(&old_root, MntFlags::MNT_DETACH).map_err(|e| denied("old root unmount", e))?;
    std::fs::remove_dir(&old_root).map_err(|e| CorralError::Io {
        path: old_root,
        source: e,
    })?;

    tracing::info!(new_root = %new_root.display(), "root filesystem switched");
    Ok(())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error — `pivot_root` requires Linux.
#[cfg(not(target_os = "linux"))]
pub fn pivot_root(_new_root: &Path) -> Result<()> {
    Err(CorralError::Config {
        message: "Linux required for native container operations".into(),
    })
}
