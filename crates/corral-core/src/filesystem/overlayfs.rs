//! `OverlayFS` management for container root filesystems.
//!
//! The image is the read-only lower layer; each container gets its own
//! writable upper layer, so containers from one image never see each
//! other's writes.

use std::path::{Path, PathBuf};

use corral_common::error::{CorralError, Result};

/// Configuration for an `OverlayFS` mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayConfig {
    /// Read-only lower layers (bottom to top).
    pub lower_dirs: Vec<PathBuf>,
    /// Writable upper layer directory.
    pub upper_dir: PathBuf,
    /// Work directory required by `OverlayFS`.
    pub work_dir: PathBuf,
    /// Final merged mount point.
    pub merged_dir: PathBuf,
}

impl OverlayConfig {
    /// Lays out a container overlay: `<layers>/<name>/{upper,work}` on top
    /// of `lower`, merged at `<mnt>/<name>`.
    #[must_use]
    pub fn for_container(lower: &Path, layers_dir: &Path, mnt_dir: &Path, name: &str) -> Self {
        let layer = layers_dir.join(name);
        Self {
            lower_dirs: vec![lower.to_path_buf()],
            upper_dir: layer.join("upper"),
            work_dir: layer.join("work"),
            merged_dir: mnt_dir.join(name),
        }
    }

    /// Builds the option string passed to `mount(2)`.
    ///
    /// The kernel expects the topmost lower layer first, so the
    /// bottom-to-top list is reversed.
    #[must_use]
    pub fn mount_options(&self) -> String {
        let lowers = self
            .lower_dirs
            .iter()
            .rev()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(":");
        format!(
            "lowerdir={},upperdir={},workdir={}",
            lowers,
            self.upper_dir.display(),
            self.work_dir.display()
        )
    }

    /// Creates the upper, work, and merged directories.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory cannot be created.
    pub fn create_dirs(&self) -> Result<()> {
        for dir in [&self.upper_dir, &self.work_dir, &self.merged_dir] {
            std::fs::create_dir_all(dir).map_err(|e| CorralError::Io {
                path: dir.clone(),
                source: e,
            })?;
        }
        Ok(())
    }
}

/// Mounts an `OverlayFS` with the given configuration.
///
/// # Errors
///
/// Returns an error if directory creation fails or if the mount syscall fails.
#[cfg(target_os = "linux")]
pub fn mount_overlay(config: &OverlayConfig) -> Result<()> {
    use nix::mount::{MsFlags, mount};

    config.create_dirs()?;
    let opts = config.mount_options();
    mount(
        Some("overlay"),
        &config.merged_dir,
        Some("overlay"),
        MsFlags::empty(),
        Some(opts.as_str()),
    )
    .map_err(|e| CorralError::PermissionDenied {
        message: format!("overlay mount at {} failed: {e}", config.merged_dir.display()),
    })?;

    tracing::info!(merged = %config.merged_dir.display(), "overlayfs mounted");
    Ok(())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error — `OverlayFS` mounting requires Linux.
#[cfg(not(target_os = "linux"))]
pub fn mount_overlay(_config: &OverlayConfig) -> Result<()> {
    Err(CorralError::Config {
        message: "Linux required for native container operations".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_layout() {
        let cfg = OverlayConfig::for_container(
            Path::new("/data/images/busybox"),
            Path::new("/data/overlay"),
            Path::new("/data/mnt"),
            "web",
        );
        assert_eq!(cfg.upper_dir, PathBuf::from("/data/overlay/web/upper"));
        assert_eq!(cfg.work_dir, PathBuf::from("/data/overlay/web/work"));
        assert_eq!(cfg.merged_dir, PathBuf::from("/data/mnt/web"));
        assert_eq!(
            cfg.mount_options(),
            "lowerdir=/data/images/busybox,upperdir=/data/overlay/web/upper,workdir=/data/overlay/web/work"
        );
    }

    #[test]
    fn lower_layers_listed_top_first() {
        let mut cfg = OverlayConfig::for_container(
            Path::new("/l/base"),
            Path::new("/o"),
            Path::new("/m"),
            "c",
        );
        cfg.lower_dirs.push(PathBuf::from("/l/app"));
        assert!(cfg.mount_options().starts_with("lowerdir=/l/app:/l/base,"));
    }

    #[test]
    fn create_dirs_builds_layout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = OverlayConfig::for_container(
            &dir.path().join("lower"),
            &dir.path().join("overlay"),
            &dir.path().join("mnt"),
            "c1",
        );
        cfg.create_dirs().expect("create dirs");
        assert!(cfg.upper_dir.is_dir());
        assert!(cfg.work_dir.is_dir());
        assert!(cfg.merged_dir.is_dir());
    }
}
