//! Container root filesystems.
//!
//! An image is a tar archive under `<root>/images/`, unpacked once into a
//! directory of the same name that serves as the read-only lower layer.
//! Each container gets an overlay on top of it, merged at
//! `<root>/mnt/<name>`, plus an optional host volume bind-mounted inside.

use std::fs::File;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use corral_common::config::CorralConfig;
use corral_common::error::{CorralError, Result};
use corral_common::types::Sha256Hash;
use corral_core::filesystem::{mount, overlayfs};

/// A `HOST:CONTAINER` bind specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSpec {
    /// Directory on the host.
    pub host: PathBuf,
    /// Absolute path inside the container.
    pub container: PathBuf,
}

impl VolumeSpec {
    /// Parses a volume specification. An empty string means no volume.
    ///
    /// # Errors
    ///
    /// Returns a usage error unless the input has exactly two non-empty
    /// parts separated by `:`.
    pub fn parse(spec: &str) -> Result<Option<Self>> {
        if spec.is_empty() {
            return Ok(None);
        }
        let parts: Vec<&str> = spec.split(':').collect();
        match parts.as_slice() {
            [host, container] if !host.is_empty() && !container.is_empty() => Ok(Some(Self {
                host: PathBuf::from(host),
                container: PathBuf::from(container),
            })),
            _ => Err(CorralError::usage(format!("invalid volume specification: {spec:?}"))),
        }
    }

    /// Mount point of the volume below `merged`.
    #[must_use]
    pub fn target_in(&self, merged: &Path) -> PathBuf {
        merged.join(self.container.strip_prefix("/").unwrap_or(&self.container))
    }
}

/// An image produced by `commit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedImage {
    /// Image name.
    pub name: String,
    /// Archive written for the image.
    pub path: PathBuf,
    /// Digest of the archive.
    pub digest: Sha256Hash,
}

/// Lays out and tears down container root filesystems.
#[derive(Debug, Clone)]
pub struct Workspace {
    images_dir: PathBuf,
    overlay_dir: PathBuf,
    mnt_dir: PathBuf,
}

impl Workspace {
    /// Creates a workspace manager for `config`'s directories.
    #[must_use]
    pub fn new(config: &CorralConfig) -> Self {
        Self {
            images_dir: config.images_dir(),
            overlay_dir: config.overlay_dir(),
            mnt_dir: config.mnt_dir(),
        }
    }

    /// Merged root of container `name`.
    #[must_use]
    pub fn merged_dir(&self, name: &str) -> PathBuf {
        self.mnt_dir.join(name)
    }

    /// Returns the unpacked lower layer of `image`, unpacking it on first use.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if neither `<image>.tar` nor `<image>.tar.gz` exists.
    pub fn ensure_image(&self, image: &str) -> Result<PathBuf> {
        if image.is_empty() || image.contains('/') {
            return Err(CorralError::usage(format!("invalid image name: {image:?}")));
        }
        let lower = self.images_dir.join(image);
        if lower.is_dir() {
            return Ok(lower);
        }
        let archive = [format!("{image}.tar"), format!("{image}.tar.gz")]
            .into_iter()
            .map(|file| self.images_dir.join(file))
            .find(|path| path.is_file())
            .ok_or_else(|| CorralError::NotFound {
                kind: "image",
                id: image.to_owned(),
            })?;

        let staging = self.images_dir.join(format!(".{image}.unpack"));
        remove_tree(&staging)?;
        extract_archive(&archive, &staging)?;
        std::fs::rename(&staging, &lower).map_err(|e| io_error(&lower, e))?;
        Ok(lower)
    }

    /// Builds the root filesystem of container `name` and returns the
    /// merged directory.
    ///
    /// # Errors
    ///
    /// Returns a usage error for a malformed volume (before any mount), or
    /// the mount error. A failed volume mount unwinds the overlay.
    pub fn create(&self, name: &str, image: &str, volume: &str) -> Result<PathBuf> {
        let volume = VolumeSpec::parse(volume)?;
        let lower = self.ensure_image(image)?;
        let overlay = overlayfs::OverlayConfig::for_container(
            &lower,
            &self.overlay_dir,
            &self.mnt_dir,
            name,
        );
        overlayfs::mount_overlay(&overlay)?;

        if let Some(volume) = volume {
            if let Err(e) = mount_volume(&volume, &overlay.merged_dir) {
                self.remove(name, "");
                return Err(e);
            }
        }
        tracing::info!(name, image, merged = %overlay.merged_dir.display(), "workspace ready");
        Ok(overlay.merged_dir)
    }

    /// Unmounts and deletes the workspace of `name`. Failures are logged.
    pub fn remove(&self, name: &str, volume: &str) {
        let merged = self.merged_dir(name);
        if let Ok(Some(volume)) = VolumeSpec::parse(volume) {
            if let Err(e) = mount::unmount(&volume.target_in(&merged)) {
                tracing::warn!(name, error = %e, "volume unmount failed");
            }
        }
        if let Err(e) = mount::unmount(&merged) {
            tracing::warn!(name, error = %e, "overlay unmount failed");
        }
        for dir in [merged, self.overlay_dir.join(name)] {
            if let Err(e) = remove_tree(&dir) {
                tracing::warn!(name, error = %e, "workspace cleanup failed");
            }
        }
        tracing::debug!(name, "workspace removed");
    }

    /// Archives the merged root of `name` as `<images>/<image>.tar.gz`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the container has no root filesystem, or an
    /// I/O error if archiving fails.
    pub fn commit(&self, name: &str, image: &str) -> Result<CommittedImage> {
        if image.is_empty() || image.contains('/') {
            return Err(CorralError::usage(format!("invalid image name: {image:?}")));
        }
        let merged = self.merged_dir(name);
        if !merged.is_dir() {
            return Err(CorralError::container_not_found(name));
        }
        std::fs::create_dir_all(&self.images_dir).map_err(|e| io_error(&self.images_dir, e))?;

        let path = self.images_dir.join(format!("{image}.tar.gz"));
        let staging = self.images_dir.join(format!(".{image}.tar.gz.tmp"));
        write_archive(&merged, &staging)?;
        std::fs::rename(&staging, &path).map_err(|e| io_error(&path, e))?;

        let digest = hash_file(&path)?;
        tracing::info!(name, image, digest = %digest, "container committed");
        Ok(CommittedImage {
            name: image.to_owned(),
            path,
            digest,
        })
    }
}

fn mount_volume(volume: &VolumeSpec, merged: &Path) -> Result<()> {
    let target = volume.target_in(merged);
    for dir in [&volume.host, &target] {
        std::fs::create_dir_all(dir).map_err(|e| io_error(dir, e))?;
    }
    mount::bind_mount(&volume.host, &target, false)
}

/// Unpacks a plain or gzip-compressed tar archive into `target`.
///
/// # Errors
///
/// Returns an I/O error if the archive cannot be read or unpacked.
pub fn extract_archive(archive: &Path, target: &Path) -> Result<()> {
    tracing::info!(archive = %archive.display(), target = %target.display(), "unpacking image");
    std::fs::create_dir_all(target).map_err(|e| io_error(target, e))?;
    let file = File::open(archive).map_err(|e| io_error(archive, e))?;

    let gzip = archive
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz") || ext.eq_ignore_ascii_case("tgz"));
    let unpacked = if gzip {
        tar::Archive::new(flate2::read::GzDecoder::new(file)).unpack(target)
    } else {
        tar::Archive::new(file).unpack(target)
    };
    unpacked.map_err(|e| io_error(target, e))
}

fn write_archive(source: &Path, dest: &Path) -> Result<()> {
    let file = File::create(dest).map_err(|e| io_error(dest, e))?;
    let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);
    builder
        .append_dir_all(".", source)
        .map_err(|e| io_error(source, e))?;
    let encoder = builder.into_inner().map_err(|e| io_error(dest, e))?;
    let _ = encoder.finish().map_err(|e| io_error(dest, e))?;
    Ok(())
}

/// Computes the SHA-256 digest of a file.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be read.
pub fn hash_file(path: &Path) -> Result<Sha256Hash> {
    let mut file = File::open(path).map_err(|e| io_error(path, e))?;
    let mut hasher = Sha256::new();
    let _ = std::io::copy(&mut file, &mut hasher).map_err(|e| io_error(path, e))?;
    Sha256Hash::from_hex(format!("{:x}", hasher.finalize()))
}

fn remove_tree(dir: &Path) -> Result<()> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_error(dir, e)),
    }
}

fn io_error(path: &Path, source: std::io::Error) -> CorralError {
    CorralError::Io {
        path: path.to_path_buf(),
        source,
    }
}
