//! Global configuration model for the corral runtime.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{CorralError, Result};

/// Root configuration for the corral runtime.
///
/// Every on-disk location is derived from `root_dir`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorralConfig {
    /// Base directory for corral state and data.
    pub root_dir: PathBuf,
    /// Directory under which per-container cgroup scopes are created.
    pub cgroup_root: PathBuf,
    /// Grace period in seconds between SIGTERM and SIGKILL.
    pub stop_timeout_secs: u64,
}

impl Default for CorralConfig {
    fn default() -> Self {
        Self::with_root(constants::default_root_dir())
    }
}

impl CorralConfig {
    /// Creates a configuration rooted at `root_dir` with default settings.
    #[must_use]
    pub fn with_root(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            cgroup_root: PathBuf::from(constants::CGROUP_V2_PATH).join(constants::CGROUP_PARENT),
            stop_timeout_secs: constants::DEFAULT_STOP_TIMEOUT_SECS,
        }
    }

    /// Loads the configuration for `root_dir`.
    ///
    /// If `<root_dir>/config.json` exists its values override the defaults;
    /// `root_dir` itself always comes from the argument.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(root_dir: impl Into<PathBuf>) -> Result<Self> {
        let root_dir = root_dir.into();
        let path = root_dir.join(constants::CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::with_root(root_dir));
        }
        let content = std::fs::read_to_string(&path).map_err(|e| CorralError::Io {
            path: path.clone(),
            source: e,
        })?;
        let mut config: Self = serde_json::from_str(&content)?;
        config.root_dir = root_dir;
        tracing::debug!(path = %path.display(), "loaded configuration overrides");
        Ok(config)
    }

    /// Directory holding one sub-directory per container.
    #[must_use]
    pub fn containers_dir(&self) -> PathBuf {
        self.root_dir.join("containers")
    }

    /// Directory of a single container's metadata and log.
    #[must_use]
    pub fn container_dir(&self, name: &str) -> PathBuf {
        self.containers_dir().join(name)
    }

    /// Log file written by a detached container.
    #[must_use]
    pub fn log_path(&self, name: &str) -> PathBuf {
        self.container_dir(name).join(constants::LOG_FILE)
    }

    /// Directory holding per-name advisory lock files.
    #[must_use]
    pub fn locks_dir(&self) -> PathBuf {
        self.root_dir.join("locks")
    }

    /// Directory holding image archives and their extracted lower layers.
    #[must_use]
    pub fn images_dir(&self) -> PathBuf {
        self.root_dir.join("images")
    }

    /// Directory holding per-container writable layers.
    #[must_use]
    pub fn overlay_dir(&self) -> PathBuf {
        self.root_dir.join("overlay")
    }

    /// Directory holding per-container merged root filesystems.
    #[must_use]
    pub fn mnt_dir(&self) -> PathBuf {
        self.root_dir.join("mnt")
    }

    /// Directory holding network definitions and address allocations.
    #[must_use]
    pub fn network_dir(&self) -> PathBuf {
        self.root_dir.join("network")
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_derived_from_root() {
        let cfg = CorralConfig::with_root("/tmp/corral");
        assert_eq!(cfg.container_dir("web"), PathBuf::from("/tmp/corral/containers/web"));
        assert_eq!(
            cfg.log_path("web"),
            PathBuf::from("/tmp/corral/containers/web/container.log")
        );
        assert_eq!(cfg.mnt_dir(), PathBuf::from("/tmp/corral/mnt"));
        assert_eq!(cfg.cgroup_root, PathBuf::from("/sys/fs/cgroup/corral"));
    }

    #[test]
    fn load_without_file_uses_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = CorralConfig::load(dir.path()).expect("load");
        assert_eq!(cfg, CorralConfig::with_root(dir.path()));
    }

    #[test]
    fn load_applies_overrides_but_keeps_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("config.json"),
            r#"{ "root_dir": "/elsewhere", "stop_timeout_secs": 9 }"#,
        )
        .expect("write config");

        let cfg = CorralConfig::load(dir.path()).expect("load");
        assert_eq!(cfg.stop_timeout_secs, 9);
        assert_eq!(cfg.root_dir, dir.path());
    }

    #[test]
    fn load_rejects_malformed_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("config.json"), "{ not json").expect("write config");
        assert!(CorralConfig::load(dir.path()).is_err());
    }
}
