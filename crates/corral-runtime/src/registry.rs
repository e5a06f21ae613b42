//! Persistent container registry.
//!
//! Every command is a short read-modify-write episode against one named
//! record, so mutations are serialized per name with an advisory lock
//! rather than a daemon. [`FileRegistry`] keeps one directory per
//! container holding `config.json` and the container log.

use std::fs::File;
use std::path::{Path, PathBuf};

use nix::fcntl::{Flock, FlockArg};

use corral_common::config::CorralConfig;
use corral_common::constants::CONFIG_FILE;
use corral_common::error::{CorralError, Result};
use corral_common::types::ContainerInfo;

/// Store of container records.
pub trait Registry: Send + Sync {
    /// Takes the exclusive per-name lock, blocking until it is free.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be acquired.
    fn lock(&self, name: &str) -> Result<NameLock>;

    /// Persists a new record.
    ///
    /// # Errors
    ///
    /// Returns `NameConflict` if a record with the same name exists.
    fn create(&self, info: &ContainerInfo) -> Result<()>;

    /// Inserts or replaces a record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    fn put(&self, info: &ContainerInfo) -> Result<()>;

    /// Looks a record up by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the record exists but cannot be read.
    fn get(&self, name: &str) -> Result<Option<ContainerInfo>>;

    /// Returns all records, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be enumerated.
    fn list(&self) -> Result<Vec<ContainerInfo>>;

    /// Deletes a record and its artifacts. Deleting a missing record succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the record exists but cannot be removed.
    fn delete(&self, name: &str) -> Result<()>;

    /// Location of the container's log stream.
    fn log_path(&self, name: &str) -> PathBuf;
}

/// Exclusive hold on a container name, released on drop.
pub struct NameLock {
    name: String,
    _guard: Option<Flock<File>>,
}

impl NameLock {
    /// A lock that guards nothing, for single-process stores.
    pub fn unguarded(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            _guard: None,
        }
    }

    /// The locked name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for NameLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NameLock")
            .field("name", &self.name)
            .field("guarded", &self._guard.is_some())
            .finish()
    }
}

/// Registry backed by one JSON file per container.
#[derive(Debug, Clone)]
pub struct FileRegistry {
    containers_dir: PathBuf,
    locks_dir: PathBuf,
}

impl FileRegistry {
    /// Creates a registry under the directories of `config`.
    #[must_use]
    pub fn new(config: &CorralConfig) -> Self {
        Self {
            containers_dir: config.containers_dir(),
            locks_dir: config.locks_dir(),
        }
    }

    fn container_dir(&self, name: &str) -> PathBuf {
        self.containers_dir.join(name)
    }

    fn config_path(&self, name: &str) -> PathBuf {
        self.container_dir(name).join(CONFIG_FILE)
    }
}

impl Registry for FileRegistry {
    fn lock(&self, name: &str) -> Result<NameLock> {
        create_dir(&self.locks_dir)?;
        let path = self.locks_dir.join(format!("{name}.lock"));
        let file = File::options()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| CorralError::Io {
                path: path.clone(),
                source: e,
            })?;
        let guard = Flock::lock(file, FlockArg::LockExclusive).map_err(|(_, errno)| {
            CorralError::Io {
                path,
                source: errno.into(),
            }
        })?;
        tracing::trace!(name, "name lock acquired");
        Ok(NameLock {
            name: name.to_owned(),
            _guard: Some(guard),
        })
    }

    fn create(&self, info: &ContainerInfo) -> Result<()> {
        if self.config_path(info.name.as_str()).exists() {
            return Err(CorralError::NameConflict {
                name: info.name.to_string(),
            });
        }
        self.put(info)
    }

    fn put(&self, info: &ContainerInfo) -> Result<()> {
        let dir = self.container_dir(info.name.as_str());
        create_dir(&dir)?;
        let path = dir.join(CONFIG_FILE);
        let tmp = dir.join(format!("{CONFIG_FILE}.tmp"));
        let json = serde_json::to_string_pretty(info)?;
        std::fs::write(&tmp, json).map_err(|e| CorralError::Io {
            path: tmp.clone(),
            source: e,
        })?;
        std::fs::rename(&tmp, &path).map_err(|e| CorralError::Io { path, source: e })?;
        tracing::debug!(name = %info.name, status = %info.status, "container record saved");
        Ok(())
    }

    fn get(&self, name: &str) -> Result<Option<ContainerInfo>> {
        let path = self.config_path(name);
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CorralError::Io { path, source: e }),
        }
    }

    fn list(&self) -> Result<Vec<ContainerInfo>> {
        let entries = match std::fs::read_dir(&self.containers_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(CorralError::Io {
                    path: self.containers_dir.clone(),
                    source: e,
                });
            }
        };

        let mut records = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            // Directories without a record belong to launches that never
            // reached the persist step.
            match self.get(&name) {
                Ok(Some(info)) => records.push(info),
                Ok(None) => {}
                Err(e) => tracing::warn!(name, error = %e, "skipping unreadable record"),
            }
        }
        records.sort_by(|a, b| a.created_time.cmp(&b.created_time).then(a.name.cmp(&b.name)));
        Ok(records)
    }

    fn delete(&self, name: &str) -> Result<()> {
        let dir = self.container_dir(name);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {
                tracing::debug!(name, "container record deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CorralError::Io {
                path: dir,
                source: e,
            }),
        }
    }

    fn log_path(&self, name: &str) -> PathBuf {
        self.container_dir(name).join(corral_common::constants::LOG_FILE)
    }
}

fn create_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| CorralError::Io {
        path: dir.to_path_buf(),
        source: e,
    })
}
