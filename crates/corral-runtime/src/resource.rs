//! Resource application with guaranteed teardown.
//!
//! A scope is configured before the process joins it. If either step
//! fails the half-built scope is destroyed again; whether the failure
//! aborts the launch depends on the caller's strictness.

use std::path::PathBuf;

use corral_common::config::CorralConfig;
use corral_common::error::Result;
use corral_common::types::ResourceConfig;
use corral_core::cgroup::{self, CgroupManager};

/// A control-group-like constraint scope.
pub trait ResourceScope: Send {
    /// Writes the requested limits into the scope.
    ///
    /// # Errors
    ///
    /// Returns an error if a limit is invalid or cannot be written.
    fn configure(&self, config: &ResourceConfig) -> Result<()>;

    /// Moves `pid` into the scope.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be added.
    fn apply_to(&self, pid: u32) -> Result<()>;

    /// Removes the scope. Destroying twice succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the scope exists but cannot be removed.
    fn destroy(&self) -> Result<()>;
}

/// Factory of resource scopes keyed by container name.
pub trait ResourceLimiter: Send + Sync {
    /// Creates (or reopens) the scope for `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the scope cannot be created.
    fn new_scope(&self, id: &str) -> Result<Box<dyn ResourceScope>>;

    /// Destroys the scope for `id` if it exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the scope exists but cannot be removed.
    fn release(&self, id: &str) -> Result<()>;
}

impl ResourceScope for CgroupManager {
    fn configure(&self, config: &ResourceConfig) -> Result<()> {
        self.apply_limits(config)
    }

    fn apply_to(&self, pid: u32) -> Result<()> {
        self.add_process(pid)
    }

    fn destroy(&self) -> Result<()> {
        Self::destroy(self)
    }
}

/// Limiter backed by cgroup v2 scopes under one root directory.
#[derive(Debug, Clone)]
pub struct CgroupLimiter {
    root: PathBuf,
}

impl CgroupLimiter {
    /// Creates a limiter placing scopes under `config.cgroup_root`.
    #[must_use]
    pub fn new(config: &CorralConfig) -> Self {
        Self {
            root: config.cgroup_root.clone(),
        }
    }
}

impl ResourceLimiter for CgroupLimiter {
    fn new_scope(&self, id: &str) -> Result<Box<dyn ResourceScope>> {
        let scope = CgroupManager::create(&self.root, id)?;
        cgroup::enable_controllers(&self.root);
        Ok(Box::new(scope))
    }

    fn release(&self, id: &str) -> Result<()> {
        CgroupManager::open(&self.root, id).destroy()
    }
}

/// Creates the scope for `id`, configures it, and moves `pid` into it.
///
/// Returns whether the limits are in force. On failure the scope is torn
/// down; with `strict` the error is returned, otherwise it is logged and
/// the launch continues unconstrained.
///
/// # Errors
///
/// Returns the scope error when `strict` is set.
pub fn apply_resources(
    limiter: &dyn ResourceLimiter,
    id: &str,
    config: &ResourceConfig,
    pid: u32,
    strict: bool,
) -> Result<bool> {
    let outcome = limiter.new_scope(id).and_then(|scope| {
        let applied = scope.configure(config).and_then(|()| scope.apply_to(pid));
        if applied.is_err() {
            if let Err(e) = scope.destroy() {
                tracing::warn!(id, error = %e, "failed to tear down resource scope");
            }
        }
        applied
    });

    match outcome {
        Ok(()) => {
            tracing::info!(id, pid, limits = ?config, "resource limits applied");
            Ok(true)
        }
        Err(e) if strict => Err(e),
        Err(e) => {
            tracing::warn!(id, pid, error = %e, "resource limits not applied");
            Ok(false)
        }
    }
}

/// Destroys the scope for `id`, logging instead of failing.
pub fn release_resources(limiter: &dyn ResourceLimiter, id: &str) {
    match limiter.release(id) {
        Ok(()) => tracing::debug!(id, "resource scope released"),
        Err(e) => tracing::warn!(id, error = %e, "failed to release resource scope"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use corral_common::error::CorralError;

    use super::*;

    #[derive(Default)]
    struct Journal(Mutex<Vec<String>>);

    impl Journal {
        fn push(&self, entry: impl Into<String>) {
            self.0.lock().unwrap().push(entry.into());
        }

        fn entries(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    struct FakeScope {
        journal: Arc<Journal>,
        fail_configure: bool,
    }

    impl ResourceScope for FakeScope {
        fn configure(&self, _config: &ResourceConfig) -> Result<()> {
            self.journal.push("configure");
            if self.fail_configure {
                return Err(CorralError::Config {
                    message: "bad limit".into(),
                });
            }
            Ok(())
        }

        fn apply_to(&self, pid: u32) -> Result<()> {
            self.journal.push(format!("apply {pid}"));
            Ok(())
        }

        fn destroy(&self) -> Result<()> {
            self.journal.push("destroy");
            Ok(())
        }
    }

    struct FakeLimiter {
        journal: Arc<Journal>,
        fail_configure: bool,
    }

    impl ResourceLimiter for FakeLimiter {
        fn new_scope(&self, id: &str) -> Result<Box<dyn ResourceScope>> {
            self.journal.push(format!("scope {id}"));
            Ok(Box::new(FakeScope {
                journal: Arc::clone(&self.journal),
                fail_configure: self.fail_configure,
            }))
        }

        fn release(&self, id: &str) -> Result<()> {
            self.journal.push(format!("release {id}"));
            Ok(())
        }
    }

    fn limiter(fail_configure: bool) -> FakeLimiter {
        FakeLimiter {
            journal: Arc::new(Journal::default()),
            fail_configure,
        }
    }

    #[test]
    fn configures_before_applying() {
        let lim = limiter(false);
        let applied =
            apply_resources(&lim, "web", &ResourceConfig::default(), 42, true).expect("apply");
        assert!(applied);
        assert_eq!(lim.journal.entries(), vec!["scope web", "configure", "apply 42"]);
    }

    #[test]
    fn strict_failure_tears_down_and_errors() {
        let lim = limiter(true);
        let err = apply_resources(&lim, "web", &ResourceConfig::default(), 42, true)
            .expect_err("strict");
        assert!(matches!(err, CorralError::Config { .. }));
        assert_eq!(lim.journal.entries(), vec!["scope web", "configure", "destroy"]);
    }

    #[test]
    fn lenient_failure_tears_down_and_continues() {
        let lim = limiter(true);
        let applied =
            apply_resources(&lim, "web", &ResourceConfig::default(), 42, false).expect("lenient");
        assert!(!applied);
        assert!(lim.journal.entries().contains(&"destroy".to_string()));
    }

    #[test]
    fn cgroup_limiter_creates_and_releases_scope() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = CorralConfig::with_root(dir.path());
        config.cgroup_root = dir.path().join("cgroup");
        let lim = CgroupLimiter::new(&config);

        let _scope = lim.new_scope("web").expect("scope");
        assert!(config.cgroup_root.join("web").is_dir());
        lim.release("web").expect("release");
        assert!(!config.cgroup_root.join("web").exists());
        lim.release("web").expect("release again");
    }
}
