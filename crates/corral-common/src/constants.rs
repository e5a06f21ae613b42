//! System-wide constants and default paths.

use std::path::PathBuf;

/// Default base directory when no home directory is available.
pub const SYSTEM_DATA_DIR: &str = "/var/lib/corral";

/// Environment variable overriding the data directory.
pub const ROOT_ENV: &str = "CORRAL_ROOT";

/// Returns the default data directory.
///
/// `$CORRAL_ROOT` wins, then `$HOME/.corral`, then [`SYSTEM_DATA_DIR`].
pub fn default_root_dir() -> PathBuf {
    if let Some(root) = std::env::var_os(ROOT_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(root);
    }
    std::env::var_os("HOME")
        .filter(|v| !v.is_empty())
        .map_or_else(|| PathBuf::from(SYSTEM_DATA_DIR), |home| PathBuf::from(home).join(".corral"))
}

/// Cgroups v2 unified hierarchy mount point.
pub const CGROUP_V2_PATH: &str = "/sys/fs/cgroup";

/// Sub-hierarchy holding one scope per container.
pub const CGROUP_PARENT: &str = "corral";

/// Length of auto-generated container names.
pub const CONTAINER_NAME_LEN: usize = 6;

/// File descriptor slot where container-init finds the handoff read end.
pub const HANDOFF_FD: i32 = 3;

/// Environment marker selecting the re-entrant exec path; carries the target pid.
pub const ENV_EXEC_PID: &str = "CORRAL_EXEC_PID";

/// Environment variable carrying the exec command as a JSON array.
pub const ENV_EXEC_CMD: &str = "CORRAL_EXEC_CMD";

/// Per-container metadata file name.
pub const CONFIG_FILE: &str = "config.json";

/// Per-container log file name.
pub const LOG_FILE: &str = "container.log";

/// Grace period between SIGTERM and SIGKILL during `stop`.
pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 2;

/// Attempts made to find an unused auto-generated name.
pub const NAME_GENERATION_ATTEMPTS: usize = 16;

/// Application name used in CLI output and state files.
pub const APP_NAME: &str = "corral";
