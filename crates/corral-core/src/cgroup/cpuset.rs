//! CPU pinning via the cgroups v2 cpuset controller.

use std::path::Path;

use corral_common::error::{CorralError, Result};

/// Checks that `cpus` looks like a kernel CPU list (`0-3,5`).
///
/// # Errors
///
/// Returns a configuration error for empty ranges, stray characters, or
/// descending ranges.
pub fn validate_cpu_list(cpus: &str) -> Result<()> {
    let invalid = || CorralError::Config {
        message: format!("invalid cpu set: {cpus:?}"),
    };
    for part in cpus.trim().split(',') {
        let (start, end) = part.split_once('-').unwrap_or((part, part));
        let start: u32 = start.parse().map_err(|_| invalid())?;
        let end: u32 = end.parse().map_err(|_| invalid())?;
        if start > end {
            return Err(invalid());
        }
    }
    Ok(())
}

/// Restricts a cgroup to the given CPU list.
///
/// # Errors
///
/// Returns an error if the list is malformed or `cpuset.cpus` cannot be
/// written.
pub fn set_cpus(cgroup_path: &Path, cpus: &str) -> Result<()> {
    validate_cpu_list(cpus)?;
    let file = cgroup_path.join("cpuset.cpus");
    std::fs::write(&file, cpus.trim()).map_err(|e| CorralError::Io {
        path: file,
        source: e,
    })?;
    tracing::debug!(cpus, "cpuset set");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_lists_and_ranges() {
        assert!(validate_cpu_list("0").is_ok());
        assert!(validate_cpu_list("0-3,5,7-8").is_ok());
    }

    #[test]
    fn rejects_malformed_lists() {
        assert!(validate_cpu_list("").is_err());
        assert!(validate_cpu_list("a-b").is_err());
        assert!(validate_cpu_list("3-1").is_err());
        assert!(validate_cpu_list("0,,1").is_err());
    }
}
