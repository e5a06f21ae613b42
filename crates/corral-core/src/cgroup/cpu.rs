//! CPU resource control via cgroups v2.
//!
//! Manages `cpu.weight`. Callers speak in cgroup-v1 shares, which are
//! converted to the v2 weight range.

use std::path::Path;

use corral_common::error::{CorralError, Result};

/// Converts cgroup-v1 CPU shares (2..=262144) to a v2 weight (1..=10000).
///
/// Uses the same mapping as other OCI runtimes so that `--cpushare 1024`
/// behaves alike everywhere. Zero maps to the default weight of 100.
#[must_use]
pub fn shares_to_weight(shares: u64) -> u64 {
    if shares == 0 {
        return 100;
    }
    let shares = shares.clamp(2, 262_144);
    1 + ((shares - 2) * 9999) / 262_142
}

/// Sets the CPU weight for a cgroup.
///
/// # Errors
///
/// Returns an error if writing to `cpu.weight` fails.
pub fn set_cpu_weight(cgroup_path: &Path, weight: u64) -> Result<()> {
    let file = cgroup_path.join("cpu.weight");
    std::fs::write(&file, weight.to_string()).map_err(|e| CorralError::Io {
        path: file,
        source: e,
    })?;
    tracing::debug!(weight, "CPU weight set");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shares_map_onto_weight_range() {
        assert_eq!(shares_to_weight(2), 1);
        assert_eq!(shares_to_weight(262_144), 10_000);
        assert_eq!(shares_to_weight(1024), 39);
        assert_eq!(shares_to_weight(0), 100);
        assert_eq!(shares_to_weight(1), 1);
    }
}
