//! Memory resource control via cgroups v2.
//!
//! Manages `memory.max`.

use std::path::Path;

use corral_common::error::{CorralError, Result};

/// Parses a human-readable memory quantity into bytes.
///
/// Accepts plain byte counts and the suffixes `k`, `m`, `g` (binary,
/// case-insensitive), `KiB`, `MiB`, `GiB`, and the decimal `KB`, `MB`, `GB`.
///
/// # Errors
///
/// Returns a configuration error if the quantity cannot be parsed.
pub fn parse_memory_limit(s: &str) -> Result<u64> {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    const GIB: u64 = MIB * 1024;

    let s = s.trim();
    let suffixes: [(&str, u64); 12] = [
        ("GiB", GIB),
        ("MiB", MIB),
        ("KiB", KIB),
        ("GB", 1_000_000_000),
        ("MB", 1_000_000),
        ("KB", 1000),
        ("g", GIB),
        ("m", MIB),
        ("k", KIB),
        ("G", GIB),
        ("M", MIB),
        ("K", KIB),
    ];
    let (num_str, multiplier) = suffixes
        .iter()
        .find_map(|(suffix, mult)| s.strip_suffix(suffix).map(|n| (n, *mult)))
        .unwrap_or((s, 1));

    num_str
        .trim()
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .filter(|&n| n > 0)
        .ok_or_else(|| CorralError::Config {
            message: format!("invalid memory limit: {s:?}"),
        })
}

/// Sets the hard memory limit for a cgroup.
///
/// # Errors
///
/// Returns an error if writing to `memory.max` fails.
pub fn set_memory_max(cgroup_path: &Path, bytes: u64) -> Result<()> {
    let file = cgroup_path.join("memory.max");
    std::fs::write(&file, bytes.to_string()).map_err(|e| CorralError::Io {
        path: file,
        source: e,
    })?;
    tracing::debug!(bytes, "memory max set");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_short_suffixes() {
        assert_eq!(parse_memory_limit("100m").unwrap(), 100 * 1024 * 1024);
        assert_eq!(parse_memory_limit("1G").unwrap(), 1024 * 1024 * 1024);
        assert_eq!(parse_memory_limit("512k").unwrap(), 512 * 1024);
    }

    #[test]
    fn parse_long_suffixes() {
        assert_eq!(parse_memory_limit("128MiB").unwrap(), 128 * 1024 * 1024);
        assert_eq!(parse_memory_limit("2GB").unwrap(), 2_000_000_000);
    }

    #[test]
    fn parse_plain_bytes() {
        assert_eq!(parse_memory_limit("1048576").unwrap(), 1_048_576);
    }

    #[test]
    fn parse_rejects_garbage_and_zero() {
        assert!(parse_memory_limit("abc").is_err());
        assert!(parse_memory_limit("0").is_err());
        assert!(parse_memory_limit("").is_err());
    }
}
