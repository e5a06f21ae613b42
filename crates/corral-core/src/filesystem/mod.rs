//! Filesystem management for container isolation.
//!
//! Provides `OverlayFS` workspaces, bind mounts for volumes, the mounts
//! container-init needs, and `pivot_root` for switching the root.

pub mod mount;
pub mod overlayfs;
pub mod pivot_root;
