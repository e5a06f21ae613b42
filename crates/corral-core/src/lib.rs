//! # corral-core
//!
//! Low-level Linux isolation primitives for the corral runtime.
//!
//! This crate provides safe abstractions over:
//! - **Namespaces**: clone flags for new containers and `setns(2)` into live ones.
//! - **Cgroups v2**: per-container memory, CPU weight, and cpuset scopes.
//! - **Filesystem**: `OverlayFS` workspaces, bind mounts, and `pivot_root`.
//! - **Processes**: liveness probing and signal delivery.
//!
//! All unsafe system calls are encapsulated in safe wrappers with
//! proper error handling and `// SAFETY:` documentation.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod cgroup;
pub mod filesystem;
pub mod namespace;
pub mod process;
