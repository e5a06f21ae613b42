//! Container-init: the first process inside a new container.
//!
//! It waits for the orchestrator's command on the handoff pipe, switches
//! its root to the prepared workspace (its working directory), mounts
//! `/proc` and `/dev`, and replaces itself with the user command.

use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use corral_common::error::{CorralError, Result};
use corral_core::filesystem::{mount, pivot_root};

use crate::handoff::HandoffReader;

/// Runs container-init. Only returns on failure.
///
/// # Errors
///
/// Returns an error if the handoff, the root switch, the mounts, or the
/// `exec` fail.
pub fn run_container_init() -> Result<()> {
    let command = HandoffReader::inherited()?.receive()?;
    tracing::debug!(?command, "init command received");

    setup_root()?;

    let program = resolve_program(&command[0])?;
    tracing::debug!(program = %program.display(), "executing container command");
    let err = Command::new(&program).args(&command[1..]).exec();
    Err(CorralError::Io {
        path: program,
        source: err,
    })
}

fn setup_root() -> Result<()> {
    let root = std::env::current_dir().map_err(|e| CorralError::Io {
        path: PathBuf::from("."),
        source: e,
    })?;
    mount::make_root_private()?;
    pivot_root::pivot_root(&root)?;
    mount::mount_essential_filesystems()
}

/// Resolves `program` through `PATH` unless it already names a path.
///
/// # Errors
///
/// Returns `NotFound` if no executable matches.
pub fn resolve_program(program: &str) -> Result<PathBuf> {
    if program.contains('/') {
        return Ok(Path::new(program).to_path_buf());
    }
    which::which(program).map_err(|_| CorralError::NotFound {
        kind: "executable",
        id: program.to_owned(),
    })
}
