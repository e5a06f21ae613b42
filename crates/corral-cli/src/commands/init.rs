//! `corral init` — Container-side entry point.

/// Executes the `init` command.
///
/// Only meaningful as the first process of a freshly cloned container:
/// on success it is replaced by the container command and never returns.
///
/// # Errors
///
/// Returns an error if the handoff or the root switch fails.
pub fn execute() -> anyhow::Result<()> {
    corral_runtime::init::run_container_init()?;
    Ok(())
}
