//! `corral stop` — Stop a running container.

use clap::Args;
use corral_runtime::engine::Engine;

/// Arguments for the `stop` command.
#[derive(Args, Debug)]
pub struct StopArgs {
    /// Container name.
    pub container: String,
}

/// Executes the `stop` command.
///
/// # Errors
///
/// Returns an error if the container does not exist, is not running, or
/// survives SIGKILL.
pub fn execute(args: &StopArgs, engine: &Engine) -> anyhow::Result<()> {
    let info = engine.stop(&args.container)?;
    println!("{}", info.name);
    Ok(())
}
