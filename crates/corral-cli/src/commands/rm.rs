//! `corral rm` — Remove a container.

use clap::Args;
use corral_runtime::engine::Engine;

/// Arguments for the `rm` command.
#[derive(Args, Debug)]
pub struct RmArgs {
    /// Container name.
    pub container: String,

    /// Stop the container first if it is running.
    #[arg(short, long)]
    pub force: bool,
}

/// Executes the `rm` command.
///
/// # Errors
///
/// Returns an error if the container does not exist, or is running and
/// `--force` was not given.
pub fn execute(args: &RmArgs, engine: &Engine) -> anyhow::Result<()> {
    engine.remove(&args.container, args.force)?;
    println!("{}", args.container);
    Ok(())
}
