//! `corral ps` — List containers.

use clap::Args;
use corral_runtime::engine::Engine;

use crate::output;

/// Arguments for the `ps` command.
#[derive(Args, Debug)]
pub struct PsArgs {
    /// Print the records as JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}

/// Executes the `ps` command.
///
/// Records are reconciled against the OS first, so a container whose
/// process died shows up as stopped.
///
/// # Errors
///
/// Returns an error if the registry cannot be read.
pub fn execute(args: &PsArgs, engine: &Engine) -> anyhow::Result<()> {
    let containers = engine.list()?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&containers)?);
    } else {
        print!("{}", output::container_table(&containers));
    }
    Ok(())
}
