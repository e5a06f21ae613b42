//! `corral log` — Print a container's log.

use clap::Args;
use corral_runtime::engine::Engine;

/// Arguments for the `log` command.
#[derive(Args, Debug)]
pub struct LogArgs {
    /// Container name.
    pub container: String,

    /// Keep streaming output while the container runs.
    #[arg(short, long)]
    pub follow: bool,
}

/// Executes the `log` command.
///
/// # Errors
///
/// Returns an error if the container is not found or its log cannot be read.
pub fn execute(args: &LogArgs, engine: &Engine) -> anyhow::Result<()> {
    if args.follow {
        let stdout = std::io::stdout();
        engine.follow_logs(&args.container, &mut stdout.lock())?;
    } else {
        print!("{}", engine.logs(&args.container)?);
    }
    Ok(())
}
