//! `corral exec` — Run a command inside a running container.

use clap::Args;
use corral_runtime::engine::Engine;
use corral_runtime::exec;

/// Arguments for the `exec` command.
#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Container name.
    pub container: String,

    /// Command to execute.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub command: Vec<String>,
}

/// Executes the `exec` command and exits with the command's status.
///
/// Joining the container's namespaces happens in a re-invocation of this
/// binary; see [`corral_runtime::exec`].
///
/// # Errors
///
/// Returns an error if the container is not running or the re-invocation
/// cannot be spawned.
pub fn execute(args: &ExecArgs, engine: &Engine) -> anyhow::Result<()> {
    let target = exec::resolve_target(engine, &args.container)?;
    let code = exec::spawn_reentry(target, &args.command)?;
    std::process::exit(code);
}
