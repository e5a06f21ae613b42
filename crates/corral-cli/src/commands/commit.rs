//! `corral commit` — Package a container's root filesystem as an image.

use clap::Args;
use corral_runtime::engine::Engine;

/// Arguments for the `commit` command.
#[derive(Args, Debug)]
pub struct CommitArgs {
    /// Container name.
    pub container: String,

    /// Name of the image to create.
    pub image: String,
}

/// Executes the `commit` command.
///
/// # Errors
///
/// Returns an error if the container does not exist or the archive
/// cannot be written.
pub fn execute(args: &CommitArgs, engine: &Engine) -> anyhow::Result<()> {
    let committed = engine.commit(&args.container, &args.image)?;
    println!("{}\t{}", committed.name, committed.digest);
    tracing::info!(path = %committed.path.display(), "image archive written");
    Ok(())
}
