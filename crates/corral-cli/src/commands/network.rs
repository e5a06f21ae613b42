//! `corral network` — Manage virtual networks.

use clap::{Args, Subcommand};
use corral_runtime::engine::Engine;
use corral_runtime::network::BRIDGE_DRIVER;

use crate::output;

/// Arguments for the `network` command.
#[derive(Args, Debug)]
pub struct NetworkArgs {
    /// Network operation.
    #[command(subcommand)]
    pub command: NetworkCommand,
}

/// Network operations.
#[derive(Subcommand, Debug)]
pub enum NetworkCommand {
    /// Create a network.
    Create {
        /// Network driver.
        #[arg(long, default_value = BRIDGE_DRIVER)]
        driver: String,
        /// Address range in CIDR notation, e.g. `192.168.10.0/24`.
        #[arg(long)]
        subnet: String,
        /// Network name.
        name: String,
    },
    /// List networks.
    #[command(alias = "ls")]
    List,
    /// Remove a network.
    #[command(alias = "rm")]
    Remove {
        /// Network name.
        name: String,
    },
}

/// Executes the `network` command.
///
/// # Errors
///
/// Returns an error if the operation is rejected or the network state
/// cannot be updated.
pub fn execute(args: NetworkArgs, engine: &Engine) -> anyhow::Result<()> {
    match args.command {
        NetworkCommand::Create { driver, subnet, name } => {
            let network = engine.create_network(&driver, &subnet, &name)?;
            println!("{}", network.name);
        }
        NetworkCommand::List => {
            print!("{}", output::network_table(&engine.list_networks()?));
        }
        NetworkCommand::Remove { name } => {
            engine.remove_network(&name)?;
            println!("{name}");
        }
    }
    Ok(())
}
