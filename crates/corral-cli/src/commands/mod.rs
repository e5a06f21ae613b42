//! CLI command definitions and dispatch.

pub mod commit;
pub mod exec;
pub mod init;
pub mod logs;
pub mod network;
pub mod ps;
pub mod rm;
pub mod run;
pub mod stop;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use corral_common::config::CorralConfig;
use corral_common::constants::{self, ROOT_ENV};
use corral_runtime::engine::Engine;

/// corral — a minimal daemon-less container runtime.
#[derive(Parser, Debug)]
#[command(name = "corral", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Data directory holding containers, images and networks.
    #[arg(long, global = true, env = ROOT_ENV)]
    pub root: Option<PathBuf>,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Formats accepted by `--log-format`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per event.
    Json,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create and start a container.
    Run(run::RunArgs),
    /// Container-side entry point. Not meant to be called directly.
    #[command(hide = true)]
    Init,
    /// Package a container's root filesystem as an image.
    Commit(commit::CommitArgs),
    /// List containers.
    Ps(ps::PsArgs),
    /// Print a container's log.
    #[command(name = "log", alias = "logs")]
    Log(logs::LogArgs),
    /// Run a command inside a running container.
    Exec(exec::ExecArgs),
    /// Stop a running container.
    Stop(stop::StopArgs),
    /// Remove a container.
    Rm(rm::RmArgs),
    /// Manage virtual networks.
    Network(network::NetworkArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    if matches!(cli.command, Command::Init) {
        return init::execute();
    }

    let root = cli.root.unwrap_or_else(constants::default_root_dir);
    let engine = Engine::new(CorralConfig::load(root)?);
    tracing::debug!(root = %engine.config().root_dir.display(), "engine ready");

    match cli.command {
        Command::Run(args) => run::execute(args, &engine),
        Command::Init => init::execute(),
        Command::Commit(args) => commit::execute(&args, &engine),
        Command::Ps(args) => ps::execute(&args, &engine),
        Command::Log(args) => logs::execute(&args, &engine),
        Command::Exec(args) => exec::execute(&args, &engine),
        Command::Stop(args) => stop::execute(&args, &engine),
        Command::Rm(args) => rm::execute(&args, &engine),
        Command::Network(args) => network::execute(args, &engine),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("corral").chain(args.iter().copied()))
    }

    #[test]
    fn interactive_and_detached_are_exclusive() {
        let err = parse(&["run", "--ti", "-d", "busybox", "sh"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn run_keeps_trailing_command_flags() {
        let cli = parse(&["run", "-d", "--name", "web", "busybox", "ls", "-l"]).unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.image, "busybox");
        assert_eq!(args.command, vec!["ls", "-l"]);
        assert_eq!(args.name.as_deref(), Some("web"));
    }

    #[test]
    fn missing_positionals_are_usage_errors() {
        for args in [&["run", "-d"][..], &["stop"], &["exec", "web"], &["commit", "web"]] {
            let err = parse(args).unwrap_err();
            assert_eq!(
                err.kind(),
                clap::error::ErrorKind::MissingRequiredArgument,
                "{args:?}"
            );
        }
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = parse(&["ps", "--root", "/tmp/corral", "--log-format", "json"]).unwrap();
        assert_eq!(cli.root, Some(PathBuf::from("/tmp/corral")));
        assert_eq!(cli.log_format, LogFormat::Json);
    }

    #[test]
    fn network_create_defaults_to_bridge() {
        let cli = parse(&["network", "create", "--subnet", "10.8.0.0/24", "mynet"]).unwrap();
        let Command::Network(network::NetworkArgs {
            command: network::NetworkCommand::Create { driver, subnet, name },
        }) = cli.command
        else {
            panic!("expected network create");
        };
        assert_eq!(driver, "bridge");
        assert_eq!(subnet, "10.8.0.0/24");
        assert_eq!(name, "mynet");
    }
}
