//! # corral — minimal container runtime
//!
//! Launches processes in fresh namespaces on an overlay root, tracks them
//! in an on-disk registry and manages their lifecycle. Daemon-less: every
//! invocation reads and writes the registry directly.

#![allow(clippy::print_stdout, clippy::print_stderr)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::panic))]

mod commands;
mod output;

use clap::Parser;
use corral_runtime::exec::ExecReentry;
use tracing_subscriber::EnvFilter;

use crate::commands::{Cli, LogFormat};

fn main() -> anyhow::Result<()> {
    // The exec re-entry joins a mount namespace, which needs a single thread.
    if let Some(reentry) = ExecReentry::from_env()? {
        let code = reentry.run()?;
        std::process::exit(code);
    }

    let cli = Cli::parse();
    init_tracing(cli.log_format);
    commands::execute(cli)
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
