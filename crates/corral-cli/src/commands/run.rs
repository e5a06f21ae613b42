//! `corral run` — Create and start a container.

use clap::Args;
use corral_common::types::ResourceConfig;
use corral_runtime::engine::{Engine, RunOutcome, RunRequest};

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Attach the terminal and wait for the command to exit.
    #[arg(long = "ti", conflicts_with = "detach")]
    pub interactive: bool,

    /// Run in the background and print the container name.
    #[arg(short, long = "detach", alias = "d")]
    pub detach: bool,

    /// Memory limit, e.g. `100m`.
    #[arg(long = "mem", value_name = "LIMIT")]
    pub memory: Option<String>,

    /// Relative CPU share.
    #[arg(long = "cpushare", value_name = "SHARES")]
    pub cpu_share: Option<String>,

    /// CPUs the container may run on, e.g. `0-1`.
    #[arg(long = "cpuset", value_name = "CPUS")]
    pub cpu_set: Option<String>,

    /// Bind mount, `HOST:CONTAINER`.
    #[arg(short, long, alias = "v")]
    pub volume: Option<String>,

    /// Container name; generated when omitted.
    #[arg(long)]
    pub name: Option<String>,

    /// Extra environment entry, `KEY=VALUE`. Repeatable.
    #[arg(short, long = "env", alias = "e", value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Network to attach to.
    #[arg(long = "net", value_name = "NETWORK")]
    pub network: Option<String>,

    /// Port mapping, `HOST:CONTAINER`. Repeatable.
    #[arg(short, long = "publish", alias = "p", value_name = "HOST:CONTAINER")]
    pub port: Vec<String>,

    /// Fail the launch if resource limits cannot be applied.
    #[arg(long)]
    pub strict_limits: bool,

    /// Image providing the root filesystem.
    pub image: String,

    /// Command to run inside the container.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub command: Vec<String>,
}

impl RunArgs {
    fn into_request(self) -> RunRequest {
        RunRequest {
            interactive: self.interactive,
            detach: self.detach || !self.interactive,
            command: self.command,
            resources: ResourceConfig {
                memory_limit: self.memory.unwrap_or_default(),
                cpu_share: self.cpu_share.unwrap_or_default(),
                cpu_set: self.cpu_set.unwrap_or_default(),
            },
            volume: self.volume.unwrap_or_default(),
            name: self.name,
            image: self.image,
            env: self.env,
            network: self.network,
            port_mapping: self.port,
            strict_limits: self.strict_limits,
        }
    }
}

/// Executes the `run` command.
///
/// Detached runs print the container name. Interactive runs exit with the
/// container command's exit code.
///
/// # Errors
///
/// Returns an error if the request is invalid or the launch fails.
pub fn execute(args: RunArgs, engine: &Engine) -> anyhow::Result<()> {
    let request = args.into_request();
    if request.interactive {
        // Ctrl+C reaches the whole foreground group; survive it to tear down.
        ctrlc::set_handler(|| {})
            .map_err(|e| anyhow::anyhow!("failed to set Ctrl+C handler: {e}"))?;
    }

    match engine.run(&request)? {
        RunOutcome::Detached { name, pid } => {
            tracing::debug!(name = %name, pid, "detached");
            println!("{name}");
            Ok(())
        }
        RunOutcome::Exited { name, code } => {
            tracing::debug!(name = %name, code, "container exited");
            std::process::exit(code);
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: RunArgs,
    }

    fn request(args: &[&str]) -> RunRequest {
        let harness = Harness::try_parse_from(std::iter::once("run").chain(args.iter().copied()))
            .unwrap();
        harness.args.into_request()
    }

    #[test]
    fn non_interactive_run_is_detached() {
        let request = request(&["busybox", "top"]);
        assert!(request.detach);
        assert!(!request.interactive);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn flags_fill_the_request() {
        let request = request(&[
            "--ti", "--mem", "100m", "--cpuset", "0-1", "-v", "/data:/data", "-e", "A=1", "-e",
            "B=2", "--net", "mynet", "-p", "8080:80", "busybox", "sh",
        ]);
        assert!(request.interactive);
        assert!(!request.detach);
        assert_eq!(request.resources.memory_limit, "100m");
        assert_eq!(request.resources.cpu_set, "0-1");
        assert!(request.resources.cpu_share.is_empty());
        assert_eq!(request.volume, "/data:/data");
        assert_eq!(request.env, vec!["A=1", "B=2"]);
        assert_eq!(request.network.as_deref(), Some("mynet"));
        assert_eq!(request.port_mapping, vec!["8080:80"]);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn double_dash_single_letter_flags_are_accepted() {
        let request = request(&[
            "--d", "--v", "/data:/data", "--e", "A=1", "--net", "mynet", "--p", "8080:80",
            "busybox", "top",
        ]);
        assert!(request.detach);
        assert_eq!(request.volume, "/data:/data");
        assert_eq!(request.env, vec!["A=1"]);
        assert_eq!(request.port_mapping, vec!["8080:80"]);
    }
}
