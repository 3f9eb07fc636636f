//! CLI command definitions and dispatch.

pub mod init;
pub mod run;

use clap::{Parser, Subcommand};

/// Cordon — cgroup-confined process launcher.
#[derive(Parser, Debug)]
#[command(name = "cordon", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Root directory for container state.
    #[arg(long, global = true, default_value = cordon_common::constants::SYSTEM_STATE_DIR)]
    pub root: String,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a container, confine its init, and run the entrypoint.
    Run(run::RunArgs),
    /// Container init stage. Spawned by the runtime, never by hand.
    #[command(hide = true)]
    Init(init::InitArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Run(args) => run::execute(&cli.root, args),
        Command::Init(args) => init::execute(args),
    }
}
