//! `cordon init` — the re-exec'd container init stage.

use clap::Args;

/// Arguments for the hidden `init` command. The stage is driven by
/// inherited descriptors and environment variables, not flags.
#[derive(Args, Debug)]
pub struct InitArgs {}

/// Executes the `init` command.
///
/// Does not return on success: the user's entrypoint replaces this
/// process.
///
/// # Errors
///
/// Returns an error if the bootstrap handshake or the exec fails.
pub fn execute(_args: InitArgs) -> anyhow::Result<()> {
    cordon_runtime::init::run_init()?;
    Ok(())
}
