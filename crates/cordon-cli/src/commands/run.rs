//! `cordon run` — create, confine, and run a container.

use std::path::Path;

use clap::Args;

use cordon_cgroups::hierarchy::HostDetector;
use cordon_common::types::{CgroupSpec, ContainerId, ResourceLimits};
use cordon_runtime::container::Container;
use cordon_runtime::process::Process;

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Container id; generated when omitted.
    #[arg(long)]
    pub id: Option<String>,

    /// Delegate cgroup creation to systemd transient units.
    #[arg(long)]
    pub systemd: bool,

    /// Expect to run without full host privilege.
    #[arg(long)]
    pub rootless: bool,

    /// Parent cgroup, or slice to place the unit under.
    #[arg(long, default_value = "")]
    pub cgroup_parent: String,

    /// Explicit cgroup path relative to the mount root.
    #[arg(long, default_value = "")]
    pub cgroup_path: String,

    /// Prefix for generated scope unit names.
    #[arg(long, default_value = "cordon")]
    pub scope_prefix: String,

    /// Memory limit in bytes.
    #[arg(long)]
    pub memory: Option<i64>,

    /// Maximum number of pids.
    #[arg(long)]
    pub pids_limit: Option<i64>,

    /// Entrypoint and its arguments.
    #[arg(required = true, trailing_var_arg = true)]
    pub command: Vec<String>,
}

/// Executes the `run` command.
///
/// # Errors
///
/// Returns an error if container creation, confinement, or the
/// bootstrap handshake fails.
pub fn execute(root: &str, args: RunArgs) -> anyhow::Result<()> {
    let id = args.id.map_or_else(ContainerId::generate, ContainerId::new);
    let spec = CgroupSpec {
        name: id.to_string(),
        parent: args.cgroup_parent,
        path: args.cgroup_path,
        scope_prefix: args.scope_prefix,
        systemd: args.systemd,
        rootless: args.rootless,
        resources: ResourceLimits {
            memory: args.memory,
            pids_limit: args.pids_limit,
            ..ResourceLimits::default()
        },
        ..CgroupSpec::default()
    };

    let detector = HostDetector::new();
    let mut container = Container::create(id.clone(), spec, &detector, Path::new(root))?;
    let mut child = container.start(Process::init(args.command))?;
    container.release()?;

    let status = child.wait()?;
    container.destroy()?;
    tracing::info!(%id, %status, "container exited");
    match status.code() {
        Some(0) => Ok(()),
        Some(code) => std::process::exit(code),
        None => anyhow::bail!("container terminated by signal: {status}"),
    }
}
