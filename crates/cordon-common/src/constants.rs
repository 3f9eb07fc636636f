//! System-wide constants and default paths.

/// Mount point of the cgroup v2 unified hierarchy.
pub const UNIFIED_MOUNTPOINT: &str = "/sys/fs/cgroup";

/// Mount point of the v2 compatibility tree on hybrid hosts.
pub const HYBRID_MOUNTPOINT: &str = "/sys/fs/cgroup/unified";

/// Process-list file present in every cgroup directory.
pub const CGROUP_PROCS: &str = "cgroup.procs";

/// Subtree-control file used to enable controllers for children.
pub const CGROUP_SUBTREE_CONTROL: &str = "cgroup.subtree_control";

/// Runtime directory whose presence indicates a running systemd.
pub const SYSTEMD_RUN_DIR: &str = "/run/systemd/system";

/// Name of the exec barrier FIFO inside a container's state directory.
pub const EXEC_FIFO_FILENAME: &str = "exec.fifo";

/// Environment variable carrying the bootstrap-pipe descriptor index.
///
/// The index is not fixed because caller-supplied extra descriptors may
/// occupy lower slots. Stable for compatibility with re-exec'd inits.
pub const INITPIPE_ENV: &str = "_CORDON_INITPIPE";

/// Environment variable carrying the exec-barrier descriptor index.
pub const FIFOFD_ENV: &str = "_CORDON_FIFOFD";

/// Environment variable carrying the container state directory path.
pub const STATEDIR_ENV: &str = "_CORDON_STATEDIR";

/// Subcommand the parent re-execs its own binary with to run the
/// container init stage.
pub const INIT_SUBCOMMAND: &str = "init";

/// Default base directory for container state.
pub const SYSTEM_STATE_DIR: &str = "/var/lib/cordon";

/// Application name used in CLI output and unit descriptions.
pub const APP_NAME: &str = "cordon";
