//! Container lifecycle: create, start, release, destroy.

use std::fs;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};

use cordon_cgroups::hierarchy::HierarchyDetector;
use cordon_cgroups::{CgroupManager, manager};
use cordon_common::constants::{
    EXEC_FIFO_FILENAME, FIFOFD_ENV, INIT_SUBCOMMAND, INITPIPE_ENV, STATEDIR_ENV,
};
use cordon_common::error::{CordonError, Result};
use cordon_common::types::{CgroupSpec, ContainerId, ContainerState};

use crate::bootstrap::{BootstrapPayload, FilePair, InitProcess, map_inherited_fds};
use crate::fifo::{create_exec_fifo, open_exec_fifo, signal_exec_fifo};
use crate::process::Process;
use crate::state::StateEntry;

/// First descriptor index handed to the child beyond the standard
/// streams.
const FIRST_INHERITED_FD: i32 = 3;

/// One container: its identity, its state directory, and the single
/// cgroup manager bound to it for its whole life.
pub struct Container {
    id: ContainerId,
    state_dir: PathBuf,
    manager: Box<dyn CgroupManager>,
    entry: StateEntry,
}

impl Container {
    /// Creates a container: selects the placement strategy for the
    /// host, allocates the state directory, and persists the initial
    /// state record.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error if a container with this id already
    /// exists or the manager cannot be constructed, and an I/O error
    /// if the state directory cannot be set up.
    pub fn create(
        id: ContainerId,
        spec: CgroupSpec,
        detector: &dyn HierarchyDetector,
        root_dir: &Path,
    ) -> Result<Self> {
        let state_dir = root_dir.join(id.as_str());
        if state_dir.exists() {
            return Err(CordonError::Config {
                message: format!("container {id} already exists"),
            });
        }
        let manager = manager::new(spec.clone(), detector)?;
        fs::create_dir_all(&state_dir).map_err(|e| CordonError::Io {
            path: state_dir.clone(),
            source: e,
        })?;
        let entry = StateEntry::new(id.clone(), spec);
        entry.save(&state_dir)?;
        tracing::info!(%id, state_dir = %state_dir.display(), "container created");
        Ok(Self {
            id,
            state_dir,
            manager,
            entry,
        })
    }

    /// Spawns the container init and runs the bootstrap handshake.
    ///
    /// On return the init process has been placed into its cgroup and
    /// has acknowledged readiness; it remains parked on the exec
    /// barrier until [`Container::release`]. The container stays in
    /// the created state until then.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error for a descriptor that is not an init
    /// process; propagates placement errors from the manager unchanged;
    /// spawn and handshake failures surface as `Sync` errors.
    pub fn start(&mut self, process: Process) -> Result<Child> {
        if !process.init {
            return Err(CordonError::Config {
                message: "process descriptor is not marked init; exec into a running \
                          container is not supported"
                    .into(),
            });
        }
        let fifo_path = create_exec_fifo(&self.state_dir, self.entry.cgroup.owner_uid)?;
        match self.start_confined(&fifo_path, process) {
            Ok(child) => Ok(child),
            Err(err) => {
                // A stale barrier would make every retry fail at
                // creation time.
                if let Err(rm_err) = fs::remove_file(&fifo_path) {
                    tracing::debug!(path = %fifo_path.display(), %rm_err, "exec fifo cleanup");
                }
                Err(err)
            }
        }
    }

    /// The fallible tail of [`Container::start`], split out so the
    /// exec barrier can be reclaimed on any failure.
    fn start_confined(&mut self, fifo_path: &Path, process: Process) -> Result<Child> {
        let fifo = open_exec_fifo(fifo_path)?;
        let pair = FilePair::new()?;

        let payload = BootstrapPayload {
            args: process.args,
            env: process.env,
            cwd: process.cwd,
        }
        .encode()?;

        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let extra_count = process.extra_files.len() as i32;
        let initpipe_fd = FIRST_INHERITED_FD + extra_count;
        let fifo_fd = initpipe_fd + 1;

        let mut cmd = Command::new("/proc/self/exe");
        let _ = cmd
            .arg(INIT_SUBCOMMAND)
            .env(INITPIPE_ENV, initpipe_fd.to_string())
            .env(FIFOFD_ENV, fifo_fd.to_string())
            .env(STATEDIR_ENV, &self.state_dir);
        if let Some(stdin) = process.stdin {
            let _ = cmd.stdin(stdin);
        }
        if let Some(stdout) = process.stdout {
            let _ = cmd.stdout(stdout);
        }
        if let Some(stderr) = process.stderr {
            let _ = cmd.stderr(stderr);
        }

        let mut mappings = Vec::with_capacity(process.extra_files.len() + 2);
        for (i, file) in process.extra_files.iter().enumerate() {
            #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
            mappings.push((file.as_raw_fd(), FIRST_INHERITED_FD + i as i32));
        }
        mappings.push((pair.child.as_raw_fd(), initpipe_fd));
        mappings.push((fifo.as_raw_fd(), fifo_fd));
        map_inherited_fds(&mut cmd, mappings);

        let mut inherited = process.extra_files;
        inherited.push(fifo);

        let mut init = InitProcess::new(cmd, pair, self.manager.as_ref(), payload, inherited);
        let child = init.start()?;

        #[allow(clippy::cast_possible_wrap)]
        let pid = child.id() as i32;
        self.entry.init_pid = Some(pid);
        self.entry.cgroup_paths = self.manager.paths();
        self.entry.save(&self.state_dir)?;
        tracing::info!(id = %self.id, pid, "container init ready");
        Ok(child)
    }

    /// Releases the parked init through the exec barrier, letting it
    /// exec the entrypoint, and marks the container running.
    ///
    /// # Errors
    ///
    /// Returns an error if no init is parked on the barrier or the
    /// state record cannot be saved.
    pub fn release(&mut self) -> Result<()> {
        let fifo_path = self.state_dir.join(EXEC_FIFO_FILENAME);
        signal_exec_fifo(&fifo_path)?;
        if let Err(err) = fs::remove_file(&fifo_path) {
            tracing::debug!(path = %fifo_path.display(), %err, "exec fifo removal");
        }
        self.entry.status = ContainerState::Running;
        self.entry.save(&self.state_dir)?;
        tracing::info!(id = %self.id, "container released");
        Ok(())
    }

    /// Marks the container stopped and removes its state directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the state directory cannot be removed.
    pub fn destroy(mut self) -> Result<()> {
        self.entry.status = ContainerState::Stopped;
        fs::remove_dir_all(&self.state_dir).map_err(|e| CordonError::Io {
            path: self.state_dir.clone(),
            source: e,
        })?;
        tracing::info!(id = %self.id, "container destroyed");
        Ok(())
    }

    /// Returns the container identifier.
    #[must_use]
    pub fn id(&self) -> &ContainerId {
        &self.id
    }

    /// Returns the container's state directory.
    #[must_use]
    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Returns the cgroup manager bound to this container.
    #[must_use]
    pub fn manager(&self) -> &dyn CgroupManager {
        self.manager.as_ref()
    }

    /// Returns the last persisted state record.
    #[must_use]
    pub fn state(&self) -> &StateEntry {
        &self.entry
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    struct LegacyHost;

    impl HierarchyDetector for LegacyHost {
        fn is_unified(&self) -> bool {
            false
        }
        fn is_hybrid(&self) -> bool {
            false
        }
        fn is_systemd_running(&self) -> bool {
            false
        }
    }

    #[test]
    fn create_persists_initial_state() {
        let root = tempfile::tempdir().unwrap();
        let container = Container::create(
            ContainerId::new("alpha"),
            CgroupSpec::default(),
            &LegacyHost,
            root.path(),
        )
        .unwrap();

        let loaded = StateEntry::load(container.state_dir()).unwrap();
        assert_eq!(loaded.id.as_str(), "alpha");
        assert_eq!(loaded.status, ContainerState::Created);
        assert_eq!(loaded.init_pid, None);
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let id = ContainerId::new("dup");
        let _first = Container::create(
            id.clone(),
            CgroupSpec::default(),
            &LegacyHost,
            root.path(),
        )
        .unwrap();
        let result = Container::create(id, CgroupSpec::default(), &LegacyHost, root.path());
        assert!(matches!(result, Err(CordonError::Config { .. })));
    }

    #[test]
    fn start_requires_an_entry_process() {
        let root = tempfile::tempdir().unwrap();
        let mut container = Container::create(
            ContainerId::new("exec-style"),
            CgroupSpec::default(),
            &LegacyHost,
            root.path(),
        )
        .unwrap();

        let process = Process {
            args: vec!["/bin/true".into()],
            ..Process::default()
        };
        let err = container.start(process).unwrap_err();
        assert!(matches!(err, CordonError::Config { .. }));
        assert!(
            !container.state_dir().join(EXEC_FIFO_FILENAME).exists(),
            "rejected start must not allocate the barrier"
        );
    }

    #[test]
    fn failed_start_reclaims_the_exec_barrier() {
        let root = tempfile::tempdir().unwrap();
        let mut container = Container::create(
            ContainerId::new("halts"),
            CgroupSpec::default(),
            &LegacyHost,
            root.path(),
        )
        .unwrap();

        // The re-exec'd binary here is this test harness; it exits
        // without running the handshake, so start fails after the
        // barrier has been created.
        let err = container
            .start(Process::init(vec!["/bin/true".into()]))
            .unwrap_err();
        assert!(matches!(err, CordonError::Sync { .. }), "{err}");
        assert!(
            !container.state_dir().join(EXEC_FIFO_FILENAME).exists(),
            "barrier must be reclaimed on failure"
        );

        // A retry gets past barrier creation instead of failing with
        // an already-exists error.
        let err = container
            .start(Process::init(vec!["/bin/true".into()]))
            .unwrap_err();
        assert!(matches!(err, CordonError::Sync { .. }), "{err}");
    }

    #[test]
    fn destroy_removes_the_state_directory() {
        let root = tempfile::tempdir().unwrap();
        let container = Container::create(
            ContainerId::new("gone"),
            CgroupSpec::default(),
            &LegacyHost,
            root.path(),
        )
        .unwrap();
        let dir = container.state_dir().to_path_buf();
        container.destroy().unwrap();
        assert!(!dir.exists());
    }
}
