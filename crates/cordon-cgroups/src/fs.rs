//! Legacy (cgroup v1) filesystem manager.
//!
//! Joins a process into a per-subsystem cgroup tree by writing directly
//! to cgroupfs, one directory tree per controller.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use cordon_common::error::{CordonError, Result};
use cordon_common::types::{CgroupSpec, ResourceLimits};

use crate::manager::CgroupManager;
use crate::procs;

/// One v1 controller handler.
///
/// A closed set of implementations covers the real kernel controllers
/// and the named pseudo-controllers; the active set is passed into the
/// manager at construction so there is no mutable global registry.
pub trait Subsystem: Send + Sync {
    /// Name of the controller as cgroupfs spells it.
    fn name(&self) -> &str;

    /// Creates and joins the controller's cgroup at `path`, attaching
    /// `pid` to it. Some controllers pre-configure parents from the
    /// limits before joining.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the PID
    /// cannot be written.
    fn apply(&self, path: &Path, limits: &ResourceLimits, pid: i32) -> Result<()>;
}

/// Creates the cgroup directory (if absent) and writes `pid` into its
/// process-list file. An empty path is a no-op: the controller is
/// simply not configured for this container.
pub(crate) fn join(path: &Path, pid: i32) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(path).map_err(|e| CordonError::Placement {
        path: path.to_path_buf(),
        source: e,
    })?;
    procs::write_cgroup_procs(path, pid)
}

/// A real kernel controller joined by a plain directory-create plus
/// procs write.
pub struct JoinGroup {
    name: &'static str,
}

impl JoinGroup {
    /// Creates a handler for the named kernel controller.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self { name }
    }
}

impl Subsystem for JoinGroup {
    fn name(&self) -> &str {
        self.name
    }

    fn apply(&self, path: &Path, _limits: &ResourceLimits, pid: i32) -> Result<()> {
        join(path, pid)
    }
}

/// A named pseudo-controller (e.g. `name=systemd`), or the `""` member
/// that joins the v2 tree on hybrid hosts. Join failures are ignored:
/// the named hierarchy may legitimately not exist.
pub struct NameGroup {
    name: String,
    join: bool,
}

impl NameGroup {
    /// Creates a handler for a named pseudo-controller.
    #[must_use]
    pub fn new(name: impl Into<String>, join: bool) -> Self {
        Self {
            name: name.into(),
            join,
        }
    }
}

impl Subsystem for NameGroup {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, path: &Path, _limits: &ResourceLimits, pid: i32) -> Result<()> {
        if self.join {
            if let Err(err) = join(path, pid) {
                tracing::debug!(name = %self.name, %err, "named cgroup join skipped");
            }
        }
        Ok(())
    }
}

/// The v1 controllers a container may be placed into.
const V1_CONTROLLERS: &[&str] = &[
    "cpu",
    "cpuacct",
    "cpuset",
    "memory",
    "pids",
    "blkio",
    "hugetlb",
    "net_cls",
    "net_prio",
    "perf_event",
    "freezer",
    "rdma",
    "devices",
];

/// Returns the default controller set for a legacy host. On a hybrid
/// host an extra `""` member joins the v2 compatibility tree.
#[must_use]
pub fn default_subsystems(hybrid: bool) -> Vec<Box<dyn Subsystem>> {
    let mut subsystems: Vec<Box<dyn Subsystem>> = V1_CONTROLLERS
        .iter()
        .map(|name| Box::new(JoinGroup::new(name)) as Box<dyn Subsystem>)
        .collect();
    subsystems.push(Box::new(NameGroup::new("name=systemd", true)));
    if hybrid {
        subsystems.push(Box::new(NameGroup::new("", true)));
    }
    subsystems
}

/// Manager that joins a process into the legacy per-controller trees.
pub struct LegacyFsManager {
    spec: CgroupSpec,
    paths: Mutex<HashMap<String, PathBuf>>,
    subsystems: Vec<Box<dyn Subsystem>>,
}

impl LegacyFsManager {
    /// Creates a manager with the default controller set.
    ///
    /// `paths` maps controller names to absolute cgroup directories,
    /// typically recovered across a re-exec; `None` leaves the map
    /// empty, making `apply` a no-op.
    ///
    /// # Errors
    ///
    /// Currently infallible; kept fallible for parity with the other
    /// manager constructors.
    pub fn new(
        spec: CgroupSpec,
        paths: Option<HashMap<String, PathBuf>>,
        hybrid: bool,
    ) -> Result<Self> {
        Ok(Self::with_subsystems(
            spec,
            paths,
            default_subsystems(hybrid),
        ))
    }

    /// Creates a manager with an explicit controller set.
    #[must_use]
    pub fn with_subsystems(
        spec: CgroupSpec,
        paths: Option<HashMap<String, PathBuf>>,
        subsystems: Vec<Box<dyn Subsystem>>,
    ) -> Self {
        Self {
            spec,
            paths: Mutex::new(paths.unwrap_or_default()),
            subsystems,
        }
    }

    /// Returns whether a controller failure may be dropped instead of
    /// failing the whole placement.
    ///
    /// Rootless callers frequently cannot create sibling controllers
    /// they do not need; failing the container for an optional
    /// controller would be wrong. A controller under an explicitly
    /// configured path must fail loudly.
    fn is_ignorable(&self, err: &CordonError) -> bool {
        self.spec.rootless && self.spec.path.is_empty() && err.is_permission()
    }
}

impl CgroupManager for LegacyFsManager {
    #[allow(clippy::significant_drop_tightening)]
    fn apply(&self, pid: i32) -> Result<()> {
        let mut paths = self.paths.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        for sys in &self.subsystems {
            let name = sys.name();
            let Some(path) = paths.get(name).cloned() else {
                continue;
            };
            if let Err(err) = sys.apply(&path, &self.spec.resources, pid) {
                if self.is_ignorable(&err) {
                    tracing::debug!(controller = name, %err, "dropping unjoinable controller");
                    let _ = paths.remove(name);
                    continue;
                }
                return Err(err);
            }
        }
        Ok(())
    }

    fn paths(&self) -> HashMap<String, PathBuf> {
        self.paths
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    /// Subsystem that always fails with the given OS error.
    struct FailingGroup {
        name: &'static str,
        errno: i32,
    }

    impl Subsystem for FailingGroup {
        fn name(&self) -> &str {
            self.name
        }

        fn apply(&self, path: &Path, _limits: &ResourceLimits, _pid: i32) -> Result<()> {
            Err(CordonError::Placement {
                path: path.to_path_buf(),
                source: std::io::Error::from_raw_os_error(self.errno),
            })
        }
    }

    fn one_path(name: &str) -> HashMap<String, PathBuf> {
        HashMap::from([(name.to_owned(), PathBuf::from("/sys/fs/cgroup/cpu/test"))])
    }

    #[test]
    fn empty_path_map_is_a_noop() {
        let mgr = LegacyFsManager::new(CgroupSpec::default(), None, false).unwrap();
        mgr.apply(1234).unwrap();
        assert!(mgr.paths().is_empty());
    }

    #[test]
    fn rootless_permission_failure_drops_the_controller() {
        let spec = CgroupSpec {
            rootless: true,
            ..CgroupSpec::default()
        };
        let mgr = LegacyFsManager::with_subsystems(
            spec,
            Some(one_path("cpu")),
            vec![Box::new(FailingGroup {
                name: "cpu",
                errno: libc::EACCES,
            })],
        );
        mgr.apply(1234).unwrap();
        assert!(mgr.paths().is_empty(), "controller entry must be dropped");
    }

    #[test]
    fn rootful_permission_failure_is_fatal() {
        let mgr = LegacyFsManager::with_subsystems(
            CgroupSpec::default(),
            Some(one_path("cpu")),
            vec![Box::new(FailingGroup {
                name: "cpu",
                errno: libc::EACCES,
            })],
        );
        assert!(mgr.apply(1234).is_err());
        assert_eq!(mgr.paths().len(), 1, "path map must be left intact");
    }

    #[test]
    fn rootless_with_explicit_path_still_fails() {
        let spec = CgroupSpec {
            rootless: true,
            path: "/custom/path".into(),
            ..CgroupSpec::default()
        };
        let mgr = LegacyFsManager::with_subsystems(
            spec,
            Some(one_path("cpu")),
            vec![Box::new(FailingGroup {
                name: "cpu",
                errno: libc::EPERM,
            })],
        );
        assert!(mgr.apply(1234).is_err());
    }

    #[test]
    fn non_permission_failure_is_fatal_even_rootless() {
        let spec = CgroupSpec {
            rootless: true,
            ..CgroupSpec::default()
        };
        let mgr = LegacyFsManager::with_subsystems(
            spec,
            Some(one_path("cpu")),
            vec![Box::new(FailingGroup {
                name: "cpu",
                errno: libc::ENOSPC,
            })],
        );
        assert!(mgr.apply(1234).is_err());
    }

    #[test]
    fn subsystems_without_a_path_are_skipped() {
        let mgr = LegacyFsManager::with_subsystems(
            CgroupSpec::default(),
            Some(one_path("memory")),
            vec![Box::new(FailingGroup {
                name: "cpu",
                errno: libc::EACCES,
            })],
        );
        // The failing subsystem has no path entry, so apply succeeds.
        mgr.apply(1234).unwrap();
    }
}
