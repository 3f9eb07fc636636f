//! Transient-unit manager for unified (v2) hosts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use cordon_common::constants::UNIFIED_MOUNTPOINT;
use cordon_common::error::Result;
use cordon_common::types::CgroupSpec;

use crate::fs2::UnifiedFsManager;
use crate::manager::CgroupManager;

use super::{DEFAULT_SLICE, DbusHandle, expand_slice, start_unit, unit_name, unit_properties};

/// Manager that creates a transient unit and delegates placement to an
/// inner [`UnifiedFsManager`] for the directory systemd allocated.
pub struct UnifiedManager {
    spec: CgroupSpec,
    dbus: DbusHandle,
    fs: UnifiedFsManager,
}

impl UnifiedManager {
    /// Creates a unified systemd manager.
    ///
    /// An empty `path` is resolved up front from the spec's slice and
    /// unit name, so the inner filesystem manager is bound to the
    /// directory systemd will allocate for the unit.
    ///
    /// # Errors
    ///
    /// Returns an error if the slice name is malformed or the resolved
    /// path is not under the unified mount point.
    pub fn new(spec: CgroupSpec, path: PathBuf) -> Result<Self> {
        let dbus = DbusHandle::new(spec.rootless);
        let path = if path.as_os_str().is_empty() {
            init_path(&spec)?
        } else {
            path
        };
        let fs = UnifiedFsManager::new(&spec, path)?;
        Ok(Self { spec, dbus, fs })
    }

    /// Returns the unified-hierarchy directory this manager is bound to.
    #[must_use]
    pub fn dir_path(&self) -> &Path {
        self.fs.dir_path()
    }
}

/// Resolves the cgroup directory systemd assigns to the spec's unit:
/// the expanded slice path joined with the unit name, under the
/// unified mount point.
fn init_path(spec: &CgroupSpec) -> Result<PathBuf> {
    let slice = if spec.parent.is_empty() {
        DEFAULT_SLICE
    } else {
        spec.parent.as_str()
    };
    let expanded = expand_slice(slice)?;
    Ok(Path::new(UNIFIED_MOUNTPOINT)
        .join(expanded)
        .join(unit_name(spec)))
}

impl CgroupManager for UnifiedManager {
    fn apply(&self, pid: i32) -> Result<()> {
        let unit = unit_name(&self.spec);
        let properties = unit_properties(&self.spec, &unit, pid);
        start_unit(&self.dbus, &unit, &properties)?;
        tracing::debug!(unit, pid, "transient unit created on unified hierarchy");

        // Pass through to the filesystem manager so placement holds
        // even if systemd put the process elsewhere first.
        self.fs.apply(pid)
    }

    fn paths(&self) -> HashMap<String, PathBuf> {
        self.fs.paths()
    }
}
