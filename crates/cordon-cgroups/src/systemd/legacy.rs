//! Transient-unit manager for legacy (v1) hosts.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use cordon_common::error::Result;
use cordon_common::types::CgroupSpec;

use crate::manager::CgroupManager;

use super::{DbusHandle, start_unit, unit_name, unit_properties};

/// Manager that creates a transient unit and then joins the
/// pseudo-controllers systemd does not place processes into.
pub struct LegacyManager {
    spec: CgroupSpec,
    paths: Mutex<HashMap<String, PathBuf>>,
    dbus: DbusHandle,
}

impl LegacyManager {
    /// Creates a legacy systemd manager.
    ///
    /// # Errors
    ///
    /// Currently infallible; kept fallible for parity with the other
    /// manager constructors.
    pub fn new(spec: CgroupSpec, paths: Option<HashMap<String, PathBuf>>) -> Result<Self> {
        let dbus = DbusHandle::new(spec.rootless);
        Ok(Self {
            spec,
            paths: Mutex::new(paths.unwrap_or_default()),
            dbus,
        })
    }

    /// Joins the named and hybrid pseudo-controllers directly; the real
    /// controllers were populated by systemd when the unit started.
    /// Join failures here are ignorable: the named hierarchy may not
    /// exist on this host.
    fn join_pseudo_controllers(&self, pid: i32) {
        let paths = self
            .paths
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        for key in ["name=systemd", ""] {
            if let Some(path) = paths.get(key) {
                if let Err(err) = crate::fs::join(path, pid) {
                    tracing::debug!(controller = key, %err, "pseudo-controller join skipped");
                }
            }
        }
    }
}

impl CgroupManager for LegacyManager {
    fn apply(&self, pid: i32) -> Result<()> {
        let unit = unit_name(&self.spec);
        let properties = unit_properties(&self.spec, &unit, pid);
        start_unit(&self.dbus, &unit, &properties)?;
        tracing::debug!(unit, pid, "transient unit created on legacy hierarchy");

        self.join_pseudo_controllers(pid);
        Ok(())
    }

    fn paths(&self) -> HashMap<String, PathBuf> {
        self.paths
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}
