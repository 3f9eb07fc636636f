//! On-disk container state.
//!
//! Each container owns one directory under the state root; its
//! `state.json` is rewritten atomically on every lifecycle transition.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cordon_common::error::{CordonError, Result};
use cordon_common::types::{CgroupSpec, ContainerId, ContainerState};

const STATE_FILE: &str = "state.json";

/// Persistent record of one container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateEntry {
    /// Container identifier.
    pub id: ContainerId,
    /// Lifecycle state at last save.
    pub status: ContainerState,
    /// PID of the init process, if one has been spawned.
    pub init_pid: Option<i32>,
    /// Cgroup identity the container was created with.
    pub cgroup: CgroupSpec,
    /// Cgroup paths the manager reported after placement, keyed by
    /// controller name (empty key on the unified hierarchy).
    pub cgroup_paths: std::collections::HashMap<String, PathBuf>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl StateEntry {
    /// Creates a fresh record for a container that has not started.
    #[must_use]
    pub fn new(id: ContainerId, cgroup: CgroupSpec) -> Self {
        Self {
            id,
            status: ContainerState::Created,
            init_pid: None,
            cgroup,
            cgroup_paths: std::collections::HashMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Writes the record into `state_dir`, replacing any previous one.
    ///
    /// The write goes through a temporary file in the same directory so
    /// readers never observe a torn record.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the filesystem write fails.
    pub fn save(&self, state_dir: &Path) -> Result<()> {
        let target = state_dir.join(STATE_FILE);
        let tmp = state_dir.join(format!(".{STATE_FILE}.tmp"));
        let data = serde_json::to_vec_pretty(self)?;
        fs::write(&tmp, data).map_err(|e| CordonError::Io {
            path: tmp.clone(),
            source: e,
        })?;
        fs::rename(&tmp, &target).map_err(|e| CordonError::Io {
            path: target.clone(),
            source: e,
        })?;
        tracing::debug!(id = %self.id, status = %self.status, "state saved");
        Ok(())
    }

    /// Loads the record stored in `state_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`CordonError::NotFound`] when no record exists, and an
    /// I/O or deserialization error otherwise.
    pub fn load(state_dir: &Path) -> Result<Self> {
        let path = state_dir.join(STATE_FILE);
        let data = fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CordonError::NotFound {
                    kind: "container state",
                    id: path.display().to_string(),
                }
            } else {
                CordonError::Io { path: path.clone(), source: e }
            }
        })?;
        Ok(serde_json::from_slice(&data)?)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let mut entry = StateEntry::new(ContainerId::new("c1"), CgroupSpec::default());
        entry.status = ContainerState::Running;
        entry.init_pid = Some(4242);
        entry.save(dir.path()).unwrap();

        let loaded = StateEntry::load(dir.path()).unwrap();
        assert_eq!(loaded.id.as_str(), "c1");
        assert_eq!(loaded.status, ContainerState::Running);
        assert_eq!(loaded.init_pid, Some(4242));
    }

    #[test]
    fn missing_state_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = StateEntry::load(dir.path()).unwrap_err();
        assert!(matches!(err, CordonError::NotFound { .. }));
    }

    #[test]
    fn save_replaces_previous_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut entry = StateEntry::new(ContainerId::new("c2"), CgroupSpec::default());
        entry.save(dir.path()).unwrap();
        entry.status = ContainerState::Stopped;
        entry.save(dir.path()).unwrap();

        let loaded = StateEntry::load(dir.path()).unwrap();
        assert_eq!(loaded.status, ContainerState::Stopped);
    }
}
