//! Unified (cgroup v2) filesystem manager.
//!
//! Joins a process into a single unified-hierarchy directory, enabling
//! the required controllers on every ancestor on the way down.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use cordon_common::constants::{CGROUP_SUBTREE_CONTROL, UNIFIED_MOUNTPOINT};
use cordon_common::error::{CordonError, Result};
use cordon_common::types::CgroupSpec;

use crate::manager::CgroupManager;
use crate::procs;

/// Controllers with no v2 representation; they must not be written to
/// `cgroup.subtree_control`.
const PSEUDO_CONTROLLERS: &[&str] = &["devices", "freezer"];

/// Manager bound to one directory of the unified hierarchy.
pub struct UnifiedFsManager {
    dir_path: PathBuf,
    /// Controllers reported enabled at the hierarchy root, loaded once.
    controllers: OnceLock<HashSet<String>>,
}

impl UnifiedFsManager {
    /// Creates a manager for the unified hierarchy.
    ///
    /// `dir_path` is the absolute target directory, like
    /// `/sys/fs/cgroup/user.slice/user-1001.slice/session-1.scope`;
    /// when empty it is derived from the spec.
    ///
    /// # Errors
    ///
    /// Returns [`CordonError::Config`] if the resulting path does not
    /// lie under the unified mount point.
    pub fn new(spec: &CgroupSpec, dir_path: PathBuf) -> Result<Self> {
        let dir_path = if dir_path.as_os_str().is_empty() {
            default_dir_path(spec)
        } else {
            dir_path
        };
        if !dir_path.starts_with(UNIFIED_MOUNTPOINT) {
            return Err(CordonError::Config {
                message: format!(
                    "invalid cgroup path {}: not under {UNIFIED_MOUNTPOINT}",
                    dir_path.display()
                ),
            });
        }
        Ok(Self {
            dir_path,
            controllers: OnceLock::new(),
        })
    }

    /// Returns the manager's target directory.
    #[must_use]
    pub fn dir_path(&self) -> &Path {
        &self.dir_path
    }

    /// Returns the non-pseudo controllers enabled at the root of the
    /// unified mount, read from `cgroup.controllers` once.
    fn controllers(&self) -> Result<&HashSet<String>> {
        if let Some(ctrs) = self.controllers.get() {
            return Ok(ctrs);
        }
        let list_path = Path::new(UNIFIED_MOUNTPOINT).join("cgroup.controllers");
        let content = std::fs::read_to_string(&list_path).map_err(|e| CordonError::Io {
            path: list_path,
            source: e,
        })?;
        let ctrs = content
            .split_whitespace()
            .filter(|c| !PSEUDO_CONTROLLERS.contains(c))
            .map(ToOwned::to_owned)
            .collect();
        Ok(self.controllers.get_or_init(|| ctrs))
    }

    /// Creates the directory tree down to the target path, enabling the
    /// needed controllers in each ancestor's subtree-control file.
    fn create_cgroup_path(&self) -> Result<()> {
        let tokens = subtree_control_tokens(self.controllers()?);
        let relative = self
            .dir_path
            .strip_prefix(UNIFIED_MOUNTPOINT)
            .map_err(|_| CordonError::Config {
                message: format!("invalid cgroup path {}", self.dir_path.display()),
            })?;

        let mut current = PathBuf::from(UNIFIED_MOUNTPOINT);
        for component in relative.components() {
            enable_controllers(&current, &tokens);
            current.push(component);
            if !current.exists() {
                std::fs::create_dir_all(&current).map_err(|e| CordonError::Placement {
                    path: current.clone(),
                    source: e,
                })?;
                tracing::debug!(path = %current.display(), "cgroup directory created");
            }
        }
        Ok(())
    }
}

impl CgroupManager for UnifiedFsManager {
    fn apply(&self, pid: i32) -> Result<()> {
        self.create_cgroup_path()?;
        procs::write_cgroup_procs(&self.dir_path, pid)?;
        tracing::debug!(pid, path = %self.dir_path.display(), "process placed in unified cgroup");
        Ok(())
    }

    fn paths(&self) -> HashMap<String, PathBuf> {
        HashMap::from([(String::new(), self.dir_path.clone())])
    }
}

/// Derives the default target directory from the spec: the explicit
/// path when set, otherwise parent/name, both taken relative to the
/// unified mount point.
fn default_dir_path(spec: &CgroupSpec) -> PathBuf {
    let mount = Path::new(UNIFIED_MOUNTPOINT);
    if !spec.path.is_empty() {
        return mount.join(spec.path.trim_start_matches('/'));
    }
    mount
        .join(spec.parent.trim_start_matches('/'))
        .join(&spec.name)
}

/// Builds the space-joined `+controller` activation string. The `+`
/// prefix makes activation additive, leaving siblings' settings alone.
fn subtree_control_tokens(controllers: &HashSet<String>) -> String {
    let mut names: Vec<&str> = controllers.iter().map(String::as_str).collect();
    names.sort_unstable();
    names
        .iter()
        .map(|c| format!("+{c}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Writes the activation tokens into `dir`'s subtree-control file.
/// Failures are logged, not fatal: a controller that cannot be enabled
/// at an ancestor surfaces later as a missing limit, while the
/// placement itself can still succeed.
fn enable_controllers(dir: &Path, tokens: &str) {
    if tokens.is_empty() {
        return;
    }
    let control = dir.join(CGROUP_SUBTREE_CONTROL);
    if let Err(err) = std::fs::write(&control, tokens) {
        tracing::debug!(path = %control.display(), %err, "subtree_control write failed");
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn path_outside_the_unified_mount_is_rejected() {
        let result = UnifiedFsManager::new(&CgroupSpec::default(), PathBuf::from("/tmp/evil"));
        assert!(matches!(result, Err(CordonError::Config { .. })));
    }

    #[test]
    fn explicit_path_wins_over_parent_and_name() {
        let spec = CgroupSpec {
            path: "/custom/leaf".into(),
            parent: "ignored.slice".into(),
            name: "ignored".into(),
            ..CgroupSpec::default()
        };
        assert_eq!(
            default_dir_path(&spec),
            PathBuf::from("/sys/fs/cgroup/custom/leaf")
        );
    }

    #[test]
    fn default_path_joins_parent_and_name() {
        let spec = CgroupSpec {
            parent: "system.slice".into(),
            name: "app".into(),
            ..CgroupSpec::default()
        };
        assert_eq!(
            default_dir_path(&spec),
            PathBuf::from("/sys/fs/cgroup/system.slice/app")
        );
    }

    #[test]
    fn activation_tokens_are_additive_and_sorted() {
        let ctrs: HashSet<String> = ["pids", "memory", "cpu"]
            .into_iter()
            .map(ToOwned::to_owned)
            .collect();
        assert_eq!(subtree_control_tokens(&ctrs), "+cpu +memory +pids");
    }

    #[test]
    fn paths_map_uses_the_empty_key() {
        let spec = CgroupSpec {
            parent: "a".into(),
            name: "b".into(),
            ..CgroupSpec::default()
        };
        let mgr = UnifiedFsManager::new(&spec, PathBuf::new()).unwrap();
        let paths = mgr.paths();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[""], PathBuf::from("/sys/fs/cgroup/a/b"));
    }
}
