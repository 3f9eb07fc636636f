//! Manager contract and the factory that selects a placement strategy.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use cordon_common::error::{CordonError, Result};
use cordon_common::types::CgroupSpec;

use crate::fs::LegacyFsManager;
use crate::fs2::UnifiedFsManager;
use crate::hierarchy::HierarchyDetector;
use crate::systemd;

/// Uniform contract over the four placement strategies.
///
/// A manager is bound to one [`CgroupSpec`] for the life of the
/// container. It is the sole owner of its controller-to-path mapping
/// and mutates it only under its own lock, so `apply` may be called on
/// different manager instances concurrently; two concurrent calls on
/// the same instance are merely serialized.
pub trait CgroupManager: Send + Sync {
    /// Places `pid` into the cgroup(s) this manager is bound to,
    /// creating them as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if any non-ignorable placement step fails.
    fn apply(&self, pid: i32) -> Result<()>;

    /// Returns the current controller-to-path mapping. The empty
    /// string key denotes the unified hierarchy.
    fn paths(&self) -> HashMap<String, PathBuf>;
}

/// Creates the manager for `spec`, selecting the strategy from the
/// host hierarchy and the spec's init-system preference.
///
/// # Errors
///
/// Returns [`CordonError::Config`] if the spec requests systemd on a
/// host without it.
pub fn new(spec: CgroupSpec, detector: &dyn HierarchyDetector) -> Result<Box<dyn CgroupManager>> {
    new_with_paths(spec, None, detector)
}

/// Like [`new`], but re-attaches to already-created cgroups via a
/// caller-supplied controller-to-path mapping (e.g. across a re-exec).
///
/// # Errors
///
/// Returns [`CordonError::Config`] if the spec requests systemd on a
/// host without it, or if `paths` is inconsistent for the detected
/// hierarchy mode.
pub fn new_with_paths(
    spec: CgroupSpec,
    paths: Option<HashMap<String, PathBuf>>,
    detector: &dyn HierarchyDetector,
) -> Result<Box<dyn CgroupManager>> {
    if spec.systemd && !detector.is_systemd_running() {
        return Err(CordonError::Config {
            message: "systemd not running on this host, cannot use systemd cgroups manager".into(),
        });
    }
    if detector.is_unified() {
        let path = resolve_unified_path(paths.as_ref())?;
        if spec.systemd {
            return Ok(Box::new(systemd::UnifiedManager::new(spec, path)?));
        }
        return Ok(Box::new(UnifiedFsManager::new(&spec, path)?));
    }
    if spec.systemd {
        return Ok(Box::new(systemd::LegacyManager::new(spec, paths)?));
    }
    Ok(Box::new(LegacyFsManager::new(
        spec,
        paths,
        detector.is_hybrid(),
    )?))
}

/// Converts a per-controller path map to the single unified-hierarchy
/// path. Legacy callers persist paths keyed by controller name; with
/// v2 there is only one path, keyed by the empty string.
///
/// # Errors
///
/// Returns [`CordonError::Config`] if the map has more than one entry
/// or the path is non-absolute or not lexically clean.
pub fn resolve_unified_path(paths: Option<&HashMap<String, PathBuf>>) -> Result<PathBuf> {
    let Some(paths) = paths else {
        return Ok(PathBuf::new());
    };
    if paths.len() > 1 {
        return Err(CordonError::Config {
            message: format!("expected a single unified path, got {paths:?}"),
        });
    }
    let path = paths.get("").cloned().unwrap_or_default();
    // Can be empty; the manager derives a default from the spec then.
    // The cleanliness check compares bytes: `Path` equality is
    // component-wise and would normalize `.` and doubled separators
    // away on both sides.
    if !path.as_os_str().is_empty()
        && (!path.is_absolute() || lexical_clean(&path).as_os_str() != path.as_os_str())
    {
        return Err(CordonError::Config {
            message: format!("invalid unified path: {}", path.display()),
        });
    }
    Ok(path)
}

/// Lexically cleans a path: collapses `.` and duplicate separators and
/// resolves `..` without touching the filesystem.
fn lexical_clean(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !matches!(
                    cleaned.components().next_back(),
                    None | Some(Component::RootDir)
                ) {
                    let _ = cleaned.pop();
                }
            }
            other => cleaned.push(other),
        }
    }
    cleaned
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::hierarchy::HierarchyDetector;

    /// Detector reporting a fixed host layout.
    pub(crate) struct FakeDetector {
        pub unified: bool,
        pub hybrid: bool,
        pub systemd: bool,
    }

    impl HierarchyDetector for FakeDetector {
        fn is_unified(&self) -> bool {
            self.unified
        }
        fn is_hybrid(&self) -> bool {
            self.hybrid
        }
        fn is_systemd_running(&self) -> bool {
            self.systemd
        }
    }

    fn path_map(entries: &[(&str, &str)]) -> HashMap<String, PathBuf> {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_owned(), PathBuf::from(v)))
            .collect()
    }

    #[test]
    fn unified_path_from_none_is_empty() {
        assert_eq!(resolve_unified_path(None).unwrap(), PathBuf::new());
    }

    #[test]
    fn unified_path_from_empty_map_is_empty() {
        let paths = HashMap::new();
        assert_eq!(resolve_unified_path(Some(&paths)).unwrap(), PathBuf::new());
    }

    #[test]
    fn unified_path_single_clean_entry_passes_through() {
        let paths = path_map(&[("", "/sys/fs/cgroup/system.slice/app.scope")]);
        assert_eq!(
            resolve_unified_path(Some(&paths)).unwrap(),
            PathBuf::from("/sys/fs/cgroup/system.slice/app.scope")
        );
    }

    #[test]
    fn unified_path_multiple_entries_fail() {
        let paths = path_map(&[("", "/a"), ("cpu", "/b")]);
        let err = resolve_unified_path(Some(&paths)).unwrap_err();
        assert!(matches!(err, CordonError::Config { .. }));
    }

    #[test]
    fn unified_path_relative_fails() {
        let paths = path_map(&[("", "sys/fs/cgroup/app")]);
        assert!(resolve_unified_path(Some(&paths)).is_err());
    }

    #[test]
    fn unified_path_unclean_fails() {
        for p in ["/sys/fs/cgroup/../cgroup", "/sys/fs/./cgroup", "/sys//fs/cgroup"] {
            let paths = path_map(&[("", p)]);
            assert!(resolve_unified_path(Some(&paths)).is_err(), "{p}");
        }
    }

    #[test]
    fn lexical_clean_resolves_dots() {
        assert_eq!(
            lexical_clean(Path::new("/a/b/../c/./d")),
            PathBuf::from("/a/c/d")
        );
        assert_eq!(lexical_clean(Path::new("/../a")), PathBuf::from("/a"));
    }

    #[test]
    fn systemd_requested_but_absent_is_a_config_error() {
        let detector = FakeDetector {
            unified: true,
            hybrid: false,
            systemd: false,
        };
        let spec = CgroupSpec {
            systemd: true,
            ..CgroupSpec::default()
        };
        let result = new(spec, &detector);
        assert!(matches!(result, Err(CordonError::Config { .. })));
    }

    #[test]
    fn legacy_host_without_systemd_selects_fs_manager() {
        let detector = FakeDetector {
            unified: false,
            hybrid: false,
            systemd: true,
        };
        let mgr = new(CgroupSpec::default(), &detector).unwrap();
        // A fresh fs manager has no paths and applies as a no-op.
        assert!(mgr.paths().is_empty());
        mgr.apply(1).unwrap();
    }

    #[test]
    fn unified_host_without_systemd_selects_fs2_manager() {
        let detector = FakeDetector {
            unified: true,
            hybrid: false,
            systemd: true,
        };
        let spec = CgroupSpec {
            parent: "system".into(),
            name: "test".into(),
            ..CgroupSpec::default()
        };
        let mgr = new(spec, &detector).unwrap();
        let paths = mgr.paths();
        assert_eq!(paths.len(), 1);
        assert!(paths[""].starts_with("/sys/fs/cgroup"));
    }

    #[test]
    fn unified_mode_rejects_multi_entry_paths() {
        let detector = FakeDetector {
            unified: true,
            hybrid: false,
            systemd: true,
        };
        let paths = path_map(&[("cpu", "/a"), ("memory", "/b")]);
        let result = new_with_paths(CgroupSpec::default(), Some(paths), &detector);
        assert!(matches!(result, Err(CordonError::Config { .. })));
    }
}
