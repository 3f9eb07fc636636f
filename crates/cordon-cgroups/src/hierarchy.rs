//! Host cgroup hierarchy and init-system detection.
//!
//! Each probe runs exactly once per process lifetime and caches its
//! boolean result; concurrent first callers block until the single
//! probe completes. The detector is an explicitly constructed object
//! injected into the [`crate::manager`] factory so tests can
//! substitute a fake.

use std::path::Path;
use std::sync::OnceLock;

use nix::sys::statfs::{self, CGROUP2_SUPER_MAGIC};

use cordon_common::constants::{HYBRID_MOUNTPOINT, SYSTEMD_RUN_DIR, UNIFIED_MOUNTPOINT};

/// Read-only view of the host's cgroup hierarchy layout.
pub trait HierarchyDetector: Send + Sync {
    /// Returns whether the host runs the cgroup v2 unified hierarchy.
    fn is_unified(&self) -> bool;

    /// Returns whether the host runs v2 alongside a residual v1
    /// compatibility mount.
    fn is_hybrid(&self) -> bool;

    /// Returns whether systemd is present on the host.
    fn is_systemd_running(&self) -> bool;
}

/// Detector backed by filesystem probes of the live host.
#[derive(Debug, Default)]
pub struct HostDetector {
    unified: OnceLock<bool>,
    hybrid: OnceLock<bool>,
    systemd: OnceLock<bool>,
}

impl HostDetector {
    /// Creates a detector with all probes pending.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            unified: OnceLock::new(),
            hybrid: OnceLock::new(),
            systemd: OnceLock::new(),
        }
    }
}

impl HierarchyDetector for HostDetector {
    #[allow(clippy::panic)]
    fn is_unified(&self) -> bool {
        *self.unified.get_or_init(|| {
            match statfs::statfs(UNIFIED_MOUNTPOINT) {
                Ok(st) => st.filesystem_type() == CGROUP2_SUPER_MAGIC,
                Err(err) => {
                    if err == nix::errno::Errno::ENOENT && running_in_user_ns() {
                        // A nested user namespace may legitimately hide the
                        // mount point; assume cgroup v1.
                        tracing::debug!(
                            mountpoint = UNIFIED_MOUNTPOINT,
                            %err,
                            "mount point missing, assuming cgroup v1"
                        );
                        false
                    } else {
                        // Continuing with an unknown hierarchy mode risks
                        // silently running unconfined.
                        panic!("cannot statfs cgroup root: {err}");
                    }
                }
            }
        })
    }

    fn is_hybrid(&self) -> bool {
        *self.hybrid.get_or_init(|| match statfs::statfs(HYBRID_MOUNTPOINT) {
            Ok(st) => st.filesystem_type() == CGROUP2_SUPER_MAGIC,
            Err(err) => {
                if err != nix::errno::Errno::ENOENT {
                    tracing::debug!(mountpoint = HYBRID_MOUNTPOINT, %err, "statfs failed");
                }
                false
            }
        })
    }

    fn is_systemd_running(&self) -> bool {
        *self.systemd.get_or_init(|| {
            std::fs::symlink_metadata(SYSTEMD_RUN_DIR).is_ok_and(|m| m.is_dir())
        })
    }
}

/// Returns whether the current process runs inside a user namespace,
/// judged by `/proc/self/uid_map` deviating from the identity mapping.
fn running_in_user_ns() -> bool {
    uid_map_in_user_ns(Path::new("/proc/self/uid_map"))
}

fn uid_map_in_user_ns(path: &Path) -> bool {
    let Ok(content) = std::fs::read_to_string(path) else {
        // An unmapped namespace reads as empty; a missing file means the
        // kernel has no user namespace support at all.
        return false;
    };
    let mut fields = content.split_whitespace();
    let (Some(inside), Some(outside), Some(count)) =
        (fields.next(), fields.next(), fields.next())
    else {
        return true;
    };
    // The host identity mapping is exactly "0 0 4294967295".
    !(inside == "0" && outside == "0" && count == "4294967295")
}
