//! Domain types shared across the Cordon workspace.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for a container instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a new container ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random container ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Value of an additional init-system unit property.
///
/// A closed set covering the variant types systemd accepts for the
/// properties a runtime passes through from annotations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropValue {
    /// Boolean property value.
    Bool(bool),
    /// Unsigned 32-bit property value.
    U32(u32),
    /// Unsigned 64-bit property value.
    U64(u64),
    /// String property value.
    Str(String),
    /// List of unsigned 32-bit values (e.g. `PIDs=`).
    U32List(Vec<u32>),
}

/// One additional unit property forwarded to the init system verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitProperty {
    /// Property name as systemd spells it (e.g. `TimeoutStopUSec`).
    pub name: String,
    /// Property value.
    pub value: PropValue,
}

/// Declarative identity of the cgroup a container is confined in.
///
/// Created once from external configuration, before any manager exists.
/// `path` is an explicit filesystem path relative to the cgroup mount
/// root; when an init-system driver is used it takes effect instead of
/// `parent`/`name`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CgroupSpec {
    /// Name of the cgroup (or full unit name for init-system drivers).
    pub name: String,

    /// Parent cgroup, or slice to place the unit under.
    pub parent: String,

    /// Explicit path of the cgroup relative to the mount root.
    pub path: String,

    /// Prefix for generated scope unit names.
    pub scope_prefix: String,

    /// Whether systemd should be asked to manage the cgroup.
    pub systemd: bool,

    /// Whether the caller runs without full host privilege, making some
    /// cgroup operations expected to fail benignly.
    pub rootless: bool,

    /// Host UID that should own the cgroup, or `None` for the default.
    pub owner_uid: Option<u32>,

    /// Additional unit properties, appended after the generated ones.
    /// Ignored unless `systemd` is set.
    #[serde(skip)]
    pub systemd_props: Vec<UnitProperty>,

    /// Resource limits owned by this spec. Only placement consumes them
    /// in the confinement core; limit application happens elsewhere.
    pub resources: ResourceLimits,
}

/// A block-device throttle entry (`major:minor rate`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleDevice {
    /// Device major number.
    pub major: i64,
    /// Device minor number.
    pub minor: i64,
    /// Rate in bytes or IOs per second, depending on the list.
    pub rate: u64,
}

/// A huge-page limit entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HugepageLimit {
    /// Page size as the kernel spells it (e.g. `2MB`).
    pub page_size: String,
    /// Limit in bytes.
    pub limit: u64,
}

/// An RDMA limit entry for one HCA.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RdmaLimit {
    /// Device name.
    pub device: String,
    /// Maximum number of HCA handles.
    pub hca_handles: Option<u32>,
    /// Maximum number of HCA objects.
    pub hca_objects: Option<u32>,
}

/// Per-controller resource limits.
///
/// Immutable after manager construction; the confinement core only
/// performs process placement, so these travel alongside the spec for
/// the controllers that pre-configure parents during `apply`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Memory limit in bytes.
    pub memory: Option<i64>,
    /// Memory soft reservation in bytes.
    pub memory_reservation: Option<i64>,
    /// Memory plus swap limit in bytes.
    pub memory_swap: Option<i64>,

    /// CPU shares (relative weight).
    pub cpu_shares: Option<u64>,
    /// CPU hardcap quota per period, in microseconds.
    pub cpu_quota: Option<i64>,
    /// CPU hardcap period, in microseconds.
    pub cpu_period: Option<u64>,
    /// CPUs to use within the cpuset (cgroup cpuset syntax).
    pub cpuset_cpus: Option<String>,
    /// Memory nodes to use within the cpuset.
    pub cpuset_mems: Option<String>,

    /// Maximum number of pids, or unlimited when `None`.
    pub pids_limit: Option<i64>,

    /// Block-IO relative weight.
    pub blkio_weight: Option<u16>,
    /// Read bytes-per-second throttles.
    pub blkio_throttle_read_bps: Vec<ThrottleDevice>,
    /// Write bytes-per-second throttles.
    pub blkio_throttle_write_bps: Vec<ThrottleDevice>,

    /// Huge-page limits.
    pub hugetlb: Vec<HugepageLimit>,

    /// RDMA limits keyed by device.
    pub rdma: Vec<RdmaLimit>,

    /// Network classifier ID for `net_cls`.
    pub net_cls_classid: Option<u32>,
    /// Network priority map entries for `net_prio`.
    pub net_prio_ifpriomap: Vec<String>,

    /// Raw key/value passthrough for the unified hierarchy, applied
    /// verbatim to the named control files.
    pub unified: HashMap<String, String>,
}

/// Lifecycle state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerState {
    /// Container has been created but not yet started.
    Created,
    /// Container is actively running.
    Running,
    /// Container has been stopped.
    Stopped,
    /// Container encountered a fatal error.
    Failed,
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_id_roundtrip() {
        let id = ContainerId::new("abc123");
        assert_eq!(id.as_str(), "abc123");
        assert_eq!(id.to_string(), "abc123");
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(ContainerId::generate(), ContainerId::generate());
    }

    #[test]
    fn default_spec_is_plain_cgroupfs() {
        let spec = CgroupSpec::default();
        assert!(!spec.systemd);
        assert!(!spec.rootless);
        assert!(spec.path.is_empty());
    }
}
