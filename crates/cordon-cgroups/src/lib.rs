//! # cordon-cgroups
//!
//! Resource confinement for the Cordon runtime: maps a declarative
//! [`CgroupSpec`](cordon_common::types::CgroupSpec) onto live kernel
//! control-group state.
//!
//! The host may expose the legacy (v1) hierarchy, the unified (v2)
//! hierarchy, or a hybrid of both, and may or may not run systemd. The
//! [`manager`] factory picks exactly one of four mutually incompatible
//! placement strategies based on the [`hierarchy`] probes:
//!
//! - [`fs::LegacyFsManager`] — per-controller cgroupfs v1 writes.
//! - [`fs2::UnifiedFsManager`] — single unified-hierarchy directory.
//! - [`systemd::LegacyManager`] / [`systemd::UnifiedManager`] — transient
//!   scope/slice units created over the D-Bus API.

pub mod fs;
pub mod fs2;
pub mod hierarchy;
pub mod manager;
pub mod procfile;
pub mod procs;
pub mod systemd;

pub use manager::CgroupManager;
