//! # cordon-runtime
//!
//! Container lifecycle for the Cordon runtime: spawns a confined
//! process and atomically places it into its cgroup before any
//! application code executes.
//!
//! The ordering guarantee lives in [`bootstrap`]: cgroup placement
//! strictly precedes the bootstrap-payload write, which strictly
//! precedes the child's observed permission to continue.

pub mod bootstrap;
pub mod container;
pub mod fifo;
pub mod init;
pub mod process;
pub mod state;
