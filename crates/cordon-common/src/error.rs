//! Unified error types for the Cordon workspace.
//!
//! Each variant corresponds to one failure class of the confinement core;
//! higher-level crates wrap these rather than defining parallel enums.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum CordonError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid or contradictory.
    ///
    /// Never retried: the same spec will fail the same way.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// Failed to create or join a cgroup directory, or to write a
    /// process-list file.
    #[error("cgroup placement failed at {path}: {source}")]
    Placement {
        /// Cgroup path where placement failed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A call to the init-system bus failed.
    #[error("systemd bus error: {message}")]
    Bus {
        /// Description of the bus failure.
        message: String,
    },

    /// The bootstrap handshake with the container init process failed.
    #[error("bootstrap synchronization failed: {message}")]
    Sync {
        /// Description of the handshake failure.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// Serialization or deserialization of container state failed.
    #[error("state serialization error: {source}")]
    State {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl CordonError {
    /// Returns whether the underlying cause is a permission-class error:
    /// EPERM, EACCES, or EROFS (what an unprivileged user sees on a
    /// read-only cgroupfs).
    #[must_use]
    pub fn is_permission(&self) -> bool {
        let source = match self {
            Self::Io { source, .. } | Self::Placement { source, .. } => source,
            _ => return false,
        };
        matches!(
            source.raw_os_error(),
            Some(libc::EPERM | libc::EACCES | libc::EROFS)
        )
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, CordonError>;
