//! Externally-supplied process descriptor.

use std::fs::File;
use std::path::PathBuf;
use std::process::Stdio;

/// Describes the process to run inside the container.
///
/// Standard stream bindings default to inheriting the parent's;
/// `extra_files` are inherited by the child starting at descriptor 3,
/// in order, below the runtime's own bootstrap descriptors.
#[derive(Debug, Default)]
pub struct Process {
    /// Entrypoint argv; `args[0]` is the binary.
    pub args: Vec<String>,

    /// Extra environment for the entrypoint.
    pub env: Vec<(String, String)>,

    /// Working directory of the entrypoint.
    pub cwd: Option<PathBuf>,

    /// Whether this is the container's init process.
    pub init: bool,

    /// Standard input binding.
    pub stdin: Option<Stdio>,

    /// Standard output binding.
    pub stdout: Option<Stdio>,

    /// Standard error binding.
    pub stderr: Option<Stdio>,

    /// Additional descriptors the child inherits.
    pub extra_files: Vec<File>,
}

impl Process {
    /// Creates an init-process descriptor for the given argv.
    #[must_use]
    pub fn init(args: Vec<String>) -> Self {
        Self {
            args,
            init: true,
            ..Self::default()
        }
    }
}
