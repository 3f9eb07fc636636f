//! Child side of the bootstrap protocol.
//!
//! Runs inside the re-exec'd `init` stage: consumes the bootstrap
//! payload from the init pipe, signals readiness back, parks on the
//! exec barrier, and finally execs the user's entrypoint.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::os::fd::{AsFd, FromRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::os::unix::process::CommandExt;
use std::process::Command;

use nix::fcntl::{FcntlArg, OFlag, fcntl};

use cordon_common::constants::{FIFOFD_ENV, INITPIPE_ENV, STATEDIR_ENV};
use cordon_common::error::{CordonError, Result};

use crate::bootstrap::BootstrapPayload;

/// Runs the init stage to the point of exec.
///
/// Returns only on failure; on success the entrypoint has replaced
/// this process image.
///
/// # Errors
///
/// Returns an error if the inherited descriptors are missing or
/// malformed, the payload cannot be read, or the exec fails.
pub fn run_init() -> Result<()> {
    let initpipe_fd = env_fd(INITPIPE_ENV)?;
    let fifo_fd = env_fd(FIFOFD_ENV)?;
    let state_dir = std::env::var(STATEDIR_ENV).unwrap_or_default();
    tracing::debug!(initpipe_fd, fifo_fd, %state_dir, "init stage running");

    // SAFETY: the parent placed these descriptors at the indices named
    // in the environment and nothing else in this process owns them.
    #[allow(unsafe_code)]
    let pipe = unsafe { UnixStream::from_raw_fd(initpipe_fd) };
    #[allow(unsafe_code)]
    let fifo = unsafe { File::from_raw_fd(fifo_fd) };

    let payload = read_payload(BufReader::new(&pipe))?;

    (&pipe).write_all(b"0").map_err(|e| CordonError::Sync {
        message: format!("unable to signal readiness: {e}"),
    })?;
    drop(pipe);

    park_on_barrier(&fifo)?;
    drop(fifo);

    exec_entrypoint(&payload)
}

/// Reads and decodes the single JSON payload line from the init pipe.
///
/// The read blocks until the parent writes, which is the release
/// signal that placement has finished.
fn read_payload(mut reader: impl BufRead) -> Result<BootstrapPayload> {
    let mut line = String::new();
    let n = reader.read_line(&mut line).map_err(|e| CordonError::Sync {
        message: format!("unable to read bootstrap payload: {e}"),
    })?;
    if n == 0 {
        return Err(CordonError::Sync {
            message: "init pipe closed before bootstrap payload arrived".into(),
        });
    }
    Ok(serde_json::from_str(line.trim_end())?)
}

/// Blocks on the exec barrier until the runtime writes the go byte.
///
/// The inherited handle was opened non-blocking; the flag is cleared
/// here so the read parks instead of spinning.
fn park_on_barrier(fifo: &File) -> Result<()> {
    let barrier_err = |e: std::io::Error| CordonError::Sync {
        message: format!("waiting on exec barrier: {e}"),
    };
    let flags = fcntl(fifo.as_fd(), FcntlArg::F_GETFL)
        .map_err(|e| barrier_err(e.into()))?;
    let flags = OFlag::from_bits_truncate(flags) & !OFlag::O_NONBLOCK;
    let _ = fcntl(fifo.as_fd(), FcntlArg::F_SETFL(flags)).map_err(|e| barrier_err(e.into()))?;

    let mut byte = [0_u8; 1];
    let mut reader = fifo;
    reader.read_exact(&mut byte).map_err(barrier_err)?;
    Ok(())
}

/// Replaces this process with the entrypoint described by `payload`.
fn exec_entrypoint(payload: &BootstrapPayload) -> Result<()> {
    let Some((program, args)) = payload.args.split_first() else {
        return Err(CordonError::Config {
            message: "bootstrap payload names no entrypoint".into(),
        });
    };
    let mut cmd = Command::new(program);
    let _ = cmd.args(args);
    for (key, value) in &payload.env {
        let _ = cmd.env(key, value);
    }
    if let Some(cwd) = &payload.cwd {
        let _ = cmd.current_dir(cwd);
    }
    let err = cmd.exec();
    Err(CordonError::Sync {
        message: format!("unable to exec {program}: {err}"),
    })
}

/// Parses a descriptor index out of the named environment variable.
fn env_fd(name: &'static str) -> Result<RawFd> {
    let value = std::env::var(name).map_err(|_| CordonError::Sync {
        message: format!("{name} not set, not invoked by the runtime"),
    })?;
    value.parse().map_err(|_| CordonError::Sync {
        message: format!("{name} holds no descriptor index: {value:?}"),
    })
}
