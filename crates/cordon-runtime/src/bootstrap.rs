//! Process bootstrap and the parent/child synchronization protocol.
//!
//! The parent spawns the re-exec'd init, places its PID into the
//! container's cgroup, and only then releases the child by writing the
//! bootstrap payload into their private stream pair. The child must
//! never observe it is free to continue before it has been confined.

use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::RawFd;
use std::os::unix::net::UnixStream;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command};
use std::sync::mpsc;

use serde::{Deserialize, Serialize};

use cordon_cgroups::CgroupManager;
use cordon_common::error::{CordonError, Result};

/// What the parent sends down the init pipe once placement succeeded.
///
/// Serialized as a single JSON line; the write doubles as the release
/// signal, so the child learns its entrypoint and its permission to
/// continue in one read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapPayload {
    /// Entrypoint argv.
    pub args: Vec<String>,
    /// Extra environment for the entrypoint.
    pub env: Vec<(String, String)>,
    /// Working directory for the entrypoint.
    pub cwd: Option<std::path::PathBuf>,
}

impl BootstrapPayload {
    /// Encodes the payload as one newline-terminated JSON line.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }
}

/// Protocol state of one process-start call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    /// Descriptor constructed, nothing spawned yet.
    Created,
    /// Child spawned; cgroup placement pending.
    Started,
    /// Cgroup placement succeeded.
    CgroupApplied,
    /// Bootstrap payload written; child free to continue.
    Released,
    /// Handshake finished, success or failure. Terminal.
    Exited,
}

/// Two ends of one connected byte-stream.
///
/// The child end is transferred to the spawned process; the parent
/// retains the other. Each end is closed exactly once, enforced by
/// ownership.
#[derive(Debug)]
pub struct FilePair {
    /// End retained by the parent.
    pub parent: UnixStream,
    /// End inherited by the child.
    pub child: UnixStream,
}

impl FilePair {
    /// Allocates a connected stream pair, both ends close-on-exec.
    ///
    /// # Errors
    ///
    /// Returns an error if the socketpair cannot be created.
    pub fn new() -> Result<Self> {
        let (parent, child) = UnixStream::pair().map_err(|e| CordonError::Sync {
            message: format!("unable to create init pipe: {e}"),
        })?;
        Ok(Self { parent, child })
    }
}

/// Arranges for `mappings` of `(source, target)` descriptors to be in
/// place in the child after fork, clearing close-on-exec on each
/// target. Sources are first parked above the highest target so a
/// source is never clobbered before it is copied.
pub fn map_inherited_fds(cmd: &mut Command, mappings: Vec<(RawFd, RawFd)>) {
    let Some(max_target) = mappings.iter().map(|&(_, t)| t).max() else {
        return;
    };
    let mut parked = vec![0 as RawFd; mappings.len()];
    // SAFETY: the closure runs between fork and exec and performs only
    // async-signal-safe calls (fcntl, dup2); the scratch buffer is
    // allocated beforehand.
    #[allow(unsafe_code)]
    unsafe {
        let _ = cmd.pre_exec(move || {
            for (&(src, _), slot) in mappings.iter().zip(parked.iter_mut()) {
                let moved = libc::fcntl(src, libc::F_DUPFD_CLOEXEC, max_target + 1);
                if moved < 0 {
                    return Err(std::io::Error::last_os_error());
                }
                *slot = moved;
            }
            for (&(_, target), &moved) in mappings.iter().zip(parked.iter()) {
                // dup2 clears close-on-exec on the target descriptor.
                if libc::dup2(moved, target) < 0 {
                    return Err(std::io::Error::last_os_error());
                }
            }
            Ok(())
        });
    }
}

/// One process-start call: the spawn, the cgroup handoff, and the
/// readiness handshake.
pub struct InitProcess<'a> {
    cmd: Command,
    /// Taken on the first [`InitProcess::start`]; a second call fails.
    pair: Option<FilePair>,
    manager: &'a dyn CgroupManager,
    payload: Vec<u8>,
    /// Parent-side copies of descriptors the child inherits; dropped
    /// right after the spawn.
    inherited: Vec<File>,
    state: BootstrapState,
}

impl<'a> InitProcess<'a> {
    /// Binds a prepared command to a stream pair and a manager.
    #[must_use]
    pub fn new(
        cmd: Command,
        pair: FilePair,
        manager: &'a dyn CgroupManager,
        payload: Vec<u8>,
        inherited: Vec<File>,
    ) -> Self {
        Self {
            cmd,
            pair: Some(pair),
            manager,
            payload,
            inherited,
            state: BootstrapState::Created,
        }
    }

    /// Runs the bootstrap protocol to completion.
    ///
    /// On success the child has been confined, released, and has
    /// acknowledged readiness; the returned handle is not waited on,
    /// child completion is observed separately by the caller. On any
    /// failure the child is killed and reaped before returning. Either
    /// way the protocol ends in [`BootstrapState::Exited`] and a second
    /// call is an error.
    ///
    /// # Errors
    ///
    /// Propagates the manager's placement error untouched; spawn and
    /// handshake failures surface as [`CordonError::Sync`].
    pub fn start(&mut self) -> Result<Child> {
        let pair = self.pair.take().ok_or_else(|| CordonError::Sync {
            message: "bootstrap handshake already ran".into(),
        })?;
        let mut child = match self.cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                self.state = BootstrapState::Exited;
                return Err(CordonError::Sync {
                    message: format!("unable to start init: {err}"),
                });
            }
        };
        self.state = BootstrapState::Started;

        // Close our copies of everything the child inherited, most
        // importantly its end of the pair, so a read on ours observes
        // EOF if the child exits instead of blocking forever.
        drop(pair.child);
        self.inherited.clear();

        #[allow(clippy::cast_possible_wrap)]
        let pid = child.id() as i32;
        tracing::debug!(pid, "container init spawned");

        let parent = pair.parent;
        let ready = match parent.try_clone() {
            Ok(reader) => init_waiter(reader),
            Err(err) => {
                let message = format!("unable to clone init pipe: {err}");
                return Err(self.abort(&mut child, CordonError::Sync { message }));
            }
        };

        if let Err(err) = self.manager.apply(pid) {
            return Err(self.abort(&mut child, err));
        }
        self.state = BootstrapState::CgroupApplied;
        tracing::debug!(pid, "cgroup configuration applied");

        let payload = std::mem::take(&mut self.payload);
        if let Err(err) = (&parent).write_all(&payload) {
            let message = format!("can't copy bootstrap data to pipe: {err}");
            return Err(self.abort(&mut child, CordonError::Sync { message }));
        }
        self.state = BootstrapState::Released;

        match ready.recv() {
            Ok(Ok(())) => {
                self.state = BootstrapState::Exited;
                tracing::debug!(pid, "init acknowledged readiness");
                Ok(child)
            }
            Ok(Err(err)) => {
                let message = format!("container init exited before signaling readiness: {err}");
                Err(self.abort(&mut child, CordonError::Sync { message }))
            }
            Err(_) => {
                let message = "readiness reader terminated unexpectedly".to_owned();
                Err(self.abort(&mut child, CordonError::Sync { message }))
            }
        }
    }

    /// Kills and reaps a child that will never be released, moving the
    /// protocol to its terminal state.
    fn abort(&mut self, child: &mut Child, err: CordonError) -> CordonError {
        kill_and_reap(child);
        self.state = BootstrapState::Exited;
        err
    }

    /// Returns the protocol state; terminal once [`InitProcess::start`]
    /// has returned, success or failure.
    #[must_use]
    pub fn state(&self) -> BootstrapState {
        self.state
    }
}

/// Spawns the background reader that waits for the child's single
/// readiness byte, delivering the outcome over a one-shot channel.
/// The reader terminates on stream closure as well as on a successful
/// read, so it cannot leak.
fn init_waiter(stream: UnixStream) -> mpsc::Receiver<std::io::Result<()>> {
    let (tx, rx) = mpsc::channel();
    let _ = std::thread::spawn(move || {
        let mut byte = [0_u8; 1];
        let result = (&stream).read_exact(&mut byte);
        let _ = tx.send(result);
    });
    rx
}

/// Best-effort cleanup of a child that will never be released.
fn kill_and_reap(child: &mut Child) {
    if let Err(err) = child.kill() {
        tracing::debug!(pid = child.id(), %err, "kill after failed bootstrap");
    }
    let _ = child.wait();
}
