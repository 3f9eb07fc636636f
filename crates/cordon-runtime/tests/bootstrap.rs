//! End-to-end exercise of the parent/child bootstrap handshake with a
//! stub placement manager and a real shell child.

#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::process::Command;

use cordon_cgroups::CgroupManager;
use cordon_common::error::{CordonError, Result};
use cordon_runtime::bootstrap::{
    BootstrapPayload, BootstrapState, FilePair, InitProcess, map_inherited_fds,
};

struct StubManager {
    fail: bool,
}

impl CgroupManager for StubManager {
    fn apply(&self, _pid: i32) -> Result<()> {
        if self.fail {
            return Err(CordonError::Placement {
                path: PathBuf::from("/sys/fs/cgroup/stub"),
                source: std::io::Error::from_raw_os_error(libc::EACCES),
            });
        }
        Ok(())
    }

    fn paths(&self) -> HashMap<String, PathBuf> {
        HashMap::new()
    }
}

fn payload() -> Vec<u8> {
    BootstrapPayload {
        args: vec!["/bin/true".into()],
        env: Vec::new(),
        cwd: None,
    }
    .encode()
    .unwrap()
}

/// The child sees the payload only after placement succeeded, answers
/// with its readiness byte, and the handshake completes.
#[test]
fn handshake_completes_when_placement_succeeds() {
    let pair = FilePair::new().unwrap();
    let mut cmd = Command::new("sh");
    let _ = cmd
        .arg("-c")
        .arg("head -c 1 <&3 >/dev/null && printf R >&3");
    map_inherited_fds(&mut cmd, vec![(pair.child.as_raw_fd(), 3)]);

    let manager = StubManager { fail: false };
    let mut init = InitProcess::new(cmd, pair, &manager, payload(), Vec::new());
    assert_eq!(init.state(), BootstrapState::Created);
    let mut child = init.start().unwrap();
    assert!(child.wait().unwrap().success());
    assert_eq!(init.state(), BootstrapState::Exited);
}

/// The handshake runs at most once per process-start call.
#[test]
fn second_handshake_attempt_is_rejected() {
    let pair = FilePair::new().unwrap();
    let mut cmd = Command::new("sh");
    let _ = cmd
        .arg("-c")
        .arg("head -c 1 <&3 >/dev/null && printf R >&3");
    map_inherited_fds(&mut cmd, vec![(pair.child.as_raw_fd(), 3)]);

    let manager = StubManager { fail: false };
    let mut init = InitProcess::new(cmd, pair, &manager, payload(), Vec::new());
    let mut child = init.start().unwrap();
    assert!(child.wait().unwrap().success());

    let again = init.start();
    assert!(matches!(again, Err(CordonError::Sync { .. })));
}

/// Placement failure surfaces as the placement error itself, never as
/// a synchronization error, and the child is cleaned up.
#[test]
fn placement_failure_is_reported_as_placement() {
    let pair = FilePair::new().unwrap();
    let mut cmd = Command::new("sh");
    let _ = cmd.arg("-c").arg("read -r _ignored <&3");
    map_inherited_fds(&mut cmd, vec![(pair.child.as_raw_fd(), 3)]);

    let manager = StubManager { fail: true };
    let mut init = InitProcess::new(cmd, pair, &manager, payload(), Vec::new());
    let err = init.start().unwrap_err();
    assert!(matches!(err, CordonError::Placement { .. }), "{err:?}");
    assert_eq!(init.state(), BootstrapState::Exited);
}

/// A child that exits without ever acknowledging readiness turns into
/// a synchronization error, not a hang.
#[test]
fn early_child_exit_is_a_sync_error() {
    let pair = FilePair::new().unwrap();
    let mut cmd = Command::new("sh");
    let _ = cmd.arg("-c").arg("exit 0");
    map_inherited_fds(&mut cmd, vec![(pair.child.as_raw_fd(), 3)]);

    let manager = StubManager { fail: false };
    let mut init = InitProcess::new(cmd, pair, &manager, payload(), Vec::new());
    let err = init.start().unwrap_err();
    assert!(matches!(err, CordonError::Sync { .. }), "{err:?}");
    assert_eq!(init.state(), BootstrapState::Exited);
}
