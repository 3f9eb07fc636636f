//! Writing PIDs into `cgroup.procs` process-list files.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use cordon_common::constants::CGROUP_PROCS;
use cordon_common::error::{CordonError, Result};

/// Sentinel PID meaning "create only, attach nothing".
pub const NO_PID: i32 = -1;

/// Bounded attempts for a single process-list write.
const WRITE_ATTEMPTS: u32 = 5;

/// Fixed backoff between attempts.
const WRITE_RETRY_DELAY: Duration = Duration::from_millis(30);

/// Writes `pid` into `<dir>/cgroup.procs`.
///
/// A `pid` of [`NO_PID`] is a guaranteed no-op regardless of path. An
/// empty `dir` fails: it means the controller is not mounted, and a
/// silent success here would leave the process unconfined.
///
/// The write retries on `EINVAL`, which the kernel can return
/// transiently while the target task is still in an early,
/// not-yet-schedulable state.
///
/// # Errors
///
/// Returns [`CordonError::Placement`] if the file cannot be opened or
/// the write still fails once the bounded attempts are exhausted.
pub fn write_cgroup_procs(dir: &Path, pid: i32) -> Result<()> {
    if dir.as_os_str().is_empty() {
        return Err(CordonError::Placement {
            path: dir.to_path_buf(),
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no such directory for {CGROUP_PROCS}"),
            ),
        });
    }
    if pid == NO_PID {
        return Ok(());
    }

    let procs_path = dir.join(CGROUP_PROCS);
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .open(&procs_path)
        .map_err(|e| CordonError::Placement {
            path: procs_path.clone(),
            source: e,
        })?;

    write_with_retry(|| file.write_all(pid.to_string().as_bytes())).map_err(|e| {
        CordonError::Placement {
            path: procs_path,
            source: e,
        }
    })
}

/// Runs `write` up to [`WRITE_ATTEMPTS`] times, sleeping
/// [`WRITE_RETRY_DELAY`] after each `EINVAL`, and surfaces any other
/// error immediately.
///
/// Factored out so tests can drive the retry policy with an injected
/// writer instead of a live cgroupfs.
pub(crate) fn write_with_retry(
    mut write: impl FnMut() -> std::io::Result<()>,
) -> std::io::Result<()> {
    let mut last = std::io::Error::from_raw_os_error(libc::EINVAL);
    for _ in 0..WRITE_ATTEMPTS {
        match write() {
            Ok(()) => return Ok(()),
            Err(e) if e.raw_os_error() == Some(libc::EINVAL) => {
                std::thread::sleep(WRITE_RETRY_DELAY);
                last = e;
            }
            Err(e) => return Err(e),
        }
    }
    Err(last)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn no_pid_is_a_noop_for_any_path() {
        write_cgroup_procs(Path::new("/nonexistent/cgroup/dir"), NO_PID).unwrap();
    }

    #[test]
    fn empty_dir_fails() {
        let err = write_cgroup_procs(Path::new(""), 1234).unwrap_err();
        assert!(matches!(err, CordonError::Placement { .. }));
    }

    #[test]
    fn retry_is_bounded_on_einval() {
        let mut attempts = 0;
        let err = write_with_retry(|| {
            attempts += 1;
            Err(std::io::Error::from_raw_os_error(libc::EINVAL))
        })
        .unwrap_err();
        assert_eq!(attempts, 5);
        assert_eq!(err.raw_os_error(), Some(libc::EINVAL));
    }

    #[test]
    fn non_transient_error_surfaces_immediately() {
        let mut attempts = 0;
        let err = write_with_retry(|| {
            attempts += 1;
            Err(std::io::Error::from_raw_os_error(libc::EACCES))
        })
        .unwrap_err();
        assert_eq!(attempts, 1);
        assert_eq!(err.raw_os_error(), Some(libc::EACCES));
    }

    #[test]
    fn transient_then_success() {
        let mut attempts = 0;
        write_with_retry(|| {
            attempts += 1;
            if attempts < 3 {
                Err(std::io::Error::from_raw_os_error(libc::EINVAL))
            } else {
                Ok(())
            }
        })
        .unwrap();
        assert_eq!(attempts, 3);
    }
}
