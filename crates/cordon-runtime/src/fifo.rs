//! The exec barrier: a named FIFO inside the container's state
//! directory that blocks the re-exec'd init until the runtime releases
//! it to execute the user's entrypoint.

use std::fs::File;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use nix::sys::stat::Mode;
use nix::unistd::{Uid, chown, mkfifo};

use cordon_common::constants::EXEC_FIFO_FILENAME;
use cordon_common::error::{CordonError, Result};

/// Creates the exec FIFO in `state_dir`, optionally handing ownership
/// to `owner_uid`.
///
/// # Errors
///
/// Returns an error if the FIFO already exists or cannot be created.
pub fn create_exec_fifo(state_dir: &Path, owner_uid: Option<u32>) -> Result<PathBuf> {
    let path = state_dir.join(EXEC_FIFO_FILENAME);
    if path.exists() {
        return Err(CordonError::Config {
            message: format!("exec fifo {} already exists", path.display()),
        });
    }
    mkfifo(&path, Mode::from_bits_truncate(0o622)).map_err(|e| CordonError::Io {
        path: path.clone(),
        source: e.into(),
    })?;
    if let Some(uid) = owner_uid {
        if let Err(err) = chown(&path, Some(Uid::from_raw(uid)), None) {
            // Leaving the FIFO behind would make a retry fail at the
            // existence check.
            let _ = std::fs::remove_file(&path);
            return Err(CordonError::Io {
                path,
                source: err.into(),
            });
        }
    }
    tracing::debug!(path = %path.display(), "exec fifo created");
    Ok(path)
}

/// Opens a read-only, non-blocking, close-on-exec handle to the FIFO.
///
/// Non-blocking because no writer exists yet; close-on-exec so only
/// the deliberately inherited copy reaches the child.
///
/// # Errors
///
/// Returns an error if the FIFO cannot be opened.
pub fn open_exec_fifo(path: &Path) -> Result<File> {
    std::fs::OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK | libc::O_CLOEXEC)
        .open(path)
        .map_err(|e| CordonError::Io {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Releases the process parked on the FIFO by writing the go byte.
///
/// The write side opens non-blocking, so a FIFO with no reader (the
/// parked process is gone) reports `ENXIO` instead of hanging.
///
/// # Errors
///
/// Returns an error if no reader is parked on the FIFO or the write
/// fails.
pub fn signal_exec_fifo(path: &Path) -> Result<()> {
    use std::io::Write;

    let mut fifo = std::fs::OpenOptions::new()
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
        .map_err(|e| CordonError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
    fifo.write_all(b"0").map_err(|e| CordonError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn creates_and_opens_the_fifo() {
        let dir = tempfile::tempdir().unwrap();
        let path = create_exec_fifo(dir.path(), None).unwrap();
        assert_eq!(path.file_name().unwrap(), EXEC_FIFO_FILENAME);
        let _handle = open_exec_fifo(&path).unwrap();
    }

    #[test]
    fn refuses_to_clobber_an_existing_fifo() {
        let dir = tempfile::tempdir().unwrap();
        let _ = create_exec_fifo(dir.path(), None).unwrap();
        assert!(create_exec_fifo(dir.path(), None).is_err());
    }

    #[test]
    fn signal_reaches_a_parked_reader() {
        use std::io::Read;

        let dir = tempfile::tempdir().unwrap();
        let path = create_exec_fifo(dir.path(), None).unwrap();
        let reader = open_exec_fifo(&path).unwrap();
        signal_exec_fifo(&path).unwrap();

        let mut byte = [0_u8; 1];
        let mut reader = &reader;
        reader.read_exact(&mut byte).unwrap();
        assert_eq!(&byte, b"0");
    }

    #[test]
    fn signal_without_a_reader_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = create_exec_fifo(dir.path(), None).unwrap();
        assert!(signal_exec_fifo(&path).is_err());
    }
}
