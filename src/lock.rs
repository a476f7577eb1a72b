//! Advisory file locking for mutating operations.
//!
//! Concurrent `bpm` invocations on the same `(job, process)` pair are
//! serialised with an exclusive `flock` on a per-process lock file. The
//! lock is advisory: it only coordinates bpm with itself. Acquisition is
//! non-blocking and retried inside a bounded window; a holder that does
//! not yield in time surfaces as [`Error::Busy`]. The kernel releases the
//! lock when the file is closed, so a crashed invocation never wedges the
//! process.

use crate::constants::{LOCK_ACQUIRE_TIMEOUT, LOCK_RETRY_INTERVAL, PRIVATE_FILE_MODE};
use crate::error::{Error, Result};
use crate::logs::create_dir_private;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::debug;

/// Held exclusive lock; released on drop.
#[derive(Debug)]
pub struct LockFile {
    file: File,
    path: PathBuf,
}

impl LockFile {
    /// Acquires the lock, retrying within the configured window.
    ///
    /// `id` names the container in the [`Error::Busy`] surfaced when the
    /// window elapses without acquisition.
    pub async fn acquire(path: &Path, id: &str) -> Result<Self> {
        if let Some(parent) = path.parent() {
            create_dir_private(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .mode(PRIVATE_FILE_MODE)
            .open(path)
            .map_err(|e| Error::io(path, e))?;

        let deadline = Instant::now() + LOCK_ACQUIRE_TIMEOUT;
        loop {
            match try_flock(&file) {
                Ok(()) => break,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(Error::Busy { id: id.to_string() });
                    }
                    tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
                }
                Err(e) => return Err(Error::io(path, e)),
            }
        }

        debug!(lock = %path.display(), "acquired lock");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        // The kernel would release on close anyway; unlock explicitly so
        // the file handle's lifetime does not matter.
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
        debug!(lock = %self.path.display(), "released lock");
    }
}

/// One non-blocking exclusive flock attempt.
fn try_flock(file: &File) -> std::io::Result<()> {
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}
