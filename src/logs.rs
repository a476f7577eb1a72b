//! Log file allocation for supervised processes.
//!
//! The supervised process never opens its own stdio sinks. The log pipe
//! pre-opens `<proc>.out.log` and `<proc>.err.log` append-only and hands
//! the descriptors to the runtime adapter, which wires them as the
//! container's stdout and stderr. Files are opened with
//! `O_CREAT | O_APPEND | O_WRONLY` and never truncated, so content from
//! previous runs survives a restart.

use crate::constants::{PRIVATE_DIR_MODE, PRIVATE_FILE_MODE};
use crate::error::{Error, Result};
use crate::paths::Paths;
use std::fs::{DirBuilder, File, OpenOptions};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

/// Pre-opened stdio sinks for one supervised process.
#[derive(Debug)]
pub struct LogPipe {
    stdout: File,
    stderr: File,
    stderr_path: PathBuf,
}

impl LogPipe {
    /// Creates the job log directory and opens both process sinks.
    pub fn open(paths: &Paths) -> Result<Self> {
        create_dir_private(&paths.job_log_dir())?;
        Ok(Self {
            stdout: open_append(&paths.stdout_log())?,
            stderr: open_append(&paths.stderr_log())?,
            stderr_path: paths.stderr_log(),
        })
    }

    /// Duplicate handles suitable for wiring as a child's stdio.
    pub fn stdio(&self) -> Result<(File, File)> {
        let stdout = self
            .stdout
            .try_clone()
            .map_err(|e| Error::io("stdout log handle", e))?;
        let stderr = self
            .stderr
            .try_clone()
            .map_err(|e| Error::io("stderr log handle", e))?;
        Ok((stdout, stderr))
    }

    /// Where the stderr sink lives on disk.
    pub fn stderr_path(&self) -> &Path {
        &self.stderr_path
    }
}

/// Opens the supervisor's own structured log for appending.
pub fn open_bpm_log(paths: &Paths) -> Result<File> {
    create_dir_private(&paths.job_log_dir())?;
    open_append(&paths.bpm_log())
}

/// Opens a file create-if-missing, append-only, mode 0600.
pub fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .mode(PRIVATE_FILE_MODE)
        .open(path)
        .map_err(|e| Error::io(path, e))
}

/// Recursively creates a directory restricted to the supervisor's user.
pub fn create_dir_private(path: &Path) -> Result<()> {
    DirBuilder::new()
        .recursive(true)
        .mode(PRIVATE_DIR_MODE)
        .create(path)
        .map_err(|e| Error::io(path, e))
}
