//! Well-known path resolution under the BOSH root.
//!
//! Every path the supervisor touches is derived here from the
//! `(root, job, process)` triple. The resolver is pure: it performs no
//! I/O and its output is fully determined by its input.
//!
//! ```text
//! jobs/<job>/config/bpm.yml                 operator input
//! data/bpm/bundles/<job>/<proc>/            OCI bundle
//! data/bpm/runc/                            runtime private state
//! data/bpm/locks/<job>-<proc>.lock          advisory lock
//! data/<job>/<proc>/                        writable per-process store
//! store/<job>/                              persistent disk store
//! sys/log/<job>/<proc>.out.log              process stdout
//! sys/log/<job>/<proc>.err.log              process stderr
//! sys/log/<job>/bpm.log                     supervisor log
//! sys/run/bpm/<job>/<proc>.pid              external PID
//! ```

use crate::constants::NAME_VALID_CHARS;
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Resolved paths for one `(job, process)` pair.
#[derive(Debug, Clone)]
pub struct Paths {
    root: PathBuf,
    job: String,
    process: String,
}

impl Paths {
    /// Creates a resolver, validating both names.
    pub fn new(root: impl Into<PathBuf>, job: &str, process: &str) -> Result<Self> {
        validate_name(job)?;
        validate_name(process)?;
        Ok(Self {
            root: root.into(),
            job: job.to_string(),
            process: process.to_string(),
        })
    }

    /// The BOSH root this resolver is anchored at.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The job name.
    pub fn job(&self) -> &str {
        &self.job
    }

    /// The process name.
    pub fn process(&self) -> &str {
        &self.process
    }

    /// Deterministic container ID handed to the OCI runtime.
    pub fn container_id(&self) -> String {
        format!("{}-{}", self.job, self.process)
    }

    // =========================================================================
    // Bundle
    // =========================================================================

    /// Directory holding `config.json` and `rootfs/` for this process.
    pub fn bundle_dir(&self) -> PathBuf {
        bundles_root(&self.root).join(&self.job).join(&self.process)
    }

    /// The container root filesystem inside the bundle.
    pub fn rootfs_dir(&self) -> PathBuf {
        self.bundle_dir().join("rootfs")
    }

    /// The OCI runtime spec inside the bundle.
    pub fn bundle_config(&self) -> PathBuf {
        self.bundle_dir().join("config.json")
    }

    // =========================================================================
    // Runtime State
    // =========================================================================

    /// Single-line decimal PID of the container init process.
    pub fn pidfile(&self) -> PathBuf {
        self.root
            .join("sys")
            .join("run")
            .join("bpm")
            .join(&self.job)
            .join(format!("{}.pid", self.process))
    }

    /// Advisory lock serialising mutating invocations for this process.
    pub fn lock_file(&self) -> PathBuf {
        self.root
            .join("data")
            .join("bpm")
            .join("locks")
            .join(format!("{}-{}.lock", self.job, self.process))
    }

    // =========================================================================
    // Logs
    // =========================================================================

    /// Log directory shared between the supervisor and the job.
    pub fn job_log_dir(&self) -> PathBuf {
        self.root.join("sys").join("log").join(&self.job)
    }

    /// Append-only stdout sink for the supervised process.
    pub fn stdout_log(&self) -> PathBuf {
        self.job_log_dir().join(format!("{}.out.log", self.process))
    }

    /// Append-only stderr sink for the supervised process.
    pub fn stderr_log(&self) -> PathBuf {
        self.job_log_dir().join(format!("{}.err.log", self.process))
    }

    /// The supervisor's own structured log.
    pub fn bpm_log(&self) -> PathBuf {
        self.job_log_dir().join("bpm.log")
    }

    // =========================================================================
    // Job Data
    // =========================================================================

    /// Writable per-process data directory mounted into the container.
    pub fn job_data_dir(&self) -> PathBuf {
        self.root.join("data").join(&self.job).join(&self.process)
    }

    /// Persistent disk store for the job.
    pub fn store_dir(&self) -> PathBuf {
        self.root.join("store").join(&self.job)
    }

    /// Read-only job directory (config, scripts) mounted into the container.
    pub fn jobs_dir(&self) -> PathBuf {
        self.root.join("jobs").join(&self.job)
    }
}

// =============================================================================
// Root-Level Paths
// =============================================================================

/// Directory containing one bundle per `(job, process)` pair.
pub fn bundles_root(root: &Path) -> PathBuf {
    root.join("data").join("bpm").join("bundles")
}

/// Private state directory handed to the runtime via `--root`.
pub fn runtime_root(root: &Path) -> PathBuf {
    root.join("data").join("bpm").join("runc")
}

/// The packaged OCI runtime binary, preferred over PATH lookup.
pub fn runtime_binary(root: &Path) -> PathBuf {
    root.join("packages")
        .join("bpm")
        .join("bin")
        .join("runc")
}

/// Read-only packages tree mounted into every container.
pub fn packages_dir(root: &Path) -> PathBuf {
    root.join("packages")
}

/// Read-only compiled-package data mounted into every container.
pub fn data_packages_dir(root: &Path) -> PathBuf {
    root.join("data").join("packages")
}

// =============================================================================
// Name Validation
// =============================================================================

/// Rejects names that would escape or hide inside the directory layout.
pub fn validate_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| Error::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("name must not be empty"));
    }
    if name.starts_with('.') {
        return Err(invalid("name must not start with a dot"));
    }
    if let Some(c) = name.chars().find(|c| !NAME_VALID_CHARS.contains(*c)) {
        return Err(invalid(&format!("name contains invalid character '{}'", c)));
    }
    Ok(())
}
