//! Lifecycle orchestration for supervised processes.
//!
//! Each user-visible command is one short deterministic transaction over
//! the bundle, the runtime, the pidfile, and the logs:
//!
//! ```text
//! absent → created → running → stopping → stopped → absent
//!          (create)  (start)   (kill)    (wait)   (delete+rmbundle)
//! ```
//!
//! From any non-terminal state, rollback drives directly to `absent`.
//! The orchestrator owns the bundle directory lifetime; the runtime owns
//! its `--root` tree; the pidfile is an observation, not a lock.
//! Teardown order is always runtime state, then bundle, then pidfile.

use crate::bundle::{self, BundleBuilder};
use crate::config::ProcessConfig;
use crate::constants::{
    QUIT_GRACE_TIMEOUT, STATE_POLL_INITIAL, STATE_POLL_MAX, STOP_GRACE_TIMEOUT,
};
use crate::error::{Error, Result};
use crate::lock::LockFile;
use crate::logs::{self, LogPipe};
use crate::paths::{self, Paths};
use crate::runc::{ContainerStatus, RuntimeAdapter, Signal};
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Drives the lifecycle of one `(job, process)` pair.
pub struct Manager {
    paths: Paths,
    config: ProcessConfig,
    runtime: RuntimeAdapter,
}

impl Manager {
    /// Loads the process configuration and resolves all paths.
    pub fn load(root: &Path, job: &str, config_path: &Path) -> Result<Self> {
        let config = ProcessConfig::load(config_path)?;
        let paths = Paths::new(root, job, &config.name)?;
        let runtime = RuntimeAdapter::for_root(root);
        Ok(Self {
            paths,
            config,
            runtime,
        })
    }

    /// The resolved paths for this process.
    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    // =========================================================================
    // start
    // =========================================================================

    /// Builds the bundle and brings the container to `running`.
    ///
    /// Any failure after log allocation rolls the container and bundle
    /// back to `absent`, keeping the log files for diagnosis. `cancel`
    /// aborts the transaction at the next safe point with the same
    /// rollback.
    pub async fn start(&self, cancel: &CancellationToken) -> Result<()> {
        let id = self.paths.container_id();
        info!(
            event = "bpm.start.starting",
            job = self.paths.job(),
            process = self.paths.process()
        );

        match self.runtime.state(&id).await {
            Ok(_) => return Err(Error::AlreadyRunning(id)),
            Err(Error::ContainerNotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let _lock = LockFile::acquire(&self.paths.lock_file(), &id).await?;
        let pipe = LogPipe::open(&self.paths)?;

        match self.launch(&id, &pipe, cancel).await {
            Ok(()) => {
                info!(
                    event = "bpm.start.complete",
                    job = self.paths.job(),
                    process = self.paths.process(),
                    container = id.as_str()
                );
                Ok(())
            }
            Err(e) => {
                warn!(container = id.as_str(), error = %e, "start failed, rolling back");
                self.rollback(&id).await;
                Err(e)
            }
        }
    }

    /// The mutating span of `start`: bundle, create, start, pidfile.
    async fn launch(&self, id: &str, pipe: &LogPipe, cancel: &CancellationToken) -> Result<()> {
        checkpoint(cancel)?;
        BundleBuilder::new(&self.paths).build(&self.config)?;

        checkpoint(cancel)?;
        self.runtime
            .create(id, &self.paths.bundle_dir(), pipe)
            .await?;

        checkpoint(cancel)?;
        self.runtime.start(id).await?;

        let state = self.runtime.state(id).await?;
        let pid = state.pid.filter(|p| *p != 0).ok_or(Error::NoPid)?;
        self.write_pidfile(pid)
    }

    /// Drives a partially started container back to `absent`.
    ///
    /// Log files are left in place: their contents may contain the
    /// diagnostic output of the failed start.
    async fn rollback(&self, id: &str) {
        match self.runtime.delete(id, true).await {
            Ok(()) | Err(Error::ContainerNotFound(_)) => {}
            Err(e) => warn!(container = id, error = %e, "rollback: container delete failed"),
        }
        if let Err(e) = bundle::remove_bundle(&self.paths) {
            warn!(container = id, error = %e, "rollback: bundle removal failed");
        }
    }

    fn write_pidfile(&self, pid: u32) -> Result<()> {
        let pidfile = self.paths.pidfile();
        if let Some(parent) = pidfile.parent() {
            logs::create_dir_private(parent)?;
        }
        bundle::write_atomic(&pidfile, pid.to_string().as_bytes())
    }

    // =========================================================================
    // stop
    // =========================================================================

    /// Gracefully terminates the container and removes every artifact.
    ///
    /// Idempotent: an absent container is a success, and leftover bundle
    /// or pidfile from a crashed invocation is still cleared.
    pub async fn stop(&self) -> Result<()> {
        let id = self.paths.container_id();
        info!(
            event = "bpm.stop.starting",
            job = self.paths.job(),
            process = self.paths.process()
        );

        let _lock = LockFile::acquire(&self.paths.lock_file(), &id).await?;

        match self.runtime.state(&id).await {
            Ok(_) => self.terminate(&id).await?,
            Err(Error::ContainerNotFound(_)) => {}
            Err(e) => return Err(e),
        }

        bundle::remove_bundle(&self.paths)?;
        remove_if_exists(&self.paths.pidfile())?;

        info!(
            event = "bpm.stop.complete",
            job = self.paths.job(),
            process = self.paths.process()
        );
        Ok(())
    }

    /// Signal escalation: TERM, then QUIT, then KILL, then delete.
    async fn terminate(&self, id: &str) -> Result<()> {
        self.signal(id, Signal::Term).await;
        if !self.wait_stopped(id, STOP_GRACE_TIMEOUT).await {
            warn!(container = id, "container survived SIGTERM, sending SIGQUIT");
            self.signal(id, Signal::Quit).await;
            if !self.wait_stopped(id, QUIT_GRACE_TIMEOUT).await {
                warn!(container = id, "container survived SIGQUIT, sending SIGKILL");
                self.signal(id, Signal::Kill).await;
                self.wait_stopped(id, QUIT_GRACE_TIMEOUT).await;
            }
        }

        match self.runtime.delete(id, false).await {
            Ok(()) | Err(Error::ContainerNotFound(_)) => Ok(()),
            Err(e) => {
                warn!(container = id, error = %e, "delete failed, retrying with force");
                match self.runtime.delete(id, true).await {
                    Ok(()) | Err(Error::ContainerNotFound(_)) => Ok(()),
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// Best-effort signal delivery; the state poll decides what is next.
    async fn signal(&self, id: &str, signal: Signal) {
        match self.runtime.kill(id, signal).await {
            Ok(()) | Err(Error::ContainerNotFound(_)) => {}
            Err(e) => warn!(container = id, signal = signal.name(), error = %e, "kill failed"),
        }
    }

    /// Polls container state with bounded exponential backoff.
    async fn wait_stopped(&self, id: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut delay = STATE_POLL_INITIAL;
        loop {
            match self.runtime.state(id).await {
                Ok(state) if state.status == ContainerStatus::Stopped => return true,
                Err(Error::ContainerNotFound(_)) => return true,
                Ok(_) | Err(_) => {}
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(STATE_POLL_MAX);
        }
    }

    // =========================================================================
    // pid / trace / shell
    // =========================================================================

    /// Host PID of the container init process.
    pub async fn pid(&self) -> Result<u32> {
        let id = self.paths.container_id();
        let state = self.runtime.state(&id).await.map_err(|e| match e {
            Error::ContainerNotFound(_) => Error::JobLookup(Box::new(e)),
            other => other,
        })?;

        if !state.is_running() {
            return Err(Error::NoPid);
        }
        state.pid.filter(|p| *p != 0).ok_or(Error::NoPid)
    }

    /// Attaches `strace` to the container init process, inheriting the
    /// caller's stdio. Returns the tracer's exit code.
    pub async fn trace(&self) -> Result<i32> {
        let pid = self.pid().await?;
        let status = tokio::process::Command::new("strace")
            .args(["-s", "100", "-p"])
            .arg(pid.to_string())
            .args(["-f", "-y"])
            .status()
            .await
            .map_err(|e| Error::io("strace", e))?;
        Ok(status.code().unwrap_or(1))
    }

    /// Opens an interactive shell inside the running container.
    pub async fn shell(&self) -> Result<i32> {
        let id = self.paths.container_id();
        let state = self.runtime.state(&id).await?;
        if !state.is_running() {
            return Err(Error::ContainerNotFound(id));
        }

        let mut env = Vec::new();
        if let Ok(term) = std::env::var("TERM") {
            env.push(("TERM".to_string(), term));
        }
        self.runtime
            .exec(&id, &["/bin/bash".to_string()], true, &env)
            .await
    }
}

// =============================================================================
// list
// =============================================================================

/// One row of `bpm list` output.
#[derive(Debug, Clone)]
pub struct ProcessListing {
    /// Container ID (`<job>-<process>`).
    pub name: String,
    /// Init PID, if the runtime reports one.
    pub pid: Option<u32>,
    /// Runtime status, or `failed` when no state exists for the bundle.
    pub status: String,
}

/// Enumerates bundles and joins each with its runtime state.
pub async fn list(root: &Path) -> Result<Vec<ProcessListing>> {
    let bundles = paths::bundles_root(root);
    if !bundles.exists() {
        return Ok(Vec::new());
    }
    let runtime = RuntimeAdapter::for_root(root);

    let mut rows = Vec::new();
    for job in sorted_dirs(&bundles)? {
        for process in sorted_dirs(&bundles.join(&job))? {
            let id = format!("{}-{}", job, process);
            match runtime.state(&id).await {
                Ok(state) => rows.push(ProcessListing {
                    name: id,
                    pid: state.pid.filter(|p| *p != 0),
                    status: state.status.to_string(),
                }),
                Err(_) => rows.push(ProcessListing {
                    name: id,
                    pid: None,
                    status: "failed".to_string(),
                }),
            }
        }
    }
    Ok(rows)
}

fn sorted_dirs(path: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(path).map_err(|e| Error::io(path, e))? {
        let entry = entry.map_err(|e| Error::io(path, e))?;
        if entry.path().is_dir()
            && let Some(name) = entry.file_name().to_str()
        {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

// =============================================================================
// Helpers
// =============================================================================

fn checkpoint(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(Error::Interrupted)
    } else {
        Ok(())
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io(path, e)),
    }
}
