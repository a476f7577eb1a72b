//! OCI runtime adapter - drives the external `runc` binary.
//!
//! The supervisor never manipulates namespaces or cgroups itself; it
//! shells out to an OCI-compliant runtime and interprets its exit codes
//! and JSON output. Every invocation injects `--root` pointing at the
//! supervisor's private state directory so container state is isolated
//! from any system-wide runtime usage.
//!
//! # Lifecycle
//!
//! ```text
//! create(id, bundle) → start(id) → [exec(id, ...)] → kill(id, signal) → delete(id)
//!                          state(id)
//! ```
//!
//! Exit-code interpretation is uniform: non-zero with `does not exist`
//! on stderr maps to [`Error::ContainerNotFound`], `already exists` to
//! [`Error::ContainerExists`], anything else to [`Error::RuntimeFailed`]
//! with the runtime's stderr attached.

use crate::constants::RUNTIME_BINARY;
use crate::error::{Error, Result};
use crate::logs::LogPipe;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

// =============================================================================
// Container State (OCI Runtime Spec)
// =============================================================================

/// OCI Runtime Spec container status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    /// Container is being created.
    Creating,
    /// Container has been created but not started.
    Created,
    /// Container init is running.
    Running,
    /// Container processes are frozen.
    Paused,
    /// Container init has exited.
    Stopped,
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Creating => write!(f, "creating"),
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Parsed output of `runc state`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerState {
    #[serde(default)]
    pub oci_version: String,
    /// Container ID.
    pub id: String,
    /// Container status.
    pub status: ContainerStatus,
    /// PID of the container init process on the host, if any.
    #[serde(default)]
    pub pid: Option<u32>,
    /// Absolute path to the bundle directory.
    #[serde(default)]
    pub bundle: String,
}

impl ContainerState {
    /// Returns true if the container init is running.
    pub fn is_running(&self) -> bool {
        self.status == ContainerStatus::Running
    }
}

// =============================================================================
// Signals
// =============================================================================

/// Signal deliverable to a container's init process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// SIGTERM (graceful shutdown).
    Term,
    /// SIGQUIT (shutdown with core/stack dump).
    Quit,
    /// SIGKILL (force kill).
    Kill,
    /// SIGINT (interrupt).
    Int,
    /// SIGHUP (hangup).
    Hup,
    /// SIGUSR1.
    Usr1,
    /// SIGUSR2.
    Usr2,
}

impl Signal {
    /// The conventional signal name passed to the runtime.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Term => "SIGTERM",
            Self::Quit => "SIGQUIT",
            Self::Kill => "SIGKILL",
            Self::Int => "SIGINT",
            Self::Hup => "SIGHUP",
            Self::Usr1 => "SIGUSR1",
            Self::Usr2 => "SIGUSR2",
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Events
// =============================================================================

/// One record from the runtime's `events` stream.
#[derive(Debug, Clone, Deserialize)]
pub struct ContainerEvent {
    /// Event kind; the supervisor cares about `oom`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Container the event belongs to.
    #[serde(default)]
    pub id: String,
    /// Kind-specific payload, passed through unparsed.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl ContainerEvent {
    /// Returns true for kernel out-of-memory events.
    pub fn is_oom(&self) -> bool {
        self.event_type == "oom"
    }
}

/// Live `events` subscription backed by a background reader task.
///
/// The channel closes when the runtime's stream hits EOF or the
/// subscription is cancelled (dropping it cancels implicitly).
pub struct EventStream {
    events: mpsc::Receiver<ContainerEvent>,
    token: CancellationToken,
}

impl EventStream {
    /// Receives the next event; `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<ContainerEvent> {
        self.events.recv().await
    }

    /// Stops the background reader and the runtime child process.
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

// =============================================================================
// Runtime Adapter
// =============================================================================

/// Thin wrapper around the external OCI runtime CLI.
#[derive(Debug, Clone)]
pub struct RuntimeAdapter {
    binary: PathBuf,
    state_root: PathBuf,
}

impl RuntimeAdapter {
    /// Resolves the runtime binary and private state root for a BOSH root.
    ///
    /// The copy packaged under `packages/bpm/bin/runc` is preferred; any
    /// `runc` on PATH is accepted otherwise.
    pub fn for_root(root: &Path) -> Self {
        let packaged = paths::runtime_binary(root);
        let binary = if packaged.exists() {
            packaged
        } else {
            PathBuf::from(RUNTIME_BINARY)
        };
        Self {
            binary,
            state_root: paths::runtime_root(root),
        }
    }

    /// Base command with the private `--root` injected.
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg(format!("--root={}", self.state_root.display()));
        cmd
    }

    /// Creates the container without starting its init process.
    ///
    /// The pre-opened log handles become the runtime's stdio; with
    /// `terminal = false` the container init inherits them, which is how
    /// process output reaches the append-only logs. Failure text the
    /// runtime emits is therefore appended to the stderr log; only bytes
    /// written after this call started are used for classification.
    pub async fn create(&self, id: &str, bundle: &Path, logs: &LogPipe) -> Result<()> {
        let (stdout, stderr) = logs.stdio()?;
        let err_offset = fs::metadata(logs.stderr_path()).map(|m| m.len()).unwrap_or(0);

        debug!(id, bundle = %bundle.display(), "creating container");
        let status = self
            .command()
            .arg("create")
            .arg("--bundle")
            .arg(bundle)
            .arg(id)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .status()
            .await
            .map_err(|e| Error::io(&self.binary, e))?;

        if status.success() {
            return Ok(());
        }
        let tail = read_from_offset(logs.stderr_path(), err_offset);
        Err(classify("create", id, &tail))
    }

    /// Starts the init process of a created container.
    pub async fn start(&self, id: &str) -> Result<()> {
        self.run("start", id, &["start", id]).await.map(|_| ())
    }

    /// Queries and parses the container state.
    pub async fn state(&self, id: &str) -> Result<ContainerState> {
        let output = self.run("state", id, &["state", id]).await?;
        serde_json::from_slice(&output.stdout).map_err(|e| Error::RuntimeFailed {
            operation: "state".to_string(),
            stderr: format!("unparseable state output: {}", e),
        })
    }

    /// Delivers a signal to the container init process.
    pub async fn kill(&self, id: &str, signal: Signal) -> Result<()> {
        self.run("kill", id, &["kill", id, signal.name()])
            .await
            .map(|_| ())
    }

    /// Removes container state; `force` kills surviving processes first.
    pub async fn delete(&self, id: &str, force: bool) -> Result<()> {
        let mut args = vec!["delete"];
        if force {
            args.push("--force");
        }
        args.push(id);
        self.run("delete", id, &args).await.map(|_| ())
    }

    /// Runs a secondary process inside the container, inheriting the
    /// caller's stdio. Returns the process exit code.
    pub async fn exec(
        &self,
        id: &str,
        argv: &[String],
        tty: bool,
        env: &[(String, String)],
    ) -> Result<i32> {
        let mut cmd = self.command();
        cmd.arg("exec");
        if tty {
            cmd.arg("--tty");
        }
        for (key, value) in env {
            cmd.arg("--env").arg(format!("{}={}", key, value));
        }
        cmd.arg(id).args(argv);

        let status = cmd.status().await.map_err(|e| Error::io(&self.binary, e))?;
        Ok(status.code().unwrap_or(1))
    }

    /// Subscribes to the newline-delimited JSON `events` stream.
    pub fn events(&self, id: &str) -> Result<EventStream> {
        let mut child = self
            .command()
            .arg("events")
            .arg(id)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::io(&self.binary, e))?;

        let stdout = child.stdout.take().ok_or_else(|| Error::RuntimeFailed {
            operation: "events".to_string(),
            stderr: "no stdout pipe from runtime".to_string(),
        })?;

        let token = CancellationToken::new();
        let worker_token = token.clone();
        let (tx, rx) = mpsc::channel(16);

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                tokio::select! {
                    _ = worker_token.cancelled() => break,
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            match serde_json::from_str::<ContainerEvent>(&line) {
                                Ok(event) => {
                                    if tx.send(event).await.is_err() {
                                        break;
                                    }
                                }
                                Err(e) => warn!(error = %e, "skipping unparseable runtime event"),
                            }
                        }
                        _ => break,
                    },
                }
            }
            let _ = child.kill().await;
        });

        Ok(EventStream { events: rx, token })
    }

    /// Runs a runtime subcommand, capturing output and mapping failure.
    async fn run(
        &self,
        operation: &str,
        id: &str,
        args: &[&str],
    ) -> Result<std::process::Output> {
        let output = self
            .command()
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::io(&self.binary, e))?;

        if output.status.success() {
            Ok(output)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(classify(operation, id, &stderr))
        }
    }
}

/// Maps a non-zero runtime exit to an error kind by its stderr text.
fn classify(operation: &str, id: &str, stderr: &str) -> Error {
    if stderr.contains("does not exist") {
        Error::ContainerNotFound(id.to_string())
    } else if stderr.contains("already exists") {
        Error::ContainerExists(id.to_string())
    } else {
        Error::RuntimeFailed {
            operation: operation.to_string(),
            stderr: stderr.trim().to_string(),
        }
    }
}

/// Best-effort read of a file's content from a byte offset.
fn read_from_offset(path: &Path, offset: u64) -> String {
    let mut buffer = String::new();
    if let Ok(mut file) = fs::File::open(path)
        && file.seek(SeekFrom::Start(offset)).is_ok()
    {
        let _ = file.read_to_string(&mut buffer);
    }
    buffer
}
