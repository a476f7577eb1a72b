//! Constants for the process manager.
//!
//! All timeouts, file modes, and validation sets are defined here to
//! ensure consistency and prevent magic numbers throughout the codebase.

use std::time::Duration;

// =============================================================================
// Timeouts
// =============================================================================

/// Grace period after SIGTERM before escalating to SIGQUIT.
pub const STOP_GRACE_TIMEOUT: Duration = Duration::from_secs(15);

/// Grace period after SIGQUIT before escalating to SIGKILL.
pub const QUIT_GRACE_TIMEOUT: Duration = Duration::from_secs(5);

/// Window in which lock acquisition is retried before giving up.
pub const LOCK_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause between lock acquisition attempts.
pub const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Initial delay when polling container state.
pub const STATE_POLL_INITIAL: Duration = Duration::from_millis(50);

/// Upper bound for the exponential state-poll backoff.
pub const STATE_POLL_MAX: Duration = Duration::from_secs(1);

// =============================================================================
// File Modes
// =============================================================================

/// Mode for directories owned exclusively by the supervisor.
pub const PRIVATE_DIR_MODE: u32 = 0o700;

/// Mode for log files and the lock/pid files.
pub const PRIVATE_FILE_MODE: u32 = 0o600;

// =============================================================================
// OCI Spec
// =============================================================================

/// OCI Runtime Spec version emitted in bundles.
pub const OCI_RUNTIME_SPEC_VERSION: &str = "1.0.2";

/// Name of the OCI runtime binary looked up on PATH when the packaged
/// copy is absent.
pub const RUNTIME_BINARY: &str = "runc";

// =============================================================================
// Validation Sets
// =============================================================================

/// Valid characters for job and process names.
pub const NAME_VALID_CHARS: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-_.";

/// Closed set of Linux capability names a process may retain.
pub const LINUX_CAPABILITIES: &[&str] = &[
    "CAP_AUDIT_CONTROL",
    "CAP_AUDIT_READ",
    "CAP_AUDIT_WRITE",
    "CAP_BLOCK_SUSPEND",
    "CAP_BPF",
    "CAP_CHECKPOINT_RESTORE",
    "CAP_CHOWN",
    "CAP_DAC_OVERRIDE",
    "CAP_DAC_READ_SEARCH",
    "CAP_FOWNER",
    "CAP_FSETID",
    "CAP_IPC_LOCK",
    "CAP_IPC_OWNER",
    "CAP_KILL",
    "CAP_LEASE",
    "CAP_LINUX_IMMUTABLE",
    "CAP_MAC_ADMIN",
    "CAP_MAC_OVERRIDE",
    "CAP_MKNOD",
    "CAP_NET_ADMIN",
    "CAP_NET_BIND_SERVICE",
    "CAP_NET_BROADCAST",
    "CAP_NET_RAW",
    "CAP_PERFMON",
    "CAP_SETFCAP",
    "CAP_SETGID",
    "CAP_SETPCAP",
    "CAP_SETUID",
    "CAP_SYS_ADMIN",
    "CAP_SYS_BOOT",
    "CAP_SYS_CHROOT",
    "CAP_SYS_MODULE",
    "CAP_SYS_NICE",
    "CAP_SYS_PACCT",
    "CAP_SYS_PTRACE",
    "CAP_SYS_RAWIO",
    "CAP_SYS_RESOURCE",
    "CAP_SYS_TIME",
    "CAP_SYS_TTY_CONFIG",
    "CAP_SYSLOG",
    "CAP_WAKE_ALARM",
];
