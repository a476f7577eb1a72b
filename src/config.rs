//! Process configuration loading and validation.
//!
//! A job declares each long-running process in a `bpm.yml` document. The
//! schema is closed: unknown keys at the top level or inside `limits` are
//! rejected at parse time rather than silently ignored.
//!
//! ```yaml
//! name: server
//! executable: /var/vcap/packages/server/bin/server
//! args: ["--port", "2424"]
//! env: ["LANG=en_US.UTF-8"]
//! limits:
//!   memory: 4G
//!   open_files: 1024
//! ```

use crate::constants::LINUX_CAPABILITIES;
use crate::error::{Error, Result};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Operator-authored description of one supervised process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessConfig {
    /// Process name, unique within the job.
    pub name: String,
    /// Absolute path of the executable inside the container's view.
    pub executable: String,
    /// Arguments passed to the executable.
    #[serde(default)]
    pub args: Vec<String>,
    /// `KEY=VALUE` environment entries; duplicate keys are last-wins.
    #[serde(default)]
    pub env: Vec<String>,
    /// Optional resource limits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<Limits>,
    /// Extra writable or read-only bind mounts under the BOSH root.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_volumes: Vec<VolumeConfig>,
    /// Lifecycle hook scripts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hooks: Option<Hooks>,
    /// Linux capabilities to retain beyond the default empty set.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
    /// Mount the job's persistent store writable.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub persistent_disk: bool,
}

/// Resource limits applied to the container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Limits {
    /// Memory limit as a human size string (`K`/`M`/`G` suffixes).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    /// RLIMIT_NOFILE, hard and soft.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_files: Option<u64>,
    /// RLIMIT_NPROC, hard and soft.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processes: Option<u64>,
}

/// One additional bind mount requested by the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VolumeConfig {
    /// Absolute path under the BOSH root.
    pub path: String,
    /// Mount read-write instead of read-only.
    #[serde(default)]
    pub writable: bool,
    /// Permit executing files from the mount.
    #[serde(default)]
    pub allow_executable: bool,
}

/// Lifecycle hook scripts run by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Hooks {
    /// Absolute path of a script run before the process starts.
    pub pre_start: String,
}

impl ProcessConfig {
    /// Reads, parses, canonicalises, and validates a `bpm.yml` document.
    ///
    /// No side effects on disk. The returned config has its `env` already
    /// canonicalised (stable order, duplicate keys collapsed last-wins).
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::ConfigNotFound {
                    path: path.to_path_buf(),
                }
            } else {
                Error::io(path, e)
            }
        })?;

        let mut config: ProcessConfig =
            serde_yaml::from_str(&data).map_err(|e| Error::ConfigMalformed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        config.validate()?;
        config.env = canonicalize_env(&config.env);
        Ok(config)
    }

    /// Applies field-level validation.
    pub fn validate(&self) -> Result<()> {
        paths::validate_name(&self.name)?;

        if self.executable.is_empty() {
            return Err(Error::ConfigInvalid {
                field: "executable",
                reason: "executable is required".to_string(),
            });
        }
        if !self.executable.starts_with('/') {
            return Err(Error::ConfigInvalid {
                field: "executable",
                reason: format!("executable must be an absolute path: {}", self.executable),
            });
        }

        for entry in &self.env {
            if !entry.contains('=') {
                return Err(Error::ConfigInvalid {
                    field: "env",
                    reason: format!("environment entry is not KEY=VALUE: {}", entry),
                });
            }
        }

        if let Some(limits) = &self.limits
            && let Some(memory) = &limits.memory
        {
            parse_memory(memory)?;
        }

        for volume in &self.additional_volumes {
            if !volume.path.starts_with('/') {
                return Err(Error::ConfigInvalid {
                    field: "additional_volumes",
                    reason: format!("volume path must be absolute: {}", volume.path),
                });
            }
        }

        if let Some(hooks) = &self.hooks
            && !hooks.pre_start.starts_with('/')
        {
            return Err(Error::ConfigInvalid {
                field: "hooks.pre_start",
                reason: format!("hook path must be absolute: {}", hooks.pre_start),
            });
        }

        for capability in &self.capabilities {
            normalize_capability(capability)?;
        }

        Ok(())
    }

    /// Memory limit in bytes, if configured.
    pub fn memory_bytes(&self) -> Result<Option<u64>> {
        match self.limits.as_ref().and_then(|l| l.memory.as_deref()) {
            Some(memory) => parse_memory(memory).map(Some),
            None => Ok(None),
        }
    }

    /// Capabilities normalised to their canonical `CAP_` form.
    pub fn normalized_capabilities(&self) -> Result<Vec<String>> {
        self.capabilities
            .iter()
            .map(|c| normalize_capability(c))
            .collect()
    }
}

/// Collapses duplicate environment keys, keeping the last occurrence's
/// value at the position of the first. Entries are already validated to
/// be `KEY=VALUE` shaped.
fn canonicalize_env(env: &[String]) -> Vec<String> {
    let mut ordered: Vec<(&str, &str)> = Vec::with_capacity(env.len());

    for entry in env {
        let (key, value) = entry.split_once('=').unwrap_or((entry.as_str(), ""));
        match ordered.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value,
            None => ordered.push((key, value)),
        }
    }

    ordered
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect()
}

/// Parses a human memory size (`4M`, `512K`, `2G`, bare bytes) to bytes.
pub fn parse_memory(input: &str) -> Result<u64> {
    let invalid = |reason: String| Error::ConfigInvalid {
        field: "limits.memory",
        reason,
    };

    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(invalid("memory limit is empty".to_string()));
    }

    let (digits, multiplier) = match trimmed.chars().last() {
        Some('k') | Some('K') => (&trimmed[..trimmed.len() - 1], 1024u64),
        Some('m') | Some('M') => (&trimmed[..trimmed.len() - 1], 1024 * 1024),
        Some('g') | Some('G') => (&trimmed[..trimmed.len() - 1], 1024 * 1024 * 1024),
        Some(c) if c.is_ascii_digit() => (trimmed, 1),
        _ => {
            return Err(invalid(format!("unrecognized memory suffix in '{}'", input)));
        }
    };

    let value: u64 = digits
        .parse()
        .map_err(|_| invalid(format!("not a memory size: '{}'", input)))?;

    value
        .checked_mul(multiplier)
        .filter(|v| *v <= i64::MAX as u64)
        .ok_or_else(|| invalid(format!("memory size overflows: '{}'", input)))
}

/// Validates a capability name against the closed set, accepting both
/// `NET_BIND_SERVICE` and `CAP_NET_BIND_SERVICE` spellings.
fn normalize_capability(name: &str) -> Result<String> {
    let canonical = if name.starts_with("CAP_") {
        name.to_string()
    } else {
        format!("CAP_{}", name)
    };

    if LINUX_CAPABILITIES.contains(&canonical.as_str()) {
        Ok(canonical)
    } else {
        Err(Error::ConfigInvalid {
            field: "capabilities",
            reason: format!("unknown capability: {}", name),
        })
    }
}
