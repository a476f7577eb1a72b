//! OCI runtime bundle building.
//!
//! Translates a validated [`ProcessConfig`] into an OCI runtime bundle:
//! a directory holding `config.json` (the runtime spec) and an empty
//! `rootfs/` populated entirely through bind mounts at container creation
//! time. No image is unpacked; the container sees a read-only view of the
//! host system plus a small set of writable deviations.
//!
//! The emitted spec is fixed in the following ways, independent of input:
//!
//! - Fresh `pid`, `ipc`, `uts`, and `mount` namespaces; the network
//!   namespace is shared with the host and no user namespace is used.
//! - The root filesystem is read-only.
//! - All five capability sets are emptied; configured capabilities are
//!   added back identically to all five.
//! - The hostname is the job name and the primary process runs without a
//!   terminal, with `cwd = /`.
//!
//! `config.json` is written via write-temp-then-rename so a partial write
//! can never confuse the runtime.

use crate::config::ProcessConfig;
use crate::constants::OCI_RUNTIME_SPEC_VERSION;
use crate::error::{Error, Result};
use crate::logs::create_dir_private;
use crate::paths::{self, Paths};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Host directories exposed read-only inside every container.
const SYSTEM_MOUNTS: &[&str] = &["/bin", "/etc", "/lib", "/lib64", "/sbin", "/usr"];

/// Host files bind-mounted read-only so name resolution works.
const RESOLV_MOUNTS: &[&str] = &["/etc/resolv.conf", "/etc/hosts", "/etc/nsswitch.conf"];

// =============================================================================
// Bundle Builder
// =============================================================================

/// Materialises the bundle directory and runtime spec for one process.
pub struct BundleBuilder<'a> {
    paths: &'a Paths,
}

impl<'a> BundleBuilder<'a> {
    /// Creates a builder for the given resolved paths.
    pub fn new(paths: &'a Paths) -> Self {
        Self { paths }
    }

    /// Creates the bundle directory tree and writes `config.json`.
    ///
    /// Returns the bundle directory path. Also creates the writable
    /// directories the spec bind-mounts into the container, since the
    /// runtime refuses mounts with absent sources.
    pub fn build(&self, config: &ProcessConfig) -> Result<PathBuf> {
        let bundle_dir = self.paths.bundle_dir();
        create_dir_private(&bundle_dir)?;
        create_dir_private(&self.paths.rootfs_dir())?;
        create_dir_private(&self.paths.job_data_dir())?;
        if config.persistent_disk {
            create_dir_private(&self.paths.store_dir())?;
        }

        let spec = self.runtime_spec(config)?;
        let json = serde_json::to_vec_pretty(&spec).map_err(|e| Error::Serialization(e.to_string()))?;
        write_atomic(&self.paths.bundle_config(), &json)?;

        debug!(bundle = %bundle_dir.display(), "wrote runtime spec");
        Ok(bundle_dir)
    }

    /// Generates the OCI runtime spec for this process.
    fn runtime_spec(&self, config: &ProcessConfig) -> Result<OciSpec> {
        let mut args = Vec::with_capacity(1 + config.args.len());
        args.push(config.executable.clone());
        args.extend(config.args.iter().cloned());

        Ok(OciSpec {
            oci_version: OCI_RUNTIME_SPEC_VERSION.to_string(),
            root: OciRoot {
                path: "rootfs".to_string(),
                readonly: true,
            },
            process: OciProcess {
                terminal: false,
                user: OciUser { uid: 0, gid: 0 },
                args,
                env: config.env.clone(),
                cwd: "/".to_string(),
                capabilities: capability_sets(config)?,
                rlimits: rlimits(config),
                no_new_privileges: true,
            },
            hostname: self.paths.job().to_string(),
            mounts: self.mounts(config)?,
            hooks: hooks(config),
            linux: Some(OciLinux {
                namespaces: vec![
                    OciNamespace::new("pid"),
                    OciNamespace::new("ipc"),
                    OciNamespace::new("uts"),
                    OciNamespace::new("mount"),
                ],
                resources: resources(config)?,
            }),
        })
    }

    /// Assembles the mount table, parents before children.
    fn mounts(&self, config: &ProcessConfig) -> Result<Vec<OciMount>> {
        let root = self.paths.root();
        let mut mounts = vec![
            OciMount::pseudo("/proc", "proc", "proc", &[]),
            OciMount::pseudo(
                "/dev",
                "tmpfs",
                "tmpfs",
                &["nosuid", "strictatime", "mode=755"],
            ),
            OciMount::pseudo(
                "/dev/pts",
                "devpts",
                "devpts",
                &["nosuid", "noexec", "newinstance", "ptmxmode=0666", "mode=0620"],
            ),
            OciMount::pseudo(
                "/dev/shm",
                "tmpfs",
                "shm",
                &["nosuid", "noexec", "nodev", "mode=1777", "size=65536k"],
            ),
            OciMount::pseudo("/sys", "sysfs", "sysfs", &["nosuid", "noexec", "nodev", "ro"]),
            OciMount::pseudo("/tmp", "tmpfs", "tmpfs", &["nosuid", "nodev", "rw"]),
            OciMount::pseudo("/var/tmp", "tmpfs", "tmpfs", &["nosuid", "nodev", "rw"]),
        ];

        // Read-only view of the host system. Absent paths are skipped
        // rather than handed to the runtime as broken mount sources.
        for source in SYSTEM_MOUNTS {
            if Path::new(source).exists() {
                mounts.push(OciMount::bind(Path::new(source), false, true));
            }
        }
        for source in RESOLV_MOUNTS {
            if Path::new(source).exists() {
                mounts.push(OciMount::bind(Path::new(source), false, false));
            }
        }

        // The only writable log location the process may use.
        mounts.push(OciMount::bind(&self.paths.job_log_dir(), true, false));
        mounts.push(OciMount::bind(&self.paths.job_data_dir(), true, false));

        if self.paths.jobs_dir().exists() {
            mounts.push(OciMount::bind(&self.paths.jobs_dir(), false, true));
        }
        for dir in [paths::packages_dir(root), paths::data_packages_dir(root)] {
            if dir.exists() {
                mounts.push(OciMount::bind(&dir, false, true));
            }
        }

        if config.persistent_disk {
            mounts.push(OciMount::bind(&self.paths.store_dir(), true, false));
        }

        for volume in &config.additional_volumes {
            let path = self.ensure_under_root(&volume.path)?;
            create_dir_private(&path)?;
            mounts.push(OciMount::bind(&path, volume.writable, volume.allow_executable));
        }

        mounts.sort_by_key(|m| Path::new(&m.destination).components().count());
        Ok(mounts)
    }

    /// Rejects volume paths that resolve outside the BOSH root.
    fn ensure_under_root(&self, path_str: &str) -> Result<PathBuf> {
        let path = Path::new(path_str);
        if path.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(Error::ConfigInvalid {
                field: "additional_volumes",
                reason: format!("volume path must not contain '..': {}", path_str),
            });
        }
        if !path.starts_with(self.paths.root()) {
            return Err(Error::ConfigInvalid {
                field: "additional_volumes",
                reason: format!(
                    "volume path must lie under the bosh root {}: {}",
                    self.paths.root().display(),
                    path_str
                ),
            });
        }
        Ok(path.to_path_buf())
    }
}

/// Removes the bundle directory; absence is not an error.
pub fn remove_bundle(paths: &Paths) -> Result<()> {
    let bundle_dir = paths.bundle_dir();
    match fs::remove_dir_all(&bundle_dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io(bundle_dir, e)),
    }
}

/// Writes a file via a temporary sibling and an atomic rename.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::io(path, std::io::Error::other("path has no file name")))?;
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));

    fs::write(&tmp, data).map_err(|e| Error::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| Error::io(path, e))?;
    Ok(())
}

// =============================================================================
// Spec Sections
// =============================================================================

/// All five capability sets, identical: empty unless configured.
fn capability_sets(config: &ProcessConfig) -> Result<OciCapabilities> {
    let caps = config.normalized_capabilities()?;
    Ok(OciCapabilities {
        bounding: caps.clone(),
        effective: caps.clone(),
        inheritable: caps.clone(),
        permitted: caps.clone(),
        ambient: caps,
    })
}

fn rlimits(config: &ProcessConfig) -> Vec<OciRlimit> {
    let mut rlimits = Vec::new();
    if let Some(limits) = &config.limits {
        if let Some(open_files) = limits.open_files {
            rlimits.push(OciRlimit::new("RLIMIT_NOFILE", open_files));
        }
        if let Some(processes) = limits.processes {
            rlimits.push(OciRlimit::new("RLIMIT_NPROC", processes));
        }
    }
    rlimits
}

/// Memory limit with the swap limit pinned to the same value, so the
/// process cannot spill past its budget into swap.
fn resources(config: &ProcessConfig) -> Result<Option<OciResources>> {
    Ok(config.memory_bytes()?.map(|bytes| OciResources {
        memory: Some(OciMemory {
            limit: Some(bytes as i64),
            swap: Some(bytes as i64),
        }),
    }))
}

fn hooks(config: &ProcessConfig) -> Option<OciHooks> {
    config.hooks.as_ref().map(|h| OciHooks {
        prestart: vec![OciHook {
            path: h.pre_start.clone(),
            args: Vec::new(),
            env: Vec::new(),
        }],
    })
}

// =============================================================================
// OCI Runtime Spec Types
// =============================================================================

/// OCI Runtime Spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciSpec {
    pub oci_version: String,
    pub root: OciRoot,
    pub process: OciProcess,
    pub hostname: String,
    pub mounts: Vec<OciMount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hooks: Option<OciHooks>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linux: Option<OciLinux>,
}

/// OCI root filesystem config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OciRoot {
    pub path: String,
    pub readonly: bool,
}

/// OCI process config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciProcess {
    pub terminal: bool,
    pub user: OciUser,
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub cwd: String,
    pub capabilities: OciCapabilities,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rlimits: Vec<OciRlimit>,
    pub no_new_privileges: bool,
}

/// OCI user config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OciUser {
    pub uid: u32,
    pub gid: u32,
}

/// The five Linux capability sets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OciCapabilities {
    pub bounding: Vec<String>,
    pub effective: Vec<String>,
    pub inheritable: Vec<String>,
    pub permitted: Vec<String>,
    pub ambient: Vec<String>,
}

/// OCI POSIX rlimit entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OciRlimit {
    #[serde(rename = "type")]
    pub rlimit_type: String,
    pub hard: u64,
    pub soft: u64,
}

impl OciRlimit {
    fn new(rlimit_type: &str, value: u64) -> Self {
        Self {
            rlimit_type: rlimit_type.to_string(),
            hard: value,
            soft: value,
        }
    }
}

/// OCI mount config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OciMount {
    pub destination: String,
    #[serde(rename = "type")]
    pub mount_type: String,
    pub source: String,
    #[serde(default)]
    pub options: Vec<String>,
}

impl OciMount {
    /// A kernel pseudo-filesystem mount.
    fn pseudo(destination: &str, mount_type: &str, source: &str, options: &[&str]) -> Self {
        Self {
            destination: destination.to_string(),
            mount_type: mount_type.to_string(),
            source: source.to_string(),
            options: options.iter().map(|o| o.to_string()).collect(),
        }
    }

    /// A bind mount whose in-container path equals the host path.
    fn bind(source: &Path, writable: bool, executable: bool) -> Self {
        let mut options = vec!["bind".to_string(), "nosuid".to_string(), "nodev".to_string()];
        options.push(if writable { "rw" } else { "ro" }.to_string());
        if !executable {
            options.push("noexec".to_string());
        }
        Self {
            destination: source.to_string_lossy().to_string(),
            mount_type: "bind".to_string(),
            source: source.to_string_lossy().to_string(),
            options,
        }
    }
}

/// OCI lifecycle hooks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OciHooks {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prestart: Vec<OciHook>,
}

/// One hook invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OciHook {
    pub path: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
}

/// OCI Linux-specific config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OciLinux {
    pub namespaces: Vec<OciNamespace>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<OciResources>,
}

/// OCI namespace config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OciNamespace {
    #[serde(rename = "type")]
    pub ns_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl OciNamespace {
    fn new(ns_type: &str) -> Self {
        Self {
            ns_type: ns_type.to_string(),
            path: None,
        }
    }
}

/// OCI resource limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OciResources {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<OciMemory>,
}

/// OCI memory limits. Swap is the total memory+swap ceiling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OciMemory {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub swap: Option<i64>,
}
