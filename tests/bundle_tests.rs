//! Tests for OCI bundle building.
//!
//! The builder's output is inspected by parsing the emitted
//! `config.json` back into the spec types: namespaces, capability sets,
//! resource limits, and the fixed mount policy are all asserted against
//! the written artifact rather than in-memory state.

mod common;

use bpm::bundle::{BundleBuilder, OciMount, OciSpec};
use bpm::config::{Hooks, Limits, ProcessConfig, VolumeConfig};
use bpm::error::Error;
use bpm::paths::Paths;
use common::TestRoot;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

fn base_config() -> ProcessConfig {
    ProcessConfig {
        name: "server".to_string(),
        executable: "/var/vcap/packages/server/bin/server".to_string(),
        args: vec!["--port".to_string(), "2424".to_string()],
        env: vec!["FOO=BAR".to_string()],
        limits: None,
        additional_volumes: Vec::new(),
        hooks: None,
        capabilities: Vec::new(),
        persistent_disk: false,
    }
}

fn build(root: &TestRoot, config: &ProcessConfig) -> OciSpec {
    let paths = Paths::new(root.path(), "postgres", &config.name).unwrap();
    BundleBuilder::new(&paths).build(config).unwrap();
    let raw = fs::read(paths.bundle_config()).unwrap();
    serde_json::from_slice(&raw).unwrap()
}

fn find_mount<'a>(spec: &'a OciSpec, destination: &str) -> &'a OciMount {
    spec.mounts
        .iter()
        .find(|m| m.destination == destination)
        .unwrap_or_else(|| panic!("no mount at {}", destination))
}

// =============================================================================
// Spec Shape Tests
// =============================================================================

#[test]
fn test_root_is_readonly_relative_rootfs() {
    let root = TestRoot::new();
    let spec = build(&root, &base_config());
    assert_eq!(spec.oci_version, "1.0.2");
    assert_eq!(spec.root.path, "rootfs");
    assert!(spec.root.readonly);
}

#[test]
fn test_process_section() {
    let root = TestRoot::new();
    let spec = build(&root, &base_config());
    assert!(!spec.process.terminal);
    assert_eq!(spec.process.cwd, "/");
    assert_eq!(
        spec.process.args,
        vec!["/var/vcap/packages/server/bin/server", "--port", "2424"]
    );
    assert_eq!(spec.process.env, vec!["FOO=BAR"]);
    assert_eq!(spec.process.user.uid, 0);
    assert_eq!(spec.process.user.gid, 0);
    assert!(spec.process.no_new_privileges);
}

#[test]
fn test_hostname_is_job_name() {
    let root = TestRoot::new();
    let spec = build(&root, &base_config());
    assert_eq!(spec.hostname, "postgres");
}

#[test]
fn test_namespaces_are_fresh_except_network() {
    let root = TestRoot::new();
    let spec = build(&root, &base_config());
    let namespaces: Vec<&str> = spec
        .linux
        .as_ref()
        .unwrap()
        .namespaces
        .iter()
        .map(|ns| ns.ns_type.as_str())
        .collect();
    assert_eq!(namespaces, vec!["pid", "ipc", "uts", "mount"]);
}

// =============================================================================
// Capability Tests
// =============================================================================

#[test]
fn test_capability_sets_empty_by_default() {
    let root = TestRoot::new();
    let spec = build(&root, &base_config());
    let caps = &spec.process.capabilities;
    assert!(caps.bounding.is_empty());
    assert!(caps.effective.is_empty());
    assert!(caps.inheritable.is_empty());
    assert!(caps.permitted.is_empty());
    assert!(caps.ambient.is_empty());
}

#[test]
fn test_configured_capabilities_land_in_all_five_sets() {
    let root = TestRoot::new();
    let mut config = base_config();
    config.capabilities = vec!["NET_BIND_SERVICE".to_string()];
    let spec = build(&root, &config);
    let caps = &spec.process.capabilities;
    for set in [
        &caps.bounding,
        &caps.effective,
        &caps.inheritable,
        &caps.permitted,
        &caps.ambient,
    ] {
        assert_eq!(set, &vec!["CAP_NET_BIND_SERVICE".to_string()]);
    }
}

// =============================================================================
// Resource Limit Tests
// =============================================================================

#[test]
fn test_rlimits_hard_equals_soft() {
    let root = TestRoot::new();
    let mut config = base_config();
    config.limits = Some(Limits {
        memory: None,
        open_files: Some(10),
        processes: Some(64),
    });
    let spec = build(&root, &config);

    let nofile = spec
        .process
        .rlimits
        .iter()
        .find(|r| r.rlimit_type == "RLIMIT_NOFILE")
        .unwrap();
    assert_eq!(nofile.hard, 10);
    assert_eq!(nofile.soft, 10);

    let nproc = spec
        .process
        .rlimits
        .iter()
        .find(|r| r.rlimit_type == "RLIMIT_NPROC")
        .unwrap();
    assert_eq!(nproc.hard, 64);
    assert_eq!(nproc.soft, 64);
}

#[test]
fn test_memory_limit_pins_swap_to_same_value() {
    let root = TestRoot::new();
    let mut config = base_config();
    config.limits = Some(Limits {
        memory: Some("4M".to_string()),
        open_files: None,
        processes: None,
    });
    let spec = build(&root, &config);

    let memory = spec
        .linux
        .as_ref()
        .unwrap()
        .resources
        .as_ref()
        .unwrap()
        .memory
        .as_ref()
        .unwrap();
    assert_eq!(memory.limit, Some(4 * 1024 * 1024));
    assert_eq!(memory.swap, Some(4 * 1024 * 1024));
}

#[test]
fn test_no_limits_means_no_resources_section() {
    let root = TestRoot::new();
    let spec = build(&root, &base_config());
    assert!(spec.linux.as_ref().unwrap().resources.is_none());
    assert!(spec.process.rlimits.is_empty());
}

// =============================================================================
// Mount Tests
// =============================================================================

#[test]
fn test_tmpfs_mounts_are_writable_nosuid_nodev() {
    let root = TestRoot::new();
    let spec = build(&root, &base_config());
    for destination in ["/tmp", "/var/tmp"] {
        let mount = find_mount(&spec, destination);
        assert_eq!(mount.mount_type, "tmpfs");
        for option in ["nosuid", "nodev", "rw"] {
            assert!(mount.options.iter().any(|o| o == option));
        }
    }
}

#[test]
fn test_job_log_dir_is_the_writable_log_mount() {
    let root = TestRoot::new();
    let spec = build(&root, &base_config());
    let log_dir = root.path().join("sys").join("log").join("postgres");
    let mount = find_mount(&spec, log_dir.to_str().unwrap());
    assert_eq!(mount.mount_type, "bind");
    assert!(mount.options.iter().any(|o| o == "rw"));
}

#[test]
fn test_job_data_dir_is_mounted_and_created() {
    let root = TestRoot::new();
    let spec = build(&root, &base_config());
    let data_dir = root.path().join("data").join("postgres").join("server");
    let mount = find_mount(&spec, data_dir.to_str().unwrap());
    assert!(mount.options.iter().any(|o| o == "rw"));
    assert!(data_dir.is_dir());
}

#[test]
fn test_system_view_is_read_only() {
    let root = TestRoot::new();
    let spec = build(&root, &base_config());
    // /bin and /usr exist on any host this suite runs on.
    for destination in ["/bin", "/usr"] {
        let mount = find_mount(&spec, destination);
        assert_eq!(mount.mount_type, "bind");
        assert!(mount.options.iter().any(|o| o == "ro"));
        assert!(!mount.options.iter().any(|o| o == "noexec"));
    }
}

#[test]
fn test_mounts_are_ordered_parents_before_children() {
    let root = TestRoot::new();
    let spec = build(&root, &base_config());
    let depths: Vec<usize> = spec
        .mounts
        .iter()
        .map(|m| Path::new(&m.destination).components().count())
        .collect();
    let mut sorted = depths.clone();
    sorted.sort();
    assert_eq!(depths, sorted);
}

#[test]
fn test_persistent_disk_mounts_store_writable() {
    let root = TestRoot::new();
    let mut config = base_config();
    config.persistent_disk = true;
    let spec = build(&root, &config);
    let store = root.path().join("store").join("postgres");
    let mount = find_mount(&spec, store.to_str().unwrap());
    assert!(mount.options.iter().any(|o| o == "rw"));
    assert!(store.is_dir());
}

#[test]
fn test_additional_volume_honours_writable_and_executable() {
    let root = TestRoot::new();
    let volume = root.path().join("data").join("shared");
    let mut config = base_config();
    config.additional_volumes = vec![
        VolumeConfig {
            path: volume.to_str().unwrap().to_string(),
            writable: true,
            allow_executable: true,
        },
        VolumeConfig {
            path: root.path().join("data").join("ro").to_str().unwrap().to_string(),
            writable: false,
            allow_executable: false,
        },
    ];
    let spec = build(&root, &config);

    let shared = find_mount(&spec, volume.to_str().unwrap());
    assert!(shared.options.iter().any(|o| o == "rw"));
    assert!(!shared.options.iter().any(|o| o == "noexec"));
    assert!(volume.is_dir());

    let ro = find_mount(&spec, root.path().join("data").join("ro").to_str().unwrap());
    assert!(ro.options.iter().any(|o| o == "ro"));
    assert!(ro.options.iter().any(|o| o == "noexec"));
}

#[test]
fn test_volume_outside_root_is_rejected() {
    let root = TestRoot::new();
    let paths = Paths::new(root.path(), "postgres", "server").unwrap();
    let mut config = base_config();
    config.additional_volumes = vec![VolumeConfig {
        path: "/elsewhere/data".to_string(),
        writable: true,
        allow_executable: false,
    }];
    assert!(matches!(
        BundleBuilder::new(&paths).build(&config),
        Err(Error::ConfigInvalid {
            field: "additional_volumes",
            ..
        })
    ));
}

#[test]
fn test_volume_with_parent_components_is_rejected() {
    let root = TestRoot::new();
    let paths = Paths::new(root.path(), "postgres", "server").unwrap();
    let mut config = base_config();
    config.additional_volumes = vec![VolumeConfig {
        path: format!("{}/data/../../../etc", root.path().display()),
        writable: false,
        allow_executable: false,
    }];
    assert!(matches!(
        BundleBuilder::new(&paths).build(&config),
        Err(Error::ConfigInvalid {
            field: "additional_volumes",
            ..
        })
    ));
}

// =============================================================================
// Hook Tests
// =============================================================================

#[test]
fn test_pre_start_hook_becomes_prestart_entry() {
    let root = TestRoot::new();
    let mut config = base_config();
    config.hooks = Some(Hooks {
        pre_start: "/var/vcap/jobs/server/bin/pre-start".to_string(),
    });
    let spec = build(&root, &config);
    let hooks = spec.hooks.as_ref().unwrap();
    assert_eq!(hooks.prestart.len(), 1);
    assert_eq!(hooks.prestart[0].path, "/var/vcap/jobs/server/bin/pre-start");
}

// =============================================================================
// Filesystem Discipline Tests
// =============================================================================

#[test]
fn test_bundle_dir_is_private_and_rootfs_empty() {
    let root = TestRoot::new();
    let config = base_config();
    let paths = Paths::new(root.path(), "postgres", "server").unwrap();
    BundleBuilder::new(&paths).build(&config).unwrap();

    let mode = fs::metadata(paths.bundle_dir()).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o700);

    assert!(paths.rootfs_dir().is_dir());
    assert_eq!(fs::read_dir(paths.rootfs_dir()).unwrap().count(), 0);
}

#[test]
fn test_config_json_write_leaves_no_temp_file() {
    let root = TestRoot::new();
    let config = base_config();
    let paths = Paths::new(root.path(), "postgres", "server").unwrap();
    BundleBuilder::new(&paths).build(&config).unwrap();

    let leftovers: Vec<_> = fs::read_dir(paths.bundle_dir())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty());
    assert!(paths.bundle_config().is_file());
}

#[test]
fn test_rebuild_overwrites_existing_bundle() {
    let root = TestRoot::new();
    let mut config = base_config();
    let paths = Paths::new(root.path(), "postgres", "server").unwrap();
    BundleBuilder::new(&paths).build(&config).unwrap();

    config.args = vec!["--changed".to_string()];
    BundleBuilder::new(&paths).build(&config).unwrap();

    let raw = fs::read(paths.bundle_config()).unwrap();
    let spec: OciSpec = serde_json::from_slice(&raw).unwrap();
    assert_eq!(
        spec.process.args,
        vec!["/var/vcap/packages/server/bin/server", "--changed"]
    );
}
