#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Stand-in OCI runtime used by the suite so no privileges or a real
/// `runc` are required. It persists one directory per container under
/// its `--root` with `status`, `pid`, and `bundle` files, and speaks
/// just enough of the CLI surface for the adapter: `create`, `start`,
/// `state`, `kill`, `delete`, `exec`, and `events`. Signal deliveries
/// are appended to `kill_log` and exec invocations (flags included) to
/// `exec_log`, both under `--root`, so tests can assert wiring.
///
/// Marker files under `--root` inject faults:
///   - `fail_create`: `create` exits 1
///   - `fail_start`: `start` exits 1
const STUB_RUNC: &str = r#"#!/bin/sh
root=""
case "${1:-}" in
  --root=*) root="${1#--root=}"; shift ;;
esac
cmd="${1:-}"
[ $# -gt 0 ] && shift

mkdir -p "$root"

fail_missing() {
  echo "container \"$1\" does not exist" >&2
  exit 1
}

case "$cmd" in
  create)
    bundle=""
    if [ "${1:-}" = "--bundle" ] || [ "${1:-}" = "-b" ]; then
      bundle="$2"
      shift 2
    fi
    id="$1"
    if [ -d "$root/$id" ]; then
      echo "container with id $id already exists" >&2
      exit 1
    fi
    if [ -f "$root/fail_create" ]; then
      echo "create refused by stub" >&2
      exit 1
    fi
    mkdir -p "$root/$id"
    printf '%s' "$bundle" > "$root/$id/bundle"
    printf '%s' "$$" > "$root/$id/pid"
    printf 'created' > "$root/$id/status"
    ;;
  start)
    id="$1"
    [ -d "$root/$id" ] || fail_missing "$id"
    if [ -f "$root/fail_start" ]; then
      echo "start refused by stub" >&2
      exit 1
    fi
    printf 'running' > "$root/$id/status"
    ;;
  state)
    id="$1"
    [ -d "$root/$id" ] || fail_missing "$id"
    printf '{"ociVersion":"1.0.2","id":"%s","status":"%s","pid":%s,"bundle":"%s"}\n' \
      "$id" "$(cat "$root/$id/status")" "$(cat "$root/$id/pid")" "$(cat "$root/$id/bundle")"
    ;;
  kill)
    id="$1"
    [ -d "$root/$id" ] || fail_missing "$id"
    printf '%s %s\n' "$id" "${2:-SIGTERM}" >> "$root/kill_log"
    printf 'stopped' > "$root/$id/status"
    ;;
  delete)
    force=""
    if [ "${1:-}" = "--force" ] || [ "${1:-}" = "-f" ]; then
      force=1
      shift
    fi
    id="$1"
    if [ ! -d "$root/$id" ]; then
      [ -n "$force" ] && exit 0
      fail_missing "$id"
    fi
    if [ -z "$force" ] && [ "$(cat "$root/$id/status")" = "running" ]; then
      echo "cannot delete container $id that is still running" >&2
      exit 1
    fi
    rm -rf "$root/$id"
    ;;
  exec)
    printf 'exec %s\n' "$*" >> "$root/exec_log"
    while :; do
      case "${1:-}" in
        --tty|-t) shift ;;
        --env|-e) shift 2 ;;
        *) break ;;
      esac
    done
    id="$1"
    [ -d "$root/$id" ] || fail_missing "$id"
    ;;
  events)
    id="$1"
    [ -d "$root/$id" ] || fail_missing "$id"
    printf '{"type":"stats","id":"%s","data":{}}\n' "$id"
    printf '{"type":"oom","id":"%s","data":{}}\n' "$id"
    ;;
  *)
    echo "stub runc: unknown command: $cmd" >&2
    exit 1
    ;;
esac
"#;

/// A disposable BOSH root with the stub runtime installed where bpm
/// looks for the packaged binary.
pub struct TestRoot {
    dir: TempDir,
}

impl TestRoot {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("create temp BOSH root");
        let root = dir.path();

        let bin_dir = root.join("packages").join("bpm").join("bin");
        fs::create_dir_all(&bin_dir).unwrap();
        let runc = bin_dir.join("runc");
        fs::write(&runc, STUB_RUNC).unwrap();
        let mut perms = fs::metadata(&runc).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&runc, perms).unwrap();

        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Private state directory the stub runtime keeps containers in.
    pub fn runtime_root(&self) -> PathBuf {
        self.path().join("data").join("bpm").join("runc")
    }

    /// Writes a `bpm.yml` under the conventional job config directory.
    pub fn write_config(&self, job: &str, yaml: &str) -> PathBuf {
        let config_dir = self.path().join("jobs").join(job).join("config");
        fs::create_dir_all(&config_dir).unwrap();
        let path = config_dir.join("bpm.yml");
        fs::write(&path, yaml).unwrap();
        path
    }

    /// Plants a fault marker the stub runtime checks before acting.
    pub fn inject_fault(&self, marker: &str) {
        fs::create_dir_all(self.runtime_root()).unwrap();
        fs::write(self.runtime_root().join(marker), b"").unwrap();
    }

    /// Overwrites a stub container's status, e.g. to simulate a crash.
    pub fn set_container_status(&self, id: &str, status: &str) {
        fs::write(self.runtime_root().join(id).join("status"), status).unwrap();
    }

    /// Installs a fake `strace` that records its argv and exits 0.
    ///
    /// Returns the directory to prepend to PATH and the capture file.
    pub fn install_fake_strace(&self) -> (PathBuf, PathBuf) {
        let bin_dir = self.path().join("fakebin");
        fs::create_dir_all(&bin_dir).unwrap();
        let log = bin_dir.join("strace.log");
        let strace = bin_dir.join("strace");
        fs::write(
            &strace,
            format!("#!/bin/sh\nprintf '%s\\n' \"$*\" > {}\n", log.display()),
        )
        .unwrap();
        let mut perms = fs::metadata(&strace).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&strace, perms).unwrap();
        (bin_dir, log)
    }

    /// A `bpm` invocation rooted at this directory.
    pub fn bpm(&self) -> assert_cmd::Command {
        let mut cmd = assert_cmd::Command::cargo_bin("bpm").unwrap();
        cmd.env("BPM_BOSH_ROOT", self.path());
        cmd
    }
}

/// A minimal valid configuration for one process.
pub fn sleeper_config(process: &str) -> String {
    format!(
        r#"name: {}
executable: /bin/bash
args: ["-c", "sleep 5"]
env: ["FOO=BAR"]
"#,
        process
    )
}
