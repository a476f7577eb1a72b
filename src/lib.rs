//! # bpm
//!
//! **BOSH Process Manager** - a thin, opinionated supervisor that runs
//! long-running job processes inside OCI-compliant Linux containers on a
//! BOSH-managed host.
//!
//! Operators declare a process as YAML; bpm translates that into an OCI
//! runtime bundle, asks an external OCI runtime (`runc`) to create and
//! start the container, and exposes a small CLI for the lifecycle
//! operations `start`, `stop`, `list`, `pid`, `trace`, and `shell`.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                            bpm                                 │
//! ├────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────────────────────────────────────────────────┐  │
//! │  │                 Lifecycle Orchestrator                   │  │
//! │  │   start │ stop │ list │ pid │ trace │ shell              │  │
//! │  └────┬─────────┬──────────┬─────────────┬──────────────────┘  │
//! │       │         │          │             │                     │
//! │  ┌────┴───┐ ┌───┴────┐ ┌───┴─────┐ ┌─────┴──────────────────┐  │
//! │  │ Config │ │ Bundle │ │ LogPipe │ │    Runtime Adapter     │  │
//! │  │ Loader │ │ Builder│ │         │ │ create start state     │  │
//! │  └────┬───┘ └───┬────┘ └───┬─────┘ │ kill delete exec events│  │
//! │       │         │          │       └─────────┬──────────────┘  │
//! │  ┌────┴─────────┴──────────┴───┐             │                 │
//! │  │        Path Resolver        │        external `runc`        │
//! │  └─────────────────────────────┘                               │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Container Lifecycle
//!
//! ```text
//! absent → created → running → stopping → stopped → absent
//!          (create)  (start)   (kill)    (wait)   (delete+rmbundle)
//! ```
//!
//! # Security Model
//!
//! Containers get fresh `pid`, `ipc`, `uts`, and `mount` namespaces, a
//! read-only root filesystem assembled from bind mounts (no image
//! unpacking), and empty capability sets unless the configuration
//! retains specific capabilities. The network namespace is shared with
//! the host so jobs can bind host ports.
//!
//! # One-Shot Model
//!
//! Each invocation is a single short-lived transaction; there is no
//! event loop or long-lived scheduler. Concurrent invocations on the
//! same process are serialised with an advisory file lock. The only
//! background work is the optional `events` stream consumer, driven by a
//! cancellation token.

pub mod bundle;
pub mod config;
pub mod constants;
pub mod error;
pub mod lifecycle;
pub mod lock;
pub mod logs;
pub mod paths;
pub mod runc;

pub use error::{Error, Result};
