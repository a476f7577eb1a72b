//! bpm - BOSH Process Manager CLI.
//!
//! ```sh
//! bpm start -j <job> -c <config>
//! bpm stop  -j <job> -c <config>
//! bpm list
//! bpm pid   -j <job> -c <config>
//! bpm trace -j <job> -c <config>
//! bpm shell -j <job> -c <config>
//! ```
//!
//! `BPM_BOSH_ROOT` must point at the BOSH root directory; it is read
//! once here and threaded through every component as a value. Exit code
//! is 0 on success and 1 on any user-visible failure, with exactly one
//! `Error:`-prefixed line on stderr.

use bpm::error::{Error, Result};
use bpm::lifecycle::{self, Manager, ProcessListing};
use bpm::logs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

// =============================================================================
// CLI Parsing
// =============================================================================

#[derive(Debug)]
enum Command {
    Start(JobArgs),
    Stop(JobArgs),
    List,
    Pid(JobArgs),
    Trace(JobArgs),
    Shell(JobArgs),
}

#[derive(Debug)]
struct JobArgs {
    job: String,
    config: PathBuf,
}

#[derive(Debug)]
enum UsageError {
    NoArguments,
    UnknownCommand(String),
    MissingJob,
    MissingConfig,
    MissingValue(&'static str),
}

impl UsageError {
    fn message(&self) -> Option<String> {
        match self {
            Self::NoArguments => None,
            Self::UnknownCommand(cmd) => Some(format!("unknown command: {}", cmd)),
            Self::MissingJob => Some("must specify a job".to_string()),
            Self::MissingConfig => Some("must specify a configuration file".to_string()),
            Self::MissingValue(flag) => Some(format!("{} requires a value", flag)),
        }
    }
}

fn parse_args(args: &[String]) -> std::result::Result<Command, UsageError> {
    let Some(command) = args.first() else {
        return Err(UsageError::NoArguments);
    };

    match command.as_str() {
        "list" => Ok(Command::List),
        "start" => parse_job_args(&args[1..]).map(Command::Start),
        "stop" => parse_job_args(&args[1..]).map(Command::Stop),
        "pid" => parse_job_args(&args[1..]).map(Command::Pid),
        "trace" => parse_job_args(&args[1..]).map(Command::Trace),
        "shell" => parse_job_args(&args[1..]).map(Command::Shell),
        unknown => Err(UsageError::UnknownCommand(unknown.to_string())),
    }
}

fn parse_job_args(args: &[String]) -> std::result::Result<JobArgs, UsageError> {
    let mut job = None;
    let mut config = None;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-j" | "--job" => {
                job = Some(
                    args.get(i + 1)
                        .ok_or(UsageError::MissingValue("--job"))?
                        .clone(),
                );
                i += 2;
            }
            "-c" | "--config" => {
                config = Some(
                    args.get(i + 1)
                        .ok_or(UsageError::MissingValue("--config"))?
                        .clone(),
                );
                i += 2;
            }
            _ => i += 1,
        }
    }

    let job = job.ok_or(UsageError::MissingJob)?;
    let config = config.ok_or(UsageError::MissingConfig)?;
    Ok(JobArgs {
        job,
        config: PathBuf::from(config),
    })
}

fn print_usage() {
    eprintln!(
        r#"Usage:
  bpm <command> [flags]

Commands:
  start    Start a process as defined by its configuration
  stop     Stop a running process and remove its container
  list     List the state of each managed process
  pid      Print the PID of a running process
  trace    Attach strace to a running process
  shell    Open a shell inside a process's container

Flags:
  -j, --job <name>      Job name (required for all commands except list)
  -c, --config <path>   Process configuration file

Environment:
  BPM_BOSH_ROOT         Absolute path of the BOSH root directory (required)"#
    );
}

// =============================================================================
// Command Implementations
// =============================================================================

async fn run(command: Command, root: &Path) -> Result<ExitCode> {
    match command {
        Command::List => {
            let rows = lifecycle::list(root).await?;
            print_listing(&rows);
            Ok(ExitCode::SUCCESS)
        }
        Command::Start(args) => {
            let manager = Manager::load(root, &args.job, &args.config)?;
            init_logging(&manager)?;

            let cancel = CancellationToken::new();
            spawn_cancel_on_signal(cancel.clone());
            manager.start(&cancel).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Stop(args) => {
            let manager = Manager::load(root, &args.job, &args.config)?;
            init_logging(&manager)?;

            // Teardown is best-effort and must not be interrupted.
            spawn_swallow_signals();
            manager.stop().await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Pid(args) => {
            let manager = Manager::load(root, &args.job, &args.config)?;
            let pid = manager.pid().await?;
            println!("{}", pid);
            Ok(ExitCode::SUCCESS)
        }
        Command::Trace(args) => {
            let manager = Manager::load(root, &args.job, &args.config)?;
            let code = manager.trace().await?;
            Ok(exit_code(code))
        }
        Command::Shell(args) => {
            let manager = Manager::load(root, &args.job, &args.config)?;
            let code = manager.shell().await?;
            Ok(exit_code(code))
        }
    }
}

fn print_listing(rows: &[ProcessListing]) {
    if rows.is_empty() {
        return;
    }

    let width = rows
        .iter()
        .map(|r| r.name.len())
        .chain(std::iter::once("Name".len()))
        .max()
        .unwrap_or(4);

    println!("{:<width$}  {:>8}  {}", "Name", "Pid", "Status");
    for row in rows {
        let pid = row
            .pid
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("{:<width$}  {:>8}  {}", row.name, pid, row.status);
    }
}

/// Routes the supervisor's own log lines into `sys/log/<job>/bpm.log`
/// as newline-delimited JSON, appending to whatever is already there.
fn init_logging(manager: &Manager) -> Result<()> {
    let file = logs::open_bpm_log(manager.paths())?;
    tracing_subscriber::fmt()
        .json()
        .flatten_event(true)
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

/// Cancels the start transaction at its next safe point on SIGTERM or
/// SIGINT; the orchestrator rolls back before surfacing the error.
fn spawn_cancel_on_signal(cancel: CancellationToken) {
    tokio::spawn(async move {
        let (Ok(mut term), Ok(mut int)) = (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) else {
            return;
        };
        tokio::select! {
            _ = term.recv() => {}
            _ = int.recv() => {}
        }
        cancel.cancel();
    });
}

/// Installs handlers that discard SIGTERM and SIGINT for the lifetime of
/// the invocation.
fn spawn_swallow_signals() {
    tokio::spawn(async move {
        let (Ok(mut term), Ok(mut int)) = (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) else {
            return;
        };
        loop {
            tokio::select! {
                _ = term.recv() => {}
                _ = int.recv() => {}
            }
        }
    });
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

fn bosh_root() -> Result<PathBuf> {
    let root = std::env::var("BPM_BOSH_ROOT")
        .map_err(|_| Error::InvalidUsage("BPM_BOSH_ROOT must be set".to_string()))?;
    let root = PathBuf::from(root);
    if !root.is_absolute() {
        return Err(Error::InvalidUsage(
            "BPM_BOSH_ROOT must be an absolute path".to_string(),
        ));
    }
    Ok(root)
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let command = match parse_args(&args) {
        Ok(command) => command,
        Err(usage) => {
            if let Some(message) = usage.message() {
                eprintln!("Error: {}", message);
            }
            print_usage();
            return ExitCode::FAILURE;
        }
    };

    let root = match bosh_root() {
        Ok(root) => root,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(command, &root).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
