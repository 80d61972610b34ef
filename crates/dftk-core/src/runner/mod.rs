//! Execution of prepared calculations.
//!
//! The workflow layer only talks to [`CalculationRunner`]; [`LocalRunner`]
//! runs attempts as child processes in per-attempt working directories.

use crate::calculation::CalcInfo;
use crate::common::PluginConfig;
use crate::domain::{DftkError, DftkResult};
use crate::parsers::RetrievedArtifacts;
use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const MPIPROCS_PLACEHOLDER: &str = "{tot_num_mpiprocs}";

/// Signals a batch scheduler sends to cancel a job or enforce its time limit.
#[cfg(unix)]
const SCHEDULER_KILL_SIGNALS: [i32; 3] = [
    9,  // SIGKILL
    15, // SIGTERM
    24, // SIGXCPU
];

/// Terminal state of the external process as seen by the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Termination {
    pub exit_code: Option<i32>,
    /// The engine killed the process because it reached its wall-time limit.
    pub walltime_exceeded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedRun {
    pub termination: Termination,
    pub retrieved: RetrievedArtifacts,
    /// Working directory of the attempt; later attempts may restart from it.
    pub remote_folder: PathBuf,
}

pub trait CalculationRunner {
    fn run(&mut self, calc: &CalcInfo) -> DftkResult<CompletedRun>;
}

/// Runs attempts as local child processes under `<work_root>/attempt-<n>`.
///
/// Every attempt gets a directory that did not exist before, so runs sharing
/// a `work_root` never see each other's artifacts.
#[derive(Debug, Clone)]
pub struct LocalRunner {
    work_root: PathBuf,
    mpirun_command: Vec<String>,
    poll_interval: Duration,
    attempts: u32,
}

impl LocalRunner {
    pub fn new(work_root: impl Into<PathBuf>, config: &PluginConfig) -> Self {
        Self {
            work_root: work_root.into(),
            mpirun_command: config.mpirun_command.clone(),
            poll_interval: Duration::from_millis(200),
            attempts: 0,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn work_root(&self) -> &Path {
        &self.work_root
    }

    fn command(&self, calc: &CalcInfo) -> DftkResult<Command> {
        let mut argv = Vec::new();
        if calc.code.withmpi && !self.mpirun_command.is_empty() {
            let resources = &calc.options.resources;
            let machines = resources.num_machines.unwrap_or(1);
            let total = machines
                .checked_mul(resources.num_mpiprocs_per_machine)
                .ok_or_else(|| {
                    DftkError::input_validation(
                        "INPUT.MPI_PROCS",
                        format!(
                            "{machines} machines with {} processes each exceed the process limit",
                            resources.num_mpiprocs_per_machine
                        ),
                    )
                })?;
            argv.extend(
                self.mpirun_command
                    .iter()
                    .map(|token| token.replace(MPIPROCS_PLACEHOLDER, &total.to_string())),
            );
        }
        argv.push(calc.code.program.to_string_lossy().into_owned());
        argv.extend(calc.code.cmdline_params.iter().cloned());

        let mut command = Command::new(&argv[0]);
        command.args(&argv[1..]);
        Ok(command)
    }

    fn fresh_attempt_dir(&mut self) -> DftkResult<PathBuf> {
        let create_error = |path: &Path, source: std::io::Error| {
            DftkError::io_system(
                "IO.WORKDIR_CREATE",
                format!("failed to create '{}': {}", path.display(), source),
            )
        };
        fs::create_dir_all(&self.work_root)
            .map_err(|source| create_error(&self.work_root, source))?;
        loop {
            self.attempts += 1;
            let work_dir = self.work_root.join(format!("attempt-{}", self.attempts));
            match fs::create_dir(&work_dir) {
                Ok(()) => return Ok(work_dir),
                Err(source) if source.kind() == ErrorKind::AlreadyExists => continue,
                Err(source) => return Err(create_error(&work_dir, source)),
            }
        }
    }
}

#[cfg(unix)]
fn killed_by_scheduler(status: &ExitStatus) -> bool {
    use std::os::unix::process::ExitStatusExt;
    status
        .signal()
        .is_some_and(|signal| SCHEDULER_KILL_SIGNALS.contains(&signal))
}

#[cfg(not(unix))]
fn killed_by_scheduler(_status: &ExitStatus) -> bool {
    false
}

impl CalculationRunner for LocalRunner {
    fn run(&mut self, calc: &CalcInfo) -> DftkResult<CompletedRun> {
        let mut command = self.command(calc)?;
        let work_dir = self.fresh_attempt_dir()?;
        stage_inputs(calc, &work_dir)?;

        let stdout_path = work_dir.join(&calc.code.stdout_name);
        let stdout = File::create(&stdout_path).map_err(|source| {
            DftkError::io_system(
                "IO.STDOUT_CREATE",
                format!("failed to create '{}': {}", stdout_path.display(), source),
            )
        })?;
        let stderr = stdout.try_clone().map_err(|source| {
            DftkError::io_system(
                "IO.STDOUT_CREATE",
                format!("failed to share '{}': {}", stdout_path.display(), source),
            )
        })?;

        command
            .current_dir(&work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));
        tracing::debug!(workdir = %work_dir.display(), command = ?command, "launching attempt");

        let mut child = command.spawn().map_err(|source| {
            DftkError::io_system(
                "IO.PROCESS_SPAWN",
                format!(
                    "failed to launch '{}': {}",
                    calc.code.program.display(),
                    source
                ),
            )
        })?;

        let deadline = calc
            .options
            .max_wallclock_seconds
            .and_then(|seconds| Instant::now().checked_add(Duration::from_secs(seconds)));
        let wait_error = |source: std::io::Error| {
            DftkError::io_system(
                "IO.PROCESS_WAIT",
                format!("failed to wait for attempt process: {source}"),
            )
        };

        let termination = loop {
            if let Some(status) = child.try_wait().map_err(wait_error)? {
                let cancelled = killed_by_scheduler(&status);
                if cancelled {
                    tracing::warn!(workdir = %work_dir.display(), status = %status, "attempt was cancelled");
                }
                break Termination {
                    exit_code: status.code(),
                    walltime_exceeded: cancelled,
                };
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                tracing::warn!(workdir = %work_dir.display(), "wall-time limit reached; killing attempt");
                // The child may exit between the poll and the kill.
                let _ = child.kill();
                let status = child.wait().map_err(wait_error)?;
                break Termination {
                    exit_code: status.code(),
                    walltime_exceeded: true,
                };
            }
            thread::sleep(self.poll_interval);
        };

        let retrieved = RetrievedArtifacts::from_dir(&work_dir, &calc.retrieve_list)?;
        tracing::debug!(
            workdir = %work_dir.display(),
            exit_code = ?termination.exit_code,
            retrieved = retrieved.names().count(),
            "attempt finished"
        );

        Ok(CompletedRun {
            termination,
            retrieved,
            remote_folder: work_dir,
        })
    }
}

/// Writes the input document and stages pseudopotentials and the restart checkpoint.
pub fn stage_inputs(calc: &CalcInfo, work_dir: &Path) -> DftkResult<()> {
    fs::create_dir_all(work_dir).map_err(|source| {
        DftkError::io_system(
            "IO.WORKDIR_CREATE",
            format!("failed to create '{}': {}", work_dir.display(), source),
        )
    })?;
    write_file(&work_dir.join(&calc.input_filename), &calc.input_content)?;

    for copy in &calc.local_copy_list {
        copy_file(&copy.source, &work_dir.join(&copy.target))?;
    }

    for copy in &calc.remote_copy_list {
        if !copy.source.is_file() {
            tracing::warn!(
                source = %copy.source.display(),
                "restart checkpoint not found; starting from scratch"
            );
            continue;
        }
        copy_file(&copy.source, &work_dir.join(&copy.target))?;
    }
    Ok(())
}

fn write_file(path: &Path, content: &str) -> DftkResult<()> {
    fs::write(path, content).map_err(|source| {
        DftkError::io_system(
            "IO.INPUT_WRITE",
            format!("failed to write '{}': {}", path.display(), source),
        )
    })
}

fn copy_file(source: &Path, target: &Path) -> DftkResult<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|error| {
            DftkError::io_system(
                "IO.STAGE_COPY",
                format!("failed to create '{}': {}", parent.display(), error),
            )
        })?;
    }
    fs::copy(source, target).map_err(|error| {
        DftkError::io_system(
            "IO.STAGE_COPY",
            format!(
                "failed to copy '{}' to '{}': {}",
                source.display(),
                target.display(),
                error
            ),
        )
    })?;
    Ok(())
}
