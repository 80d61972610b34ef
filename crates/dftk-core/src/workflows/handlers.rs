//! Priority-ordered failure handlers of the base workflow.

use super::context::AttemptContext;
use crate::domain::AttemptStatus;
use crate::parsers::AttemptResult;
use crate::utils::merge_parameters;
use serde_json::json;
use std::path::Path;

/// Wall-time granted to an attempt that resumes from a checkpoint.
pub const RECOVERY_WALLTIME_SECONDS: u64 = 3600;
/// SCF iteration cap granted to an attempt that resumes from a checkpoint.
pub const RECOVERY_MAXITER: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerReport {
    pub handled: bool,
    pub do_retry: bool,
}

impl HandlerReport {
    pub const fn retry() -> Self {
        Self {
            handled: true,
            do_retry: true,
        }
    }

    pub const fn not_handled() -> Self {
        Self {
            handled: false,
            do_retry: false,
        }
    }
}

/// What a handler did, with the action line reported when it handled the failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerOutcome {
    pub report: HandlerReport,
    pub action: Option<String>,
}

impl HandlerOutcome {
    fn retry(action: impl Into<String>) -> Self {
        Self {
            report: HandlerReport::retry(),
            action: Some(action.into()),
        }
    }

    fn not_handled() -> Self {
        Self {
            report: HandlerReport::not_handled(),
            action: None,
        }
    }
}

/// The attempt a handler is asked to react to.
#[derive(Debug, Clone, Copy)]
pub struct FailedAttempt<'a> {
    pub index: u32,
    pub result: &'a AttemptResult,
    pub remote_folder: &'a Path,
}

pub type HandlerAction = fn(&mut AttemptContext, &FailedAttempt<'_>) -> HandlerOutcome;

#[derive(Debug, Clone, Copy)]
pub struct ProcessHandler {
    pub name: &'static str,
    pub priority: u32,
    pub triggers: &'static [AttemptStatus],
    pub action: HandlerAction,
}

impl ProcessHandler {
    pub fn matches(&self, status: AttemptStatus) -> bool {
        self.triggers.contains(&status)
    }
}

/// Handler chain sorted by descending priority.
pub fn default_handlers() -> Vec<ProcessHandler> {
    let mut handlers = vec![
        ProcessHandler {
            name: "handle_scf_convergence_not_reached",
            priority: 500,
            triggers: &[AttemptStatus::ScfNotConverged],
            action: handle_scf_convergence_not_reached,
        },
        ProcessHandler {
            name: "handle_recoverable_scf_unconverged_and_out_of_walltime",
            priority: 580,
            triggers: &[
                AttemptStatus::ScfNotConverged,
                AttemptStatus::OutOfWalltimeDuringPostProcessing,
                AttemptStatus::OutOfWalltimeDuringScf,
            ],
            action: handle_recoverable_scf_unconverged_and_out_of_walltime,
        },
    ];
    handlers.sort_by(|left, right| right.priority.cmp(&left.priority));
    handlers
}

/// Restarts from scratch with an updated structure, or resumes the failed
/// attempt's checkpoint with a recovery wall-time and iteration budget.
pub fn handle_recoverable_scf_unconverged_and_out_of_walltime(
    context: &mut AttemptContext,
    failed: &FailedAttempt<'_>,
) -> HandlerOutcome {
    if let Some(structure) = &failed.result.outputs.output_structure {
        context.structure = structure.clone();
        context.restart_source = None;
        return HandlerOutcome::retry("structure changed, restarting from scratch");
    }

    context.restart_source = Some(failed.remote_folder.to_path_buf());
    context.options.max_wallclock_seconds = Some(RECOVERY_WALLTIME_SECONDS);
    merge_parameters(
        &mut context.parameters,
        &json!({ "scf": { "$kwargs": { "maxiter": RECOVERY_MAXITER } } }),
    );
    HandlerOutcome::retry(format!(
        "restart from the last calculation, set max_wallclock_seconds as {RECOVERY_WALLTIME_SECONDS}s, maxiter as {RECOVERY_MAXITER}"
    ))
}

// No corrective action yet; an unconverged SCF that nothing else handles is fatal.
pub fn handle_scf_convergence_not_reached(
    _context: &mut AttemptContext,
    _failed: &FailedAttempt<'_>,
) -> HandlerOutcome {
    HandlerOutcome::not_handled()
}
