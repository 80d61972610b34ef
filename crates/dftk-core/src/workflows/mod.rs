mod bands;
mod base;
mod context;
mod handlers;

pub use bands::{
    BandsWorkflowInputs, BandsWorkflowResult, DEFAULT_KPATH_DISTANCE, DftkBandsWorkflow,
    KpathProvider, KpathResult, KpathVertex, MAX_KPATH_POINTS, SegmentKpath, set_bands_kpath,
};
pub use base::{
    AttemptSummary, CALCULATION_LABEL, DftkBaseWorkflow, MAX_ATTEMPTS, WorkflowOutputs,
    WorkflowResult,
};
pub use context::{AttemptContext, BaseWorkflowInputs};
pub use handlers::{
    FailedAttempt, HandlerAction, HandlerOutcome, HandlerReport, ProcessHandler,
    RECOVERY_MAXITER, RECOVERY_WALLTIME_SECONDS, default_handlers,
    handle_recoverable_scf_unconverged_and_out_of_walltime, handle_scf_convergence_not_reached,
};
