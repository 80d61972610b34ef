use super::context::{AttemptContext, BaseWorkflowInputs};
use super::handlers::{FailedAttempt, ProcessHandler, default_handlers};
use crate::calculation::{CalcInfo, postscf_functions, validate_postscf};
use crate::common::PluginConfig;
use crate::common::constants::MIN_OUTPUT_BUFFER_SECONDS;
use crate::domain::{CalculationOutputs, DftkError, DftkResult, ExitStatus};
use crate::parsers::{JsonRecordDecoder, interpret};
use crate::runner::{CalculationRunner, CompletedRun};
use crate::utils::{create_kpoints_from_distance, validate_and_prepare_pseudos_inputs};
use serde::Serialize;
use std::path::PathBuf;

pub const MAX_ATTEMPTS: u32 = 5;
pub const CALCULATION_LABEL: &str = "DftkCalculation";

pub type WorkflowOutputs = CalculationOutputs;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptSummary {
    pub index: u32,
    pub exit_status: ExitStatus,
    pub remote_folder: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowResult {
    pub exit_status: ExitStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outputs: Option<WorkflowOutputs>,
    pub attempts: Vec<AttemptSummary>,
    pub report: Vec<String>,
}

impl WorkflowResult {
    pub fn is_success(&self) -> bool {
        self.exit_status.is_success()
    }
}

/// Restart controller around [`DftkCalculation`](crate::calculation::DftkCalculation).
///
/// Inputs are validated once, then attempts run until one succeeds, a
/// failure is left unhandled, or [`MAX_ATTEMPTS`] is reached.
pub struct DftkBaseWorkflow<'a> {
    inputs: BaseWorkflowInputs,
    config: &'a PluginConfig,
    handlers: Vec<ProcessHandler>,
    decoder: JsonRecordDecoder,
    context: AttemptContext,
    pending: Option<CalcInfo>,
    completed: Option<CompletedRun>,
    exit_status: Option<ExitStatus>,
    last_failure: Option<ExitStatus>,
    outputs: Option<WorkflowOutputs>,
    attempts: Vec<AttemptSummary>,
    report: Vec<String>,
}

impl<'a> DftkBaseWorkflow<'a> {
    pub fn new(inputs: BaseWorkflowInputs, config: &'a PluginConfig) -> Self {
        let context = AttemptContext::from_inputs(&inputs);
        Self {
            inputs,
            config,
            handlers: default_handlers(),
            decoder: JsonRecordDecoder,
            context,
            pending: None,
            completed: None,
            exit_status: None,
            last_failure: None,
            outputs: None,
            attempts: Vec::new(),
            report: Vec::new(),
        }
    }

    pub fn context(&self) -> &AttemptContext {
        &self.context
    }

    pub fn run<R>(&mut self, runner: &mut R) -> DftkResult<WorkflowResult>
    where
        R: CalculationRunner + ?Sized,
    {
        self.setup();
        let validation = self
            .validate_parameters()
            .and_then(|()| self.validate_kpoints())
            .and_then(|()| self.validate_pseudos())
            .and_then(|()| self.validate_resources());
        if let Err(status) = validation {
            self.exit_status = Some(status);
            return Ok(self.results());
        }

        while self.should_run_process() {
            self.prepare_process()?;
            self.run_process(runner)?;
            self.inspect_process()?;
        }
        Ok(self.results())
    }

    pub fn setup(&mut self) {
        self.context = AttemptContext::from_inputs(&self.inputs);
        self.pending = None;
        self.completed = None;
        self.exit_status = None;
        self.last_failure = None;
        self.outputs = None;
        self.attempts.clear();
        self.report.clear();
    }

    pub fn validate_parameters(&mut self) -> Result<(), ExitStatus> {
        let checked = postscf_functions(&self.context.parameters)
            .and_then(|functions| validate_postscf(&functions));
        checked.map_err(|error| self.reject(ExitStatus::InvalidParametersInput, &error))
    }

    pub fn validate_kpoints(&mut self) -> Result<(), ExitStatus> {
        let explicit = self.context.kpoints.clone();
        let kpoints = match (explicit, self.context.kpoints_distance) {
            (Some(kpoints), None) => kpoints,
            (None, Some(distance)) => create_kpoints_from_distance(&self.context.structure, distance)
                .map_err(|error| self.reject(ExitStatus::InvalidKpointsInput, &error))?,
            _ => {
                let error = DftkError::input_validation(
                    "INPUT.KPOINTS_EXCLUSIVE",
                    "exactly one of `kpoints` and `kpoints_distance` must be specified",
                );
                return Err(self.reject(ExitStatus::InvalidKpointsInput, &error));
            }
        };

        if kpoints.get_mesh().is_none() {
            let error = DftkError::input_validation(
                "INPUT.KPOINTS_MESH",
                "the kpoints input does not have a valid mesh set",
            );
            return Err(self.reject(ExitStatus::InvalidKpointsInput, &error));
        }
        self.context.kpoints = Some(kpoints);
        Ok(())
    }

    pub fn validate_pseudos(&mut self) -> Result<(), ExitStatus> {
        match validate_and_prepare_pseudos_inputs(
            &self.context.structure,
            self.inputs.pseudos.as_ref(),
        ) {
            Ok(pseudos) => {
                self.context.pseudos = pseudos;
                Ok(())
            }
            Err(error) => Err(self.reject(ExitStatus::InvalidPseudopotentialInput, &error)),
        }
    }

    pub fn validate_resources(&mut self) -> Result<(), ExitStatus> {
        let options = &self.context.options;
        let (Some(machines), Some(walltime)) = (
            options.resources.num_machines,
            options.max_wallclock_seconds,
        ) else {
            let error = DftkError::input_validation(
                "INPUT.RESOURCES_UNDERSPECIFIED",
                "the options did not specify both `resources.num_machines` and `max_wallclock_seconds`",
            );
            return Err(self.reject(ExitStatus::UnderspecifiedResources, &error));
        };

        let problem = if walltime < MIN_OUTPUT_BUFFER_SECONDS {
            Some(format!(
                "`max_wallclock_seconds` must be at least {MIN_OUTPUT_BUFFER_SECONDS}, got {walltime}"
            ))
        } else if machines
            .checked_mul(options.resources.num_mpiprocs_per_machine)
            .is_none()
        {
            Some(format!(
                "{machines} machines with {} processes each exceed the process limit",
                options.resources.num_mpiprocs_per_machine
            ))
        } else if options.resources.num_mpiprocs_per_machine > 1 && !options.withmpi {
            Some(format!(
                "{} processes per machine requested with `withmpi` disabled",
                options.resources.num_mpiprocs_per_machine
            ))
        } else {
            None
        };
        match problem {
            Some(message) => {
                let error = DftkError::input_validation("INPUT.RESOURCES", message);
                Err(self.reject(ExitStatus::InvalidResources, &error))
            }
            None => Ok(()),
        }
    }

    pub fn should_run_process(&self) -> bool {
        self.exit_status.is_none() && self.context.attempt_count < MAX_ATTEMPTS
    }

    pub fn prepare_process(&mut self) -> DftkResult<&CalcInfo> {
        if let Some(source) = &self.context.restart_source {
            tracing::info!(restart_source = %source.display(), "resuming from previous checkpoint");
        }
        let calc = self
            .context
            .calculation()?
            .prepare_for_submission(self.config)?;
        Ok(self.pending.insert(calc))
    }

    pub fn run_process<R>(&mut self, runner: &mut R) -> DftkResult<()>
    where
        R: CalculationRunner + ?Sized,
    {
        let calc = self.pending.as_ref().ok_or_else(|| {
            DftkError::internal("SYS.ATTEMPT_UNPREPARED", "no attempt has been prepared")
        })?;
        self.context.attempt_count += 1;
        tracing::info!(attempt = self.context.attempt_count, "launching {CALCULATION_LABEL}");
        self.completed = Some(runner.run(calc)?);
        Ok(())
    }

    pub fn inspect_process(&mut self) -> DftkResult<()> {
        let (Some(calc), Some(run)) = (self.pending.take(), self.completed.take()) else {
            return Err(DftkError::internal(
                "SYS.ATTEMPT_MISSING",
                "no finished attempt to inspect",
            ));
        };

        let result = interpret(
            &run.termination,
            &run.retrieved,
            &calc.retrieve_list,
            calc.atom_count,
            &self.decoder,
            &self.config.log_markers,
        );
        let index = self.context.attempt_count;
        let exit_status = result.status.exit_status();
        self.attempts.push(AttemptSummary {
            index,
            exit_status,
            remote_folder: run.remote_folder.clone(),
        });

        if result.status.is_success() {
            tracing::info!(attempt = index, "{CALCULATION_LABEL} finished successfully");
            self.exit_status = Some(ExitStatus::Success);
            self.outputs = Some(result.outputs);
            return Ok(());
        }

        self.last_failure = Some(exit_status);
        let failed = FailedAttempt {
            index,
            result: &result,
            remote_folder: &run.remote_folder,
        };
        for handler in self.handlers.iter().filter(|handler| handler.matches(result.status)) {
            let outcome = (handler.action)(&mut self.context, &failed);
            if !outcome.report.handled {
                tracing::debug!(handler = handler.name, attempt = index, "handler declined");
                continue;
            }

            let failure = failure_line(index, exit_status);
            tracing::warn!(handler = handler.name, attempt = index, exit_status = exit_status.code(), "{failure}");
            self.report.push(failure);
            if let Some(action) = outcome.action {
                let line = format!("Action taken: {action}");
                tracing::info!(handler = handler.name, "{line}");
                self.report.push(line);
            }

            if !outcome.report.do_retry {
                self.exit_status = Some(ExitStatus::Success);
                self.outputs = Some(result.outputs.clone());
            }
            return Ok(());
        }

        let failure = failure_line(index, exit_status);
        tracing::error!(attempt = index, exit_status = exit_status.code(), "{failure}");
        self.report.push(failure);
        self.exit_status = Some(exit_status);
        Ok(())
    }

    pub fn results(&mut self) -> WorkflowResult {
        let exit_status = match self.exit_status {
            Some(status) => status,
            None => {
                let status = self.last_failure.unwrap_or(ExitStatus::ProcessCrashed);
                let line = format!(
                    "reached the maximum number of {MAX_ATTEMPTS} attempts without success"
                );
                tracing::error!(exit_status = status.code(), "{line}");
                self.report.push(line);
                self.exit_status = Some(status);
                status
            }
        };

        WorkflowResult {
            exit_status,
            outputs: if exit_status.is_success() {
                self.outputs.clone()
            } else {
                None
            },
            attempts: self.attempts.clone(),
            report: self.report.clone(),
        }
    }

    fn reject(&mut self, status: ExitStatus, error: &DftkError) -> ExitStatus {
        tracing::error!(exit_status = status.code(), "{}", error.diagnostic_line());
        self.report.push(error.message().to_string());
        status
    }
}

fn failure_line(index: u32, exit_status: ExitStatus) -> String {
    format!(
        "{CALCULATION_LABEL}<{index}> failed with exit status {}: {}",
        exit_status.code(),
        exit_status.message()
    )
}

#[cfg(test)]
mod tests {
    use super::{DftkBaseWorkflow, failure_line};
    use crate::common::PluginConfig;
    use crate::domain::{
        CalcOptions, ExitStatus, KpointsData, PseudoFamily, PseudoPotential, Resources, Structure,
    };
    use crate::workflows::context::BaseWorkflowInputs;
    use serde_json::json;

    fn inputs() -> BaseWorkflowInputs {
        let mut structure = Structure::new([[0.0, 2.715, 2.715], [2.715, 0.0, 2.715], [2.715, 2.715, 0.0]]);
        structure.append_atom_fractional("Si", [0.0, 0.0, 0.0]);
        structure.append_atom_fractional("Si", [0.25, 0.25, 0.25]);
        let mut pseudos = PseudoFamily::new();
        pseudos.insert("Si".to_string(), PseudoPotential::new("/pseudos/Si.upf"));
        BaseWorkflowInputs {
            parameters: json!({ "model_kwargs": { "temperature": 0.001 } }),
            structure,
            pseudos: Some(pseudos),
            kpoints: None,
            kpoints_distance: Some(0.5),
            options: CalcOptions {
                resources: Resources {
                    num_machines: Some(1),
                    num_mpiprocs_per_machine: 1,
                },
                max_wallclock_seconds: Some(1800),
                withmpi: false,
            },
        }
    }

    #[test]
    fn kpoints_distance_is_resolved_into_a_mesh() {
        let config = PluginConfig::default();
        let mut workflow = DftkBaseWorkflow::new(inputs(), &config);
        workflow.setup();

        assert_eq!(workflow.validate_kpoints(), Ok(()));
        assert_eq!(
            workflow.context().kpoints.as_ref().and_then(KpointsData::get_mesh),
            Some(([5, 5, 5], [0.0, 0.0, 0.0]))
        );
    }

    #[test]
    fn kpoints_must_be_given_exactly_once() {
        let config = PluginConfig::default();
        let mut both = inputs();
        both.kpoints = Some(KpointsData::mesh([2, 2, 2]));
        let mut workflow = DftkBaseWorkflow::new(both, &config);
        workflow.setup();
        assert_eq!(workflow.validate_kpoints(), Err(ExitStatus::InvalidKpointsInput));

        let mut neither = inputs();
        neither.kpoints_distance = None;
        let mut workflow = DftkBaseWorkflow::new(neither, &config);
        workflow.setup();
        assert_eq!(workflow.validate_kpoints(), Err(ExitStatus::InvalidKpointsInput));
    }

    #[test]
    fn explicit_kpoint_lists_are_rejected_for_scf() {
        let config = PluginConfig::default();
        let mut list = inputs();
        list.kpoints_distance = None;
        list.kpoints = Some(KpointsData::list(vec![[0.0, 0.0, 0.0]]));
        let mut workflow = DftkBaseWorkflow::new(list, &config);
        workflow.setup();
        assert_eq!(workflow.validate_kpoints(), Err(ExitStatus::InvalidKpointsInput));
    }

    #[test]
    fn resources_need_machines_and_walltime() {
        let config = PluginConfig::default();
        let mut missing = inputs();
        missing.options.resources.num_machines = None;
        let mut workflow = DftkBaseWorkflow::new(missing, &config);
        workflow.setup();
        assert_eq!(workflow.validate_resources(), Err(ExitStatus::UnderspecifiedResources));

        let mut short = inputs();
        short.options.max_wallclock_seconds = Some(30);
        let mut workflow = DftkBaseWorkflow::new(short, &config);
        workflow.setup();
        assert_eq!(workflow.validate_resources(), Err(ExitStatus::InvalidResources));

        let mut serial = inputs();
        serial.options.resources.num_mpiprocs_per_machine = 4;
        let mut workflow = DftkBaseWorkflow::new(serial, &config);
        workflow.setup();
        assert_eq!(workflow.validate_resources(), Err(ExitStatus::InvalidResources));

        let mut oversized = inputs();
        oversized.options.withmpi = true;
        oversized.options.resources.num_machines = Some(u32::MAX);
        oversized.options.resources.num_mpiprocs_per_machine = 2;
        let mut workflow = DftkBaseWorkflow::new(oversized, &config);
        workflow.setup();
        assert_eq!(workflow.validate_resources(), Err(ExitStatus::InvalidResources));

        let mut long = inputs();
        long.options.max_wallclock_seconds = Some(u64::MAX);
        let mut workflow = DftkBaseWorkflow::new(long, &config);
        workflow.setup();
        assert_eq!(workflow.validate_resources(), Ok(()));
        assert_eq!(workflow.validate_kpoints(), Ok(()));
        let calc = workflow.prepare_process().expect("attempt should be prepared");
        assert!(calc.input_content.contains("16602069666338596453"));
    }

    #[test]
    fn unsupported_postscf_function_is_an_invalid_parameter() {
        let config = PluginConfig::default();
        let mut unsupported = inputs();
        unsupported.parameters = json!({ "postscf": [{ "$function": "compute_phonons" }] });
        let mut workflow = DftkBaseWorkflow::new(unsupported, &config);
        workflow.setup();
        assert_eq!(
            workflow.validate_parameters(),
            Err(ExitStatus::InvalidParametersInput)
        );
    }

    #[test]
    fn failure_lines_name_the_attempt_and_status() {
        assert_eq!(
            failure_line(2, ExitStatus::ScfOutOfWalltime),
            format!(
                "DftkCalculation<2> failed with exit status 400: {}",
                ExitStatus::ScfOutOfWalltime.message()
            )
        );
    }
}
