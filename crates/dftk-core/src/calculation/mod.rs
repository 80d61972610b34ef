mod input;

pub use input::{InputDocument, LocalCopy, build_input_document, scf_time_budget};

use crate::common::PluginConfig;
use crate::common::constants::{
    DEFAULT_CHECKPOINT_FILENAME, INPUT_FILENAME, LOG_FILENAME, SCFRES_SUMMARY_FILENAME,
    STDOUT_FILENAME, TIMINGS_FILENAME,
};
use crate::domain::{
    BANDS_FUNCTION, CalcOptions, DftkError, DftkResult, KpointsData, PseudoFamily,
    SUPPORTED_POSTSCF, Structure,
};
use serde_json::Value;
use std::path::PathBuf;

/// Inputs of a single invocation of the external program.
#[derive(Debug, Clone, PartialEq)]
pub struct DftkCalculation {
    pub parameters: Value,
    pub structure: Structure,
    pub pseudos: PseudoFamily,
    pub kpoints: KpointsData,
    pub options: CalcOptions,
    /// Working directory of a previous attempt whose checkpoint should be resumed.
    pub parent_folder: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeInfo {
    pub program: PathBuf,
    pub cmdline_params: Vec<String>,
    pub stdout_name: String,
    pub withmpi: bool,
}

/// A file copied from a previous working directory into the new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCopy {
    pub source: PathBuf,
    pub target: String,
}

/// Everything the orchestration engine needs to run one attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct CalcInfo {
    pub code: CodeInfo,
    pub input_filename: String,
    pub input_content: String,
    pub local_copy_list: Vec<LocalCopy>,
    pub remote_copy_list: Vec<RemoteCopy>,
    pub retrieve_list: Vec<String>,
    pub options: CalcOptions,
    pub atom_count: usize,
}

impl DftkCalculation {
    pub fn prepare_for_submission(&self, config: &PluginConfig) -> DftkResult<CalcInfo> {
        let postscf = postscf_functions(&self.parameters)?;
        validate_postscf(&postscf)?;

        let input = build_input_document(
            &self.parameters,
            &self.structure,
            &self.pseudos,
            &self.kpoints,
            self.options.max_wallclock_seconds,
        )?;
        let input_content = input.to_json()?;

        let remote_copy_list = self
            .parent_folder
            .as_ref()
            .map(|parent| {
                let checkpoint = checkpoint_filename(&self.parameters);
                vec![RemoteCopy {
                    source: parent.join(&checkpoint),
                    target: checkpoint,
                }]
            })
            .unwrap_or_default();

        Ok(CalcInfo {
            code: CodeInfo {
                program: config.program.clone(),
                cmdline_params: cmdline_params(config),
                stdout_name: STDOUT_FILENAME.to_string(),
                withmpi: self.options.withmpi,
            },
            input_filename: INPUT_FILENAME.to_string(),
            input_content,
            local_copy_list: input.local_copy_list,
            remote_copy_list,
            retrieve_list: retrieve_list(&postscf),
            options: self.options.clone(),
            atom_count: self.structure.atom_count(),
        })
    }
}

/// Names of the requested post-SCF functions, in request order.
pub fn postscf_functions(parameters: &Value) -> DftkResult<Vec<String>> {
    let Some(postscf) = parameters.get("postscf") else {
        return Ok(Vec::new());
    };
    let entries = postscf.as_array().ok_or_else(|| {
        DftkError::input_validation("INPUT.POSTSCF_TYPE", "`postscf` must be a list of tasks")
    })?;

    entries
        .iter()
        .map(|entry| {
            entry
                .get("$function")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    DftkError::input_validation(
                        "INPUT.POSTSCF_FUNCTION",
                        "every `postscf` task must name its `$function`",
                    )
                })
        })
        .collect()
}

pub fn validate_postscf(functions: &[String]) -> DftkResult<()> {
    match functions
        .iter()
        .find(|function| !SUPPORTED_POSTSCF.contains(&function.as_str()))
    {
        Some(function) => Err(DftkError::input_validation(
            "INPUT.POSTSCF_UNSUPPORTED",
            format!("unsupported postscf function: {function}"),
        )),
        None => Ok(()),
    }
}

/// Artifact written by a post-SCF function.
pub fn artifact_name(function: &str) -> String {
    if function == BANDS_FUNCTION {
        format!("{function}.json")
    } else {
        format!("{function}.hdf5")
    }
}

pub fn retrieve_list(postscf: &[String]) -> Vec<String> {
    let mut list = postscf
        .iter()
        .map(|function| artifact_name(function))
        .collect::<Vec<_>>();
    list.extend(
        [LOG_FILENAME, TIMINGS_FILENAME, STDOUT_FILENAME, SCFRES_SUMMARY_FILENAME]
            .map(str::to_string),
    );
    list
}

pub fn cmdline_params(config: &PluginConfig) -> Vec<String> {
    let mut params = Vec::new();
    if let Some(project) = &config.julia_project {
        params.push(format!("--project={}", project.display()));
    }
    params.push("-e".to_string());
    params.push(config.interface.run_script());
    params.push(INPUT_FILENAME.to_string());
    params
}

pub fn checkpoint_filename(parameters: &Value) -> String {
    parameters
        .pointer("/scf/checkpointfile")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_CHECKPOINT_FILENAME)
        .to_string()
}
