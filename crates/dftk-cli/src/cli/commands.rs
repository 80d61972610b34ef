use super::{CliError, WORKFLOW_FAILED_EXIT_CODE};
use anyhow::Context;
use dftk_core::calculation::retrieve_list;
use dftk_core::common::PluginConfig;
use dftk_core::domain::{ExitStatus, SUPPORTED_POSTSCF};
use dftk_core::parsers::{JsonRecordDecoder, RetrievedArtifacts, interpret};
use dftk_core::runner::{LocalRunner, Termination, stage_inputs};
use dftk_core::workflows::{
    BandsWorkflowInputs, BaseWorkflowInputs, DftkBandsWorkflow, DftkBaseWorkflow, SegmentKpath,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(clap::Args)]
pub(super) struct RunArgs {
    /// Workflow inputs (JSON)
    #[arg(long)]
    inputs: PathBuf,

    /// Root directory for per-attempt working directories
    #[arg(long, default_value = "dftk-work")]
    work_dir: PathBuf,

    /// Write the workflow result (JSON) here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(clap::Args)]
pub(super) struct BandsArgs {
    /// Bands workflow inputs (JSON)
    #[arg(long)]
    inputs: PathBuf,

    /// Path vertices (JSON); required when the inputs give `bands_kpoints_distance`
    #[arg(long)]
    kpath: Option<PathBuf>,

    /// Root directory for per-attempt working directories
    #[arg(long, default_value = "dftk-work")]
    work_dir: PathBuf,

    /// Write the workflow result (JSON) here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(clap::Args)]
pub(super) struct PrepareArgs {
    /// Workflow inputs (JSON)
    #[arg(long)]
    inputs: PathBuf,

    /// Directory receiving the input document and staged files
    #[arg(long)]
    output_dir: PathBuf,
}

#[derive(clap::Args)]
pub(super) struct ParseArgs {
    /// Working directory of the finished attempt
    #[arg(long)]
    dir: PathBuf,

    /// Post-SCF functions that were requested
    #[arg(long = "postscf", value_parser = clap::builder::PossibleValuesParser::new(SUPPORTED_POSTSCF))]
    postscf: Vec<String>,

    /// Number of atoms in the structure
    #[arg(long, default_value_t = 1)]
    atoms: usize,

    /// The attempt was killed at its wall-time limit
    #[arg(long)]
    walltime_exceeded: bool,
}

#[derive(clap::Args)]
pub(super) struct EnvArgs {
    /// Write Project.toml here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,
}

pub(super) fn load_config(path: Option<&Path>) -> Result<PluginConfig, CliError> {
    Ok(PluginConfig::load_or_default(path)?)
}

pub(super) fn run_base_command(args: RunArgs, config: &PluginConfig) -> Result<i32, CliError> {
    let inputs: BaseWorkflowInputs = read_json(&args.inputs)?;
    tracing::info!(work_dir = %args.work_dir.display(), "starting base workflow");
    let mut runner = LocalRunner::new(&args.work_dir, config);
    let result = DftkBaseWorkflow::new(inputs, config).run(&mut runner)?;

    print_report(&result.report);
    write_result(&result, args.output.as_deref())?;
    Ok(exit_code(result.exit_status))
}

pub(super) fn run_bands_command(args: BandsArgs, config: &PluginConfig) -> Result<i32, CliError> {
    let inputs: BandsWorkflowInputs = read_json(&args.inputs)?;
    let provider = match &args.kpath {
        Some(path) => read_json(path)?,
        None if inputs.bands_kpoints.is_none() && inputs.bands_kpoints_distance.is_some() => {
            return Err(CliError::Usage(
                "`--kpath` is required to densify a path to `bands_kpoints_distance`".to_string(),
            ));
        }
        None => SegmentKpath {
            vertices: Vec::new(),
        },
    };
    tracing::info!(work_dir = %args.work_dir.display(), "starting bands workflow");
    let mut runner = LocalRunner::new(&args.work_dir, config);
    let result = DftkBandsWorkflow::new(inputs, config).run(&mut runner, &provider)?;

    print_report(&result.report);
    write_result(&result, args.output.as_deref())?;
    Ok(exit_code(result.exit_status))
}

pub(super) fn run_prepare_command(
    args: PrepareArgs,
    config: &PluginConfig,
) -> Result<i32, CliError> {
    let inputs: BaseWorkflowInputs = read_json(&args.inputs)?;
    let mut workflow = DftkBaseWorkflow::new(inputs, config);
    workflow.setup();
    let validation = workflow
        .validate_parameters()
        .and_then(|()| workflow.validate_kpoints())
        .and_then(|()| workflow.validate_pseudos())
        .and_then(|()| workflow.validate_resources());
    if let Err(status) = validation {
        let result = workflow.results();
        print_report(&result.report);
        return Ok(exit_code(status));
    }

    let calc = workflow.prepare_process()?;
    stage_inputs(calc, &args.output_dir)?;
    println!(
        "{} {}",
        calc.code.program.display(),
        calc.code.cmdline_params.join(" ")
    );
    println!("retrieve: {}", calc.retrieve_list.join(", "));
    Ok(0)
}

pub(super) fn run_parse_command(args: ParseArgs, config: &PluginConfig) -> Result<i32, CliError> {
    let manifest = retrieve_list(&args.postscf);
    let retrieved = RetrievedArtifacts::from_dir(&args.dir, &manifest)?;
    let termination = Termination {
        exit_code: None,
        walltime_exceeded: args.walltime_exceeded,
    };
    let result = interpret(
        &termination,
        &retrieved,
        &manifest,
        args.atoms,
        &JsonRecordDecoder,
        &config.log_markers,
    );
    let exit_status = result.status.exit_status();

    write_result(
        &json!({ "exit_status": exit_status, "outputs": result.outputs }),
        None,
    )?;
    Ok(exit_code(exit_status))
}

pub(super) fn run_env_command(args: EnvArgs, config: &PluginConfig) -> Result<i32, CliError> {
    let project = config.interface.render_project_toml();
    match args.output {
        Some(path) => write_text(&path, &project)?,
        None => print!("{project}"),
    }
    Ok(0)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, CliError> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read '{}'", path.display()))?;
    serde_json::from_str(&content)
        .map_err(|error| CliError::Usage(format!("invalid JSON in '{}': {}", path.display(), error)))
}

fn write_result<T: Serialize>(value: &T, output: Option<&Path>) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value).context("failed to serialize result")?;
    match output {
        Some(path) => write_text(path, &format!("{rendered}\n")),
        None => {
            println!("{rendered}");
            Ok(())
        }
    }
}

fn write_text(path: &Path, content: &str) -> Result<(), CliError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create '{}'", parent.display()))?;
    }
    fs::write(path, content).with_context(|| format!("failed to write '{}'", path.display()))?;
    Ok(())
}

fn print_report(report: &[String]) {
    for line in report {
        eprintln!("{line}");
    }
}

fn status_line(status: ExitStatus) -> String {
    format!("exit status {} {}: {}", status.code(), status.label(), status.message())
}

fn exit_code(status: ExitStatus) -> i32 {
    if status.is_success() {
        0
    } else {
        eprintln!("{}", status_line(status));
        WORKFLOW_FAILED_EXIT_CODE
    }
}
