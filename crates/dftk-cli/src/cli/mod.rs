mod commands;

use clap::Parser;
use dftk_core::domain::DftkError;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Exit code of a workflow that ran but did not succeed.
pub const WORKFLOW_FAILED_EXIT_CODE: i32 = 1;

pub fn run_from_env() -> i32 {
    init_tracing();
    match run(std::env::args().skip(1)) {
        Ok(code) => code,
        Err(error) => {
            let diagnostic = error.as_dftk_error();
            eprintln!("{}", diagnostic.diagnostic_line());
            diagnostic.exit_code()
        }
    }
}

pub fn run<I, S>(args: I) -> Result<i32, CliError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let full_args = std::iter::once("dftk-workflow".to_string())
        .chain(args.into_iter().map(Into::into))
        .collect::<Vec<_>>();
    match Cli::try_parse_from(&full_args) {
        Ok(cli) => dispatch_parsed(cli),
        Err(err) => match err.kind() {
            clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                print!("{}", err);
                Ok(0)
            }
            _ => Err(CliError::Usage(err.to_string())),
        },
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // A subscriber may already be installed when embedded.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Parser)]
#[command(name = "dftk-workflow", about = "Restartable DFTK calculations driven through AiidaDFTK")]
struct Cli {
    /// Plugin configuration (JSON); defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(clap::Subcommand)]
enum CliCommand {
    /// Run the base workflow with automatic restarts
    Run(commands::RunArgs),
    /// Run the band-structure workflow
    Bands(commands::BandsArgs),
    /// Validate inputs and stage the first attempt without running it
    Prepare(commands::PrepareArgs),
    /// Classify the artifacts of a finished attempt
    Parse(commands::ParseArgs),
    /// Print the Julia Project.toml pinning the interface package
    Env(commands::EnvArgs),
}

fn dispatch_parsed(cli: Cli) -> Result<i32, CliError> {
    let config = commands::load_config(cli.config.as_deref())?;
    match cli.command {
        CliCommand::Run(args) => commands::run_base_command(args, &config),
        CliCommand::Bands(args) => commands::run_bands_command(args, &config),
        CliCommand::Prepare(args) => commands::run_prepare_command(args, &config),
        CliCommand::Parse(args) => commands::run_parse_command(args, &config),
        CliCommand::Env(args) => commands::run_env_command(args, &config),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error("{0}")]
    Compute(#[from] DftkError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CliError {
    fn as_dftk_error(&self) -> DftkError {
        match self {
            Self::Usage(message) => DftkError::input_validation("INPUT.CLI_USAGE", message.clone()),
            Self::Compute(error) => error.clone(),
            Self::Internal(error) => DftkError::io_system("IO.CLI", format!("{error:#}")),
        }
    }
}
