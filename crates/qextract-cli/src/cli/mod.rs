mod commands;
mod helpers;

use clap::Parser;
use qextract_core::domain::QextractError;

const PROGRAM_NAME: &str = "qextract";

pub fn run_from_env() -> i32 {
    let args: Vec<String> = std::env::args().skip(1).collect();

    match run(args) {
        Ok(code) => code,
        Err(error) => {
            let diagnostic = error.as_qextract_error();
            eprintln!("{}", diagnostic.diagnostic_line());
            if let Some(summary_line) = diagnostic.fatal_exit_line() {
                eprintln!("{}", summary_line);
            }
            diagnostic.exit_code()
        }
    }
}

pub fn run<I, S>(args: I) -> Result<i32, CliError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let full_args = std::iter::once(PROGRAM_NAME.to_string())
        .chain(args.into_iter().map(Into::into))
        .collect::<Vec<_>>();
    parse_and_dispatch(full_args)
}

fn parse_and_dispatch(args: Vec<String>) -> Result<i32, CliError> {
    match Cli::try_parse_from(&args) {
        Ok(cli) => {
            // Corpus runs report every attempted file at info level.
            let verbosity = match cli.command {
                CliCommand::Convert(_) => cli.verbose.saturating_add(1),
                _ => cli.verbose,
            };
            helpers::setup_logging(verbosity, cli.quiet);
            dispatch_parsed(cli.command)
        }
        Err(err) => match err.kind() {
            clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                print!("{}", err);
                Ok(0)
            }
            _ => Err(CliError::Usage(err.to_string())),
        },
    }
}

#[derive(Parser)]
#[command(
    name = "qextract",
    version,
    about = "Quantum-chemistry output extraction and transient-absorption reconstruction"
)]
struct Cli {
    /// Increase log detail (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(clap::Subcommand)]
enum CliCommand {
    /// Extract one output file and print the result as JSON
    Extract(commands::ExtractArgs),
    /// Convert a directory tree of outputs into a hierarchical store
    Convert(commands::ConvertArgs),
    /// Reconstruct the transient-absorption map from a store
    Reconstruct(commands::ReconstructArgs),
    /// Write the per-time state summary of one trajectory
    Summary(commands::SummaryArgs),
}

fn dispatch_parsed(command: CliCommand) -> Result<i32, CliError> {
    match command {
        CliCommand::Extract(args) => commands::run_extract_command(args),
        CliCommand::Convert(args) => commands::run_convert_command(args),
        CliCommand::Reconstruct(args) => commands::run_reconstruct_command(args),
        CliCommand::Summary(args) => commands::run_summary_command(args),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error("{0}")]
    Compute(QextractError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CliError {
    fn compute(error: impl Into<QextractError>) -> Self {
        Self::Compute(error.into())
    }

    fn as_qextract_error(&self) -> QextractError {
        match self {
            Self::Usage(message) => {
                QextractError::input_validation("INPUT.CLI_USAGE", message.clone())
            }
            Self::Compute(error) => error.clone(),
            Self::Internal(error) => QextractError::io_system("IO.CLI", format!("{error:#}")),
        }
    }
}
