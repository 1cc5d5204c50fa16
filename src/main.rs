use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use quorum::config::QUORUM_DIR;
use quorum::errors::OrchestratorError;
use quorum::tools::ToolId;

mod cmd;

#[derive(Parser)]
#[command(name = "quorum")]
#[command(version, about = "Implement specs with a lead agent and a panel of validators")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run every spec through lead/validate cycles, resuming a linked session if one exists
    Run(RunArgs),
    /// Continue the linked session
    Resume,
    /// Show the linked session
    Status,
    /// List detected agent tools
    Tools,
}

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Spec directory, relative to the project (overrides quorum.toml)
    #[arg(long)]
    pub specs: Option<PathBuf>,

    /// Lead tool: claude, codex or gemini
    #[arg(long)]
    pub lead: Option<ToolId>,

    /// Validator tools (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub validators: Vec<ToolId>,

    /// Lifetime cycle budget per spec
    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Cycle budget per spec for this invocation
    #[arg(long)]
    pub max_per_run: Option<u32>,

    /// Timeout for one agent invocation, in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Run agents inside the configured container image
    #[arg(long)]
    pub sandbox: bool,

    /// Abort the session when a spec fails
    #[arg(long)]
    pub stop_on_failure: bool,

    /// Skip the validation-only pass before a spec's first cycle
    #[arg(long)]
    pub no_preflight: bool,

    /// Abandon any linked session and start over
    #[arg(long)]
    pub fresh: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => match std::env::current_dir().context("Failed to get current directory") {
            Ok(dir) => dir,
            Err(e) => {
                eprintln!("{} {:#}", console::style("error:").red().bold(), e);
                return ExitCode::FAILURE;
            }
        },
    };

    let writes_log = matches!(cli.command, Commands::Run(_) | Commands::Resume);
    let _guard = init_logging(cli.verbose, writes_log.then_some(project_dir.as_path()));

    match run(&cli, &project_dir).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", console::style("error:").red().bold(), e);
            match e.downcast_ref::<OrchestratorError>() {
                Some(OrchestratorError::Interrupted) => ExitCode::from(130),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

async fn run(cli: &Cli, project_dir: &Path) -> Result<ExitCode> {
    match &cli.command {
        Commands::Run(args) => cmd::cmd_run(project_dir, args).await,
        Commands::Resume => cmd::cmd_resume(project_dir).await,
        Commands::Status => {
            cmd::cmd_status(project_dir)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Tools => {
            cmd::cmd_tools(project_dir).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Stderr logging, plus a daily file under `.quorum/logs` for runs.
///
/// `RUST_LOG` wins over the default filter. The returned guard flushes the
/// file writer on drop.
fn init_logging(verbose: bool, log_dir_root: Option<&Path>) -> Option<WorkerGuard> {
    let default = if verbose { "quorum=debug" } else { "quorum=info" };
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let stderr = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .with_filter(filter());

    let log_dir = log_dir_root.map(|root| root.join(QUORUM_DIR).join("logs"));
    let file = log_dir
        .filter(|dir| std::fs::create_dir_all(dir).is_ok())
        .map(|dir| tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "quorum.log")));

    match file {
        Some((writer, guard)) => {
            tracing_subscriber::registry()
                .with(stderr)
                .with(
                    fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false)
                        .with_filter(filter()),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(stderr).init();
            None
        }
    }
}
