//! nidam - run, serve and deploy open models on the right hardware.
//!
//! This binary is a thin command layer over `nidam-core`: it parses
//! arguments, sets up logging and prints results. Every decision is made by
//! the core library.

mod display;
mod handlers;

use clap::{Args, Parser, Subcommand, ValueEnum};
use nidam_core::{AppConfig, NidamError, ServeConfig};
use std::io::Write;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "nidam", version)]
#[command(about = "Run, serve and deploy open models on the right hardware")]
struct Cli {
    /// Show debug logs and the output of external tools
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the detected hardware and which models can run on it
    Hello,
    /// Start an OpenAI API compatible chat server
    Serve(ServeArgs),
    /// Run the model and chat in the terminal
    Run(RunArgs),
    /// Deploy the model to the cloud
    Deploy(DeployArgs),
    /// Inspect available models
    Model {
        #[command(subcommand)]
        command: ModelCommand,
    },
    /// Manage model repos
    Repo {
        #[command(subcommand)]
        command: RepoCommand,
    },
    /// Release disk space used by nidam
    Clean(CleanArgs),
}

/// Hardware selection shared by `serve` and `run`.
#[derive(Args, Debug, Clone)]
struct HardwareArgs {
    /// Treat a GPU whose name contains this text as sufficient
    #[arg(long)]
    gpu: Option<String>,

    /// Run on the CPU (requires AVX2)
    #[arg(long)]
    force_cpu: bool,
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Model tag, e.g. `llama3:8b` or `myrepo/llama3`
    model: String,

    #[arg(long)]
    repo: Option<String>,

    #[arg(long, default_value_t = ServeConfig::DEFAULT_PORT)]
    port: u16,

    #[command(flatten)]
    hardware: HardwareArgs,
}

#[derive(Args, Debug)]
struct RunArgs {
    model: String,

    #[arg(long)]
    repo: Option<String>,

    /// Port for the model server (random when omitted)
    #[arg(long)]
    port: Option<u16>,

    /// Seconds to wait for the model server to become ready
    #[arg(long, default_value_t = ServeConfig::DEFAULT_READY_ATTEMPTS)]
    timeout: u32,

    #[command(flatten)]
    hardware: HardwareArgs,
}

#[derive(Args, Debug)]
struct DeployArgs {
    model: String,

    /// Cloud instance type (the best fitting one when omitted)
    #[arg(long)]
    instance_type: Option<String>,

    #[arg(long)]
    repo: Option<String>,
}

#[derive(Subcommand, Debug)]
enum ModelCommand {
    /// List models, optionally filtered by tag
    List {
        tag: Option<String>,
        #[arg(long)]
        repo: Option<String>,
    },
    /// Show the details of one model
    Get {
        tag: String,
        #[arg(long)]
        repo: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum RepoCommand {
    /// List configured repos
    List,
    /// Clone or refresh every configured repo
    Update,
    /// Add a repo, e.g. `https://github.com/owner/repo@main`
    Add { name: String, url: String },
    /// Remove a repo
    Remove { name: String },
}

#[derive(Args, Debug)]
struct CleanArgs {
    kind: CleanKind,

    /// Only report what would be removed
    #[arg(long)]
    dry_run: bool,

    /// Remove without asking; without it nothing is deleted
    #[arg(short, long)]
    yes: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum CleanKind {
    ModelCache,
    Venvs,
    Repos,
    Configs,
    All,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env(AppConfig::LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let code = match handlers::dispatch(cli).await {
        Ok(()) => 0,
        Err(e) => {
            error!("{:#}", e);
            e.downcast_ref::<NidamError>()
                .map_or(1, NidamError::exit_code)
        }
    };

    // The chat loop may leave a blocking stdin read behind; exit without
    // waiting for it.
    if let Err(e) = std::io::stdout().flush() {
        debug!("Failed to flush stdout: {}", e);
    }
    std::process::exit(code);
}
