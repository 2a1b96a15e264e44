use clap::{ArgGroup, Args, Parser, Subcommand};
use pila::commands::multi_merge::{
    abort_command, continue_command, extend_command, redo_command, remove_command, run_command,
    show_command, test_command, Placement,
};
use pila::commands::version::version_command;
use pila::commands::Session;
use pila::config::Config;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pila")]
#[command(about = "Merge stacks of branches into a disposable integration branch", long_about = None)]
#[command(version)]
struct Cli {
    /// Directory holding config.toml (defaults to ~/.config/pila)
    #[arg(long, global = true)]
    config_path: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge multiple branches into a single target branch
    #[command(alias = "mm")]
    MultiMerge(MultiMergeArgs),

    /// Print the pila version
    Version,
}

#[derive(Args)]
#[command(args_conflicts_with_subcommands = true)]
#[command(group(ArgGroup::new("selection").args(["branch", "label"]).multiple(false)))]
struct MultiMergeArgs {
    #[command(subcommand)]
    command: Option<MultiMergeCommand>,

    /// Target branch, reset to the main branch before merging
    /// (inherits from the current manifest when omitted)
    #[arg(short = 'T', long)]
    target: Option<String>,

    /// Branches to merge into the target; order matters
    #[arg(short = 'B', long, value_delimiter = ',')]
    branch: Vec<String>,

    /// Merge request labels to select branches by
    #[arg(short = 'L', long, value_delimiter = ',')]
    label: Vec<String>,
}

#[derive(Subcommand)]
enum MultiMergeCommand {
    /// Continue an interrupted multi-merge
    #[command(alias = "cont")]
    Continue,

    /// Reset the target branch to main and mark every branch unmerged
    Abort,

    /// Show the merge status of every branch in the manifest
    Show,

    /// Reset the target branch and merge all branches again
    Redo,

    /// Add branches to the end of the manifest and merge them
    Append(ExtendArgs),

    /// Add branches to the start of the manifest and merge them
    Prepend(ExtendArgs),

    /// Remove a branch from the manifest (the manifest is not committed)
    Remove {
        branch: String,
    },

    /// Check whether all branches in the manifest merge cleanly, without changing any branch
    Test {
        /// Output results as JSON
        #[arg(short = 'J', long)]
        json: bool,
    },
}

#[derive(Args)]
struct ExtendArgs {
    /// Branches to add
    #[arg(short = 'B', long, value_delimiter = ',', required = true)]
    branch: Vec<String>,

    /// Target branch (inherits from the manifest when omitted)
    #[arg(short = 'T', long)]
    target: Option<String>,
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let config_dir = cli.config_path.clone().or_else(Config::default_dir);
    let config = Config::load(config_dir.as_deref())?;
    init_logging(cli.verbose, &config.log_level);

    match cli.command {
        Commands::Version => {
            version_command();
            Ok(ExitCode::SUCCESS)
        }
        Commands::MultiMerge(args) => multi_merge(args, &config),
    }
}

fn multi_merge(args: MultiMergeArgs, config: &Config) -> anyhow::Result<ExitCode> {
    let session = Session::open(config)?;

    match args.command {
        None => {
            if args.branch.is_empty() && args.label.is_empty() {
                anyhow::bail!("one of --branch or --label is required");
            }
            run_command(&session, args.target, args.branch, args.label)?
        }
        Some(MultiMergeCommand::Continue) => continue_command(&session)?,
        Some(MultiMergeCommand::Abort) => abort_command(&session)?,
        Some(MultiMergeCommand::Show) => show_command(&session)?,
        Some(MultiMergeCommand::Redo) => redo_command(&session)?,
        Some(MultiMergeCommand::Append(extend)) => {
            extend_command(&session, extend.target, extend.branch, Placement::Append)?
        }
        Some(MultiMergeCommand::Prepend(extend)) => {
            extend_command(&session, extend.target, extend.branch, Placement::Prepend)?
        }
        Some(MultiMergeCommand::Remove { branch }) => remove_command(&session, &branch)?,
        Some(MultiMergeCommand::Test { json }) => {
            if !test_command(&session, json)? {
                return Ok(ExitCode::FAILURE);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// RUST_LOG wins, then -v, then the configured level
fn init_logging(verbose: u8, configured: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match verbose {
            0 => configured,
            1 => "debug",
            _ => "trace",
        };
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}
