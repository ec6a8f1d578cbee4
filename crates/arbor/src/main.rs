//! Arbor launcher
//!
//! Populates synthetic folder trees to a target shape: the scheduler claims
//! under-filled nodes from a shared ledger and an in-process worker fills
//! them through a content service.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use arbor_logging::{init_logging, LogConfig};
use clap::{Parser, Subcommand};

mod cli;
mod config;

use cli::error::HelpfulError;
use cli::locks::LocksAction;
use config::ArborConfig;

#[derive(Parser, Debug)]
#[command(name = "arbor", about = "Tree-population scheduler", version)]
struct Cli {
    /// Enable verbose logging (info/debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Config file (defaults to ./arbor.toml when present)
    #[arg(short = 'c', long, global = true, env = "ARBOR_CONFIG")]
    config: Option<PathBuf>,

    /// Ledger URL, overriding [ledger] url (sqlite:<path> or memory:)
    #[arg(long, global = true, env = "ARBOR_LEDGER")]
    ledger: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the scheduler and an in-process worker until the trees are complete
    Run {
        /// Upper bound on open work sessions
        #[arg(long)]
        max_active_loaders: Option<u32>,

        /// Seed these roots before the first tick (repeatable)
        #[arg(long = "seed", value_name = "PATH")]
        seed: Vec<String>,

        /// Print Prometheus metrics on exit
        #[arg(long)]
        metrics: bool,
    },

    /// Create tree roots and record them in the ledger
    Seed {
        /// Root paths, e.g. /Sites/site.1/documentLibrary
        #[arg(required = true)]
        paths: Vec<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show candidate counts, sessions and locks without dispatching
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect and clear claim locks
    Locks {
        #[command(subcommand)]
        action: LocksCommands,
    },
}

#[derive(Subcommand, Debug)]
enum LocksCommands {
    /// List held locks, oldest first
    List {
        /// Only locks at least this many seconds old
        #[arg(long, value_name = "SECS")]
        older_than: Option<u64>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Clear one lock, or every lock with --all
    Clear {
        /// Path of the claimed node
        #[arg(conflicts_with = "all", required_unless_present = "all")]
        path: Option<String>,

        /// Clear every lock in the context
        #[arg(long)]
        all: bool,

        /// With --all, only locks at least this many seconds old
        #[arg(long, value_name = "SECS", requires = "all")]
        older_than: Option<u64>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = init_logging(LogConfig {
        app_name: "arbor",
        verbose: cli.verbose,
    }) {
        eprintln!("Warning: failed to initialize logging: {:#}", err);
    }

    match run_command(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{:?}", err);
            ExitCode::from(1)
        }
    }
}

fn run_command(args: Cli) -> anyhow::Result<()> {
    let mut config = ArborConfig::resolve(args.config.as_deref())?;
    if let Some(url) = args.ledger {
        config.ledger.url = url;
    }
    config.validate().map_err(HelpfulError::invalid_config)?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    rt.block_on(async move {
        match args.command {
            Commands::Run {
                max_active_loaders,
                seed,
                metrics,
            } => {
                cli::run::run(
                    &config,
                    cli::run::RunArgs {
                        max_active_loaders,
                        seed,
                        metrics,
                    },
                )
                .await
            }
            Commands::Seed { paths, json } => {
                cli::seed::run(&config, cli::seed::SeedArgs { paths, json }).await
            }
            Commands::Status { json } => {
                cli::status::run(&config, cli::status::StatusArgs { json }).await
            }
            Commands::Locks { action } => {
                let action = match action {
                    LocksCommands::List { older_than, json } => LocksAction::List {
                        older_than_secs: older_than,
                        json,
                    },
                    LocksCommands::Clear {
                        path,
                        all,
                        older_than,
                    } => LocksAction::Clear {
                        path,
                        all,
                        older_than_secs: older_than,
                    },
                };
                cli::locks::run(&config, action).await
            }
        }
    })
}
