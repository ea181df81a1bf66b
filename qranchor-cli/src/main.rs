//! QrAnchor CLI - Command-line interface
//!
//! Inspects and maintains the model cache and replays recorded detections
//! through the tracker and scene reconciler.

mod commands;
mod error;
mod runner;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use commands::cache::CacheAction;
use commands::config::ConfigCommands;
use commands::replay::ReplayArgs;
use runner::CliRunner;

#[derive(Debug, Parser)]
#[command(name = "qranchor", version, about = "QR marker anchoring and model cache tools")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use this configuration file instead of ~/.qranchor/config.ini
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Manage the model cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Resolve a model into the cache, downloading it if needed
    Fetch {
        /// Model name or URL, as encoded in a marker
        payload: String,
    },

    /// Replay recorded detections through the tracker and reconciler
    Replay(ReplayArgs),

    /// View configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), error::CliError> {
    let runner = CliRunner::new(cli.config.as_deref(), cli.verbose)?;

    match cli.command {
        Commands::Cache { action } => commands::cache::run(&runner, action),
        Commands::Fetch { payload } => commands::fetch::run(&runner, &payload),
        Commands::Replay(args) => commands::replay::run(&runner, args),
        Commands::Config { command } => commands::config::run(&runner, command),
    }
}
