//! Configuration CLI commands.

use clap::Subcommand;
use qranchor::config::config_file_path;

use crate::error::CliError;
use crate::runner::CliRunner;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration, defaults included
    Show,

    /// Show the default configuration file path
    Path,
}

/// Run a config subcommand.
pub fn run(runner: &CliRunner, command: ConfigCommands) -> Result<(), CliError> {
    match command {
        ConfigCommands::Show => {
            print!("{}", runner.config().to_ini_string());
            Ok(())
        }
        ConfigCommands::Path => {
            println!("{}", config_file_path().display());
            Ok(())
        }
    }
}
