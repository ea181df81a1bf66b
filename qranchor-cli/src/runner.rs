//! Shared setup for CLI commands: configuration, logging and the runtime.

use std::future::Future;
use std::path::Path;

use qranchor::config::{config_file_path, ConfigFile};
use qranchor::logging::{init_logging, LoggingOptions};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;

use crate::error::CliError;

pub struct CliRunner {
    config: ConfigFile,
    _log_guard: Option<WorkerGuard>,
}

impl CliRunner {
    /// Load configuration and initialize logging.
    ///
    /// A missing configuration file yields defaults; a malformed one is an error.
    pub fn new(config_path: Option<&Path>, verbose: bool) -> Result<Self, CliError> {
        let path = config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(config_file_path);
        let config = ConfigFile::load_from(&path)?;

        let level = if verbose {
            "debug".to_string()
        } else {
            config.logging.level.clone()
        };
        let options = LoggingOptions::default()
            .with_level(level)
            .with_directory(config.logging.directory.clone());
        let log_guard = init_logging(&options)?;

        info!(config = %path.display(), version = qranchor::VERSION, "QrAnchor CLI");

        Ok(Self {
            config,
            _log_guard: log_guard,
        })
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    /// Run a future to completion on a fresh multi-threaded runtime.
    pub fn block_on<F: Future>(&self, future: F) -> Result<F::Output, CliError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(CliError::Runtime)?;
        Ok(runtime.block_on(future))
    }
}
