//! CLI error type.

use qranchor::app::AppError;
use qranchor::asset::AssetError;
use qranchor::config::ConfigError;
use qranchor::logging::LoggingError;
use qranchor::tracker::TrackerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Logging setup failed: {0}")]
    Logging(#[from] LoggingError),

    #[error("Failed to start async runtime: {0}")]
    Runtime(std::io::Error),

    #[error("{0}")]
    Asset(#[from] AssetError),

    #[error("{0}")]
    App(#[from] AppError),

    #[error("{0}")]
    Tracker(#[from] TrackerError),

    #[error("Failed to clear cache: {0}")]
    CacheClear(String),

    #[error("Failed to read cache statistics: {0}")]
    CacheStats(String),

    #[error("Replay failed: {0}")]
    Replay(String),
}
