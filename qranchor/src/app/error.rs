//! Application error types.

use std::fmt;

use crate::asset::AssetError;
use crate::config::ConfigError;
use crate::tracker::TrackerError;

/// Errors that can occur during application lifecycle.
#[derive(Debug)]
pub enum AppError {
    /// Failed to create the marker tracker.
    Tracker(TrackerError),

    /// Failed to create the asset cache.
    AssetCache(AssetError),

    /// Configuration error.
    Config(ConfigError),

    /// The consumer task ended abnormally.
    Consumer(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Tracker(e) => write!(f, "Failed to start marker tracker: {}", e),
            AppError::AssetCache(e) => write!(f, "Failed to start asset cache: {}", e),
            AppError::Config(e) => write!(f, "Configuration error: {}", e),
            AppError::Consumer(msg) => write!(f, "Scene consumer failed: {}", msg),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Tracker(e) => Some(e),
            AppError::AssetCache(e) => Some(e),
            AppError::Config(e) => Some(e),
            AppError::Consumer(_) => None,
        }
    }
}

impl From<TrackerError> for AppError {
    fn from(e: TrackerError) -> Self {
        AppError::Tracker(e)
    }
}

impl From<AssetError> for AppError {
    fn from(e: AssetError) -> Self {
        AppError::AssetCache(e)
    }
}

impl From<ConfigError> for AppError {
    fn from(e: ConfigError) -> Self {
        AppError::Config(e)
    }
}
