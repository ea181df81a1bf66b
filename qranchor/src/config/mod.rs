//! Configuration file handling.

mod file;
mod size;

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub use file::{
    config_directory, config_file_path, expand_tilde, AssetSettings, BindingSettings, ConfigFile,
    LoggingSettings, TrackerSettings, CONFIG_DIR_NAME, CONFIG_FILE_NAME,
};
pub use size::{format_size, parse_size};

/// Errors reading or writing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("Invalid value '{value}' for [{section}] {key}: {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    #[error("Invalid size '{value}': {reason}")]
    InvalidSize { value: String, reason: String },
}
