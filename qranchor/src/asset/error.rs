//! Error types for the asset cache.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result type for asset operations.
pub type AssetResult<T> = Result<T, AssetError>;

/// Errors produced while resolving, fetching or storing assets.
///
/// Cloneable so one failed load can be delivered to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssetError {
    /// Another resolve for the same key is in flight.
    #[error("Asset '{key}' is already loading")]
    AlreadyLoading { key: String },

    /// The key is negative-cached.
    #[error("Asset '{key}' is invalid after {attempts} failed attempt(s)")]
    InvalidAsset { key: String, attempts: u32 },

    #[error("Network error fetching {url}: {reason}")]
    Network { url: String, reason: String },

    #[error("I/O error at {path}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("Failed to parse {what}: {reason}")]
    Parse { what: String, reason: String },

    #[error("Checksum mismatch for {file}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    /// A plain model name was given but no base URL is configured.
    #[error("No base URL configured to fetch model '{key}'")]
    NoBaseUrl { key: String },

    /// Keys become directory names and URL segments.
    #[error("Invalid model key '{0}'")]
    InvalidKey(String),

    /// The task doing the work went away without reporting a result.
    #[error("Task for '{key}' was abandoned")]
    Cancelled { key: String },
}

impl AssetError {
    pub(crate) fn io(path: &Path, err: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            reason: err.to_string(),
        }
    }

    pub(crate) fn parse(what: impl Into<String>, reason: impl ToString) -> Self {
        Self::Parse {
            what: what.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the error came from fetching or storing the asset, as opposed
    /// to the cache refusing the request.
    pub fn is_load_failure(&self) -> bool {
        !matches!(
            self,
            Self::AlreadyLoading { .. }
                | Self::InvalidAsset { .. }
                | Self::InvalidKey(_)
                | Self::NoBaseUrl { .. }
        )
    }
}
