//! Boundary to the external QR detector.

use thiserror::Error;

use crate::marker::Observation;

/// Errors a detector may report for a single frame.
///
/// Both are recoverable: the tracker skips the cycle and accepts the next frame.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DetectionError {
    /// The frame could not be analyzed (bad dimensions, unsupported format).
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// The detector backend failed.
    #[error("detector failure: {0}")]
    Backend(String),
}

/// A barcode detector that yields observations for a frame.
///
/// Implementations may block; the tracker runs them on the blocking pool.
pub trait DetectionAdapter: Send + Sync + 'static {
    /// The frame type accepted by this detector.
    type Frame: Send + Sync + 'static;

    /// Detect QR codes in a frame.
    fn detect(&self, frame: &Self::Frame) -> Result<Vec<Observation>, DetectionError>;
}
