//! Conversion of raw observations into marker identities.

use std::fmt;
use std::str::FromStr;

use tracing::debug;

use super::model::{Marker, Observation};
use super::set::TrackedSet;

/// Origin convention of the detector's bounding boxes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoordinateOrigin {
    /// Boxes are already top-left based, like hit-test input.
    #[default]
    TopLeft,
    /// Boxes are bottom-left based and must be flipped before hit-testing.
    BottomLeft,
}

impl FromStr for CoordinateOrigin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "top_left" | "top-left" => Ok(Self::TopLeft),
            "bottom_left" | "bottom-left" => Ok(Self::BottomLeft),
            other => Err(format!(
                "unknown coordinate origin '{}' (expected top_left or bottom_left)",
                other
            )),
        }
    }
}

impl fmt::Display for CoordinateOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TopLeft => write!(f, "top_left"),
            Self::BottomLeft => write!(f, "bottom_left"),
        }
    }
}

/// Builds a [`TrackedSet`] from one frame's observations.
///
/// Observations without a payload cannot be identified and are skipped.
/// Repeated payloads within one frame collapse to the first occurrence.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkerIdentityResolver {
    origin: CoordinateOrigin,
}

impl MarkerIdentityResolver {
    /// Create a resolver for detectors using the given origin convention.
    pub fn new(origin: CoordinateOrigin) -> Self {
        Self { origin }
    }

    /// The configured origin convention.
    pub fn origin(&self) -> CoordinateOrigin {
        self.origin
    }

    /// Convert a single observation into a marker.
    pub fn marker_for(&self, observation: &Observation) -> Marker {
        let rect = match self.origin {
            CoordinateOrigin::TopLeft => observation.bounding_box,
            CoordinateOrigin::BottomLeft => observation.bounding_box.flipped_vertically(),
        };
        Marker::new(observation.payload.clone(), rect.midpoint())
    }

    /// Convert a frame's observations into a tracked set.
    pub fn resolve(&self, observations: &[Observation]) -> TrackedSet {
        let mut set = TrackedSet::new();
        for observation in observations {
            if observation.payload.is_empty() {
                debug!("Skipping observation without payload");
                continue;
            }
            let marker = self.marker_for(observation);
            if !set.insert(marker) {
                debug!(payload = %observation.payload, "Duplicate payload in frame, keeping first");
            }
        }
        set
    }
}
