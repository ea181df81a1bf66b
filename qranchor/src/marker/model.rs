//! Core data types for marker tracking.
//!
//! Observations are what the detector produced for one frame. Markers are the
//! identities derived from them. Both use normalized image coordinates in
//! `[0, 1]` with the origin at the top-left corner unless stated otherwise.

use std::borrow::Borrow;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// A point in normalized image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    /// Create a new point.
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    pub fn distance(&self, other: &Point2) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

impl fmt::Display for Point2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.3}, {:.3})", self.x, self.y)
    }
}

/// An axis-aligned rectangle in normalized image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NormalizedRect {
    /// Left edge.
    pub x: f64,
    /// Top edge (or bottom edge for bottom-left origin detectors).
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl NormalizedRect {
    /// Create a new rectangle.
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Center of the rectangle.
    pub fn midpoint(&self) -> Point2 {
        Point2::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Mirror the rectangle vertically, converting between bottom-left and
    /// top-left origins.
    pub fn flipped_vertically(&self) -> Self {
        Self {
            x: self.x,
            y: 1.0 - self.y - self.height,
            width: self.width,
            height: self.height,
        }
    }

    /// Whether every edge lies within the unit square.
    pub fn is_normalized(&self) -> bool {
        let in_unit = |v: f64| (0.0..=1.0).contains(&v);
        self.width >= 0.0
            && self.height >= 0.0
            && in_unit(self.x)
            && in_unit(self.y)
            && in_unit(self.x + self.width)
            && in_unit(self.y + self.height)
    }
}

/// A single raw detection produced by the detector for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Decoded QR payload.
    pub payload: String,
    /// Bounding box of the code in normalized image coordinates.
    pub bounding_box: NormalizedRect,
}

impl Observation {
    /// Create a new observation.
    pub fn new(payload: impl Into<String>, bounding_box: NormalizedRect) -> Self {
        Self {
            payload: payload.into(),
            bounding_box,
        }
    }
}

/// A tracked marker: a payload identity plus its most recent midpoint.
///
/// Equality and hashing consider only the payload. The midpoint is carried
/// along so consumers can hit-test at the latest measured position.
#[derive(Debug, Clone, Serialize)]
pub struct Marker {
    payload: String,
    midpoint: Point2,
}

impl Marker {
    /// Create a new marker.
    pub fn new(payload: impl Into<String>, midpoint: Point2) -> Self {
        Self {
            payload: payload.into(),
            midpoint,
        }
    }

    /// The identity key.
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// The midpoint measured in the cycle that produced this marker.
    pub fn midpoint(&self) -> Point2 {
        self.midpoint
    }
}

impl PartialEq for Marker {
    fn eq(&self, other: &Self) -> bool {
        self.payload == other.payload
    }
}

impl Eq for Marker {}

impl Hash for Marker {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.payload.hash(state);
    }
}

// Lets sets of markers be queried by payload. Consistent with Hash/Eq above.
impl Borrow<str> for Marker {
    fn borrow(&self) -> &str {
        &self.payload
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.payload, self.midpoint)
    }
}

/// Center of a quadrilateral given its corners in order
/// (top-left, top-right, bottom-right, bottom-left).
///
/// Computed as the intersection of the two diagonals, which is stable under
/// perspective distortion. Degenerate quads fall back to the corner average.
pub fn centroid_from_corners(corners: [Point2; 4]) -> Point2 {
    let [tl, tr, br, bl] = corners;

    // Diagonal u: tl -> br, diagonal v: tr -> bl.
    let (ux, uy) = (br.x - tl.x, br.y - tl.y);
    let (vx, vy) = (bl.x - tr.x, bl.y - tr.y);
    let denom = ux * vy - uy * vx;

    if denom.abs() < f64::EPSILON {
        return Point2::new(
            (tl.x + tr.x + br.x + bl.x) / 4.0,
            (tl.y + tr.y + br.y + bl.y) / 4.0,
        );
    }

    let t = ((tr.x - tl.x) * vy - (tr.y - tl.y) * vx) / denom;
    Point2::new(tl.x + t * ux, tl.y + t * uy)
}
