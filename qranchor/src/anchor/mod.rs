//! World anchoring of detected markers.
//!
//! Turns a normalized image point into a 3D world position. The
//! [`WorldAnchorResolver`] trait is the seam to the platform's hit-testing;
//! [`FallbackHitTester`] is a self-contained implementation over a
//! [`SceneSnapshot`] of planes and feature points.
//!
//! # Example
//!
//! ```
//! use qranchor::anchor::{
//!     AnchorQuery, FallbackHitTester, HitKind, PinholeCamera, SceneSnapshot, Vec3,
//!     WorldAnchorResolver,
//! };
//! use qranchor::marker::Point2;
//!
//! let tester = FallbackHitTester::default();
//! tester.update(SceneSnapshot::new(PinholeCamera::looking(
//!     Vec3::new(0.0, 1.5, 0.0),
//!     Vec3::new(0.0, -1.0, -1.0),
//! )));
//!
//! let hit = tester.resolve(&AnchorQuery::at(Point2::new(0.5, 0.5))).unwrap();
//! assert_eq!(hit.kind, HitKind::InfinitePlane);
//! ```

mod geometry;
mod smoothing;

pub use geometry::{Ray, Vec3};
pub use hit_test::{
    hit_existing_plane, hit_features_in_cone, hit_infinite_plane, hit_nearest_feature,
    DetectedPlane, FallbackHitTester, FeatureHit, HitTestConfig, PinholeCamera, SceneSnapshot,
};
pub use smoothing::{DistanceSmoother, DEFAULT_SMOOTHING_WINDOW};

use thiserror::Error;

use crate::marker::Point2;

/// A request to anchor a normalized image point in the world.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnchorQuery {
    /// Top-left origin, normalized.
    pub point: Point2,
    /// Current world position of the bound object, if it has one. Its height
    /// defines the infinite plane.
    pub reference_position: Option<Vec3>,
    /// Prefer the infinite plane over feature points.
    pub infinite_plane: bool,
}

impl AnchorQuery {
    pub fn at(point: Point2) -> Self {
        Self {
            point,
            reference_position: None,
            infinite_plane: false,
        }
    }

    pub fn with_reference(mut self, position: Vec3) -> Self {
        self.reference_position = Some(position);
        self
    }

    pub fn with_infinite_plane(mut self, enabled: bool) -> Self {
        self.infinite_plane = enabled;
        self
    }
}

/// Which stage of the fallback chain produced a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HitKind {
    ExistingPlane,
    FeaturePoint,
    InfinitePlane,
    UnfilteredFeaturePoint,
}

impl HitKind {
    /// Hits on a real or infinite plane are stable enough to place without
    /// smoothing.
    pub fn hit_a_plane(&self) -> bool {
        matches!(self, HitKind::ExistingPlane | HitKind::InfinitePlane)
    }
}

/// A resolved world position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnchorHit {
    pub position: Vec3,
    pub kind: HitKind,
    /// Set for [`HitKind::ExistingPlane`].
    pub plane_id: Option<u64>,
    /// Origin of the hit-test ray (camera position).
    pub origin: Vec3,
}

/// No world position could be resolved for a point.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[error("no world anchor for point {point}")]
pub struct AnchorMiss {
    pub point: Point2,
}

/// Resolves normalized image points to world positions.
pub trait WorldAnchorResolver: Send + Sync {
    fn resolve(&self, query: &AnchorQuery) -> Result<AnchorHit, AnchorMiss>;
}

impl<T: WorldAnchorResolver + ?Sized> WorldAnchorResolver for std::sync::Arc<T> {
    fn resolve(&self, query: &AnchorQuery) -> Result<AnchorHit, AnchorMiss> {
        (**self).resolve(query)
    }
}
