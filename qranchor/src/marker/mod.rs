//! Marker identities derived from QR detections.
//!
//! A marker is a QR payload treated as a stable real-world identity. The
//! detector reports fresh bounding boxes every cycle; this module turns those
//! observations into [`Marker`] values keyed by payload and computes the
//! difference between two consecutive [`TrackedSet`]s.
//!
//! # Identity
//!
//! Two markers with the same payload are the same marker regardless of where
//! they were seen. The midpoint is a measurement that is replaced every cycle.
//!
//! # Example
//!
//! ```
//! use qranchor::marker::{MarkerIdentityResolver, NormalizedRect, Observation};
//!
//! let resolver = MarkerIdentityResolver::default();
//! let set = resolver.resolve(&[Observation::new(
//!     "cup",
//!     NormalizedRect::new(0.4, 0.4, 0.2, 0.2),
//! )]);
//! assert!(set.contains("cup"));
//! ```

mod model;
mod resolver;
mod set;

pub use model::{centroid_from_corners, Marker, NormalizedRect, Observation, Point2};
pub use resolver::{CoordinateOrigin, MarkerIdentityResolver};
pub use set::{MarkerDiff, TrackedSet};
