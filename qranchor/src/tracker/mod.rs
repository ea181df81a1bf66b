//! Marker Tracker
//!
//! Turns noisy per-frame QR detections into a stable set of tracked markers
//! and notifies consumers when that set changes.
//!
//! # Cycle
//!
//! ```text
//! submit_frame ──► in flight? ──yes──► dropped
//!                      │ no
//!                      ▼
//!            DetectionAdapter::detect   (blocking pool)
//!                      │
//!                      ▼
//!   MarkerIdentityResolver ──► TrackedSet ──► diff against previous set
//!                                                  │ changed
//!                                                  ▼
//!                                       ReconciliationEvent (channel)
//! ```
//!
//! At most one detection runs at a time. Frames arriving while a detection is
//! in flight are dropped, not queued, so consumers must not expect one event
//! per frame. Events are emitted in submission order.
//!
//! # Example
//!
//! ```ignore
//! use qranchor::tracker::{MarkerTracker, TrackerConfig};
//!
//! let (tracker, mut events) = MarkerTracker::new(detector, TrackerConfig::default())?;
//! tracker.submit_frame(frame);
//!
//! while let Some(event) = events.recv().await {
//!     println!("added {} removed {}", event.added.len(), event.removed.len());
//! }
//! ```

mod detector;
mod event;
mod marker_tracker;

pub use detector::{DetectionAdapter, DetectionError};
pub use event::{EventReceiver, ReconciliationEvent};
pub use marker_tracker::{
    CycleOutcome, FrameSubmission, MarkerTracker, TrackerConfig, TrackerError, TrackerStats,
};
