//! Reconciliation events emitted by the tracker.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::marker::{Marker, MarkerDiff};

/// Receiving half of the tracker's event channel.
pub type EventReceiver<F> = mpsc::UnboundedReceiver<ReconciliationEvent<F>>;

/// The change in tracked markers produced by one detection cycle.
///
/// The three lists are disjoint. `persisted` and `added` together form the new
/// tracked set; `persisted` and `removed` together form the previous one.
pub struct ReconciliationEvent<F> {
    /// Sequence number of the frame that produced this event.
    pub frame_id: u64,
    /// The frame that was analyzed.
    pub frame: Arc<F>,
    pub persisted: Vec<Marker>,
    pub added: Vec<Marker>,
    pub removed: Vec<Marker>,
}

impl<F> ReconciliationEvent<F> {
    /// Build an event from a diff.
    pub fn from_diff(frame_id: u64, frame: Arc<F>, diff: MarkerDiff) -> Self {
        Self {
            frame_id,
            frame,
            persisted: diff.persisted,
            added: diff.added,
            removed: diff.removed,
        }
    }

    /// Whether the marker is part of the new tracked set.
    pub fn is_visible(&self, payload: &str) -> bool {
        self.persisted
            .iter()
            .chain(self.added.iter())
            .any(|m| m.payload() == payload)
    }

    /// Total number of markers mentioned by the event.
    pub fn len(&self) -> usize {
        self.persisted.len() + self.added.len() + self.removed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<F> Clone for ReconciliationEvent<F> {
    fn clone(&self) -> Self {
        Self {
            frame_id: self.frame_id,
            frame: Arc::clone(&self.frame),
            persisted: self.persisted.clone(),
            added: self.added.clone(),
            removed: self.removed.clone(),
        }
    }
}

impl<F> fmt::Debug for ReconciliationEvent<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconciliationEvent")
            .field("frame_id", &self.frame_id)
            .field("persisted", &self.persisted)
            .field("added", &self.added)
            .field("removed", &self.removed)
            .finish_non_exhaustive()
    }
}
