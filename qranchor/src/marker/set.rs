//! Tracked marker sets and their frame-to-frame difference.

use std::collections::HashSet;

use super::model::Marker;

/// The set of markers currently believed visible.
///
/// Set semantics over the payload: no two elements share a payload.
#[derive(Debug, Clone, Default)]
pub struct TrackedSet {
    markers: HashSet<Marker>,
}

/// Partition of the union of two tracked sets.
///
/// `persisted`, `added` and `removed` are pairwise disjoint. Persisted markers
/// carry the midpoint from the newer set. Each list is sorted by payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarkerDiff {
    pub persisted: Vec<Marker>,
    pub added: Vec<Marker>,
    pub removed: Vec<Marker>,
}

impl MarkerDiff {
    /// Whether the diff carries no changes at all.
    pub fn is_empty(&self) -> bool {
        self.persisted.is_empty() && self.added.is_empty() && self.removed.is_empty()
    }
}

impl TrackedSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a marker. Returns `false` and keeps the existing entry if the
    /// payload is already tracked.
    pub fn insert(&mut self, marker: Marker) -> bool {
        self.markers.insert(marker)
    }

    /// Look up a marker by payload.
    pub fn get(&self, payload: &str) -> Option<&Marker> {
        self.markers.get(payload)
    }

    /// Whether a payload is tracked.
    pub fn contains(&self, payload: &str) -> bool {
        self.markers.contains(payload)
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Marker> {
        self.markers.iter()
    }

    /// Payloads in sorted order.
    pub fn payloads(&self) -> Vec<&str> {
        let mut payloads: Vec<&str> = self.markers.iter().map(Marker::payload).collect();
        payloads.sort_unstable();
        payloads
    }

    /// Identity-only set equality: midpoints are ignored.
    pub fn same_identities(&self, other: &TrackedSet) -> bool {
        self.markers == other.markers
    }

    /// Compute the difference from `self` (old) to `next` (new).
    ///
    /// Returns `None` when both sets hold the same identities.
    pub fn diff(&self, next: &TrackedSet) -> Option<MarkerDiff> {
        if self.same_identities(next) {
            return None;
        }

        let mut persisted: Vec<Marker> = next
            .markers
            .iter()
            .filter(|m| self.markers.contains(*m))
            .cloned()
            .collect();
        let mut added: Vec<Marker> = next.markers.difference(&self.markers).cloned().collect();
        let mut removed: Vec<Marker> = self.markers.difference(&next.markers).cloned().collect();

        for list in [&mut persisted, &mut added, &mut removed] {
            list.sort_by(|a, b| a.payload().cmp(b.payload()));
        }

        Some(MarkerDiff {
            persisted,
            added,
            removed,
        })
    }
}

impl FromIterator<Marker> for TrackedSet {
    fn from_iter<I: IntoIterator<Item = Marker>>(iter: I) -> Self {
        let mut set = TrackedSet::new();
        for marker in iter {
            set.insert(marker);
        }
        set
    }
}
