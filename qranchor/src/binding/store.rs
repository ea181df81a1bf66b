//! Marker → scene node bindings.

use std::collections::HashMap;

use serde::Serialize;

use crate::anchor::{DistanceSmoother, HitKind, Vec3};
use crate::marker::Point2;

/// Progress of the model shown on a binding.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum AssetAttachment {
    /// No model requested yet.
    #[default]
    Missing,
    /// A resolve is in flight.
    Pending,
    /// Scene file of the attached model.
    Attached(String),
    Failed(String),
}

/// A placed object tied to a marker identity.
#[derive(Debug, Clone)]
pub struct SceneBinding<H> {
    payload: String,
    handle: H,
    pub(crate) position: Vec3,
    pub(crate) last_hit: HitKind,
    pub(crate) last_midpoint: Point2,
    /// Frame the marker was last part of the tracked set.
    pub(crate) last_seen: u64,
    /// Frame the marker was reported removed, while still bound.
    pub(crate) absent_since: Option<u64>,
    pub(crate) asset: AssetAttachment,
    pub(crate) smoother: DistanceSmoother,
}

impl<H> SceneBinding<H> {
    pub(crate) fn new(
        payload: impl Into<String>,
        handle: H,
        position: Vec3,
        last_hit: HitKind,
        last_midpoint: Point2,
        frame_id: u64,
        smoother: DistanceSmoother,
    ) -> Self {
        Self {
            payload: payload.into(),
            handle,
            position,
            last_hit,
            last_midpoint,
            last_seen: frame_id,
            absent_since: None,
            asset: AssetAttachment::Missing,
            smoother,
        }
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn handle(&self) -> &H {
        &self.handle
    }

    /// Last applied world position.
    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn last_hit(&self) -> HitKind {
        self.last_hit
    }

    pub fn last_midpoint(&self) -> Point2 {
        self.last_midpoint
    }

    pub fn last_seen(&self) -> u64 {
        self.last_seen
    }

    pub fn absent_since(&self) -> Option<u64> {
        self.absent_since
    }

    pub fn asset(&self) -> &AssetAttachment {
        &self.asset
    }

    pub(crate) fn into_handle(self) -> H {
        self.handle
    }
}

/// Serializable view of a binding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BindingSummary {
    pub payload: String,
    pub position: Vec3,
    pub hit: HitKind,
    pub last_seen: u64,
    pub absent_since: Option<u64>,
    pub asset: AssetAttachment,
}

impl<H> From<&SceneBinding<H>> for BindingSummary {
    fn from(binding: &SceneBinding<H>) -> Self {
        Self {
            payload: binding.payload.clone(),
            position: binding.position,
            hit: binding.last_hit,
            last_seen: binding.last_seen,
            absent_since: binding.absent_since,
            asset: binding.asset.clone(),
        }
    }
}

/// All live bindings, keyed by payload.
#[derive(Debug)]
pub struct SceneBindingStore<H> {
    bindings: HashMap<String, SceneBinding<H>>,
}

impl<H> Default for SceneBindingStore<H> {
    fn default() -> Self {
        Self {
            bindings: HashMap::new(),
        }
    }
}

impl<H> SceneBindingStore<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, payload: &str) -> Option<&SceneBinding<H>> {
        self.bindings.get(payload)
    }

    pub(crate) fn get_mut(&mut self, payload: &str) -> Option<&mut SceneBinding<H>> {
        self.bindings.get_mut(payload)
    }

    pub fn contains(&self, payload: &str) -> bool {
        self.bindings.contains_key(payload)
    }

    pub(crate) fn insert(&mut self, binding: SceneBinding<H>) {
        self.bindings.insert(binding.payload.clone(), binding);
    }

    pub(crate) fn remove(&mut self, payload: &str) -> Option<SceneBinding<H>> {
        self.bindings.remove(payload)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SceneBinding<H>> {
        self.bindings.values()
    }

    /// Bound payloads in sorted order.
    pub fn payloads(&self) -> Vec<&str> {
        let mut payloads: Vec<&str> = self.bindings.keys().map(String::as_str).collect();
        payloads.sort_unstable();
        payloads
    }

    /// Bindings sorted by payload.
    pub fn summaries(&self) -> Vec<BindingSummary> {
        let mut summaries: Vec<BindingSummary> = self.iter().map(BindingSummary::from).collect();
        summaries.sort_by(|a, b| a.payload.cmp(&b.payload));
        summaries
    }

    /// Payloads absent for at least `frames` cycles as of `frame_id`.
    pub fn stale(&self, frame_id: u64, frames: u64) -> Vec<String> {
        let mut stale: Vec<String> = self
            .bindings
            .values()
            .filter(|b| matches!(b.absent_since, Some(since) if frame_id.saturating_sub(since) >= frames))
            .map(|b| b.payload.clone())
            .collect();
        stale.sort_unstable();
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(payload: &str, absent_since: Option<u64>) -> SceneBinding<u32> {
        let mut b = SceneBinding::new(
            payload,
            0,
            Vec3::ZERO,
            HitKind::InfinitePlane,
            Point2::new(0.5, 0.5),
            1,
            DistanceSmoother::default(),
        );
        b.absent_since = absent_since;
        b
    }

    #[test]
    fn test_stale_selection() {
        let mut store = SceneBindingStore::new();
        store.insert(binding("present", None));
        store.insert(binding("recent", Some(8)));
        store.insert(binding("old", Some(2)));

        assert_eq!(store.stale(10, 5), vec!["old".to_string()]);
        assert_eq!(store.stale(10, 2), vec!["old".to_string(), "recent".to_string()]);
        assert!(store.stale(3, 5).is_empty());
    }

    #[test]
    fn test_payloads_sorted() {
        let mut store = SceneBindingStore::new();
        store.insert(binding("b", None));
        store.insert(binding("a", None));
        assert_eq!(store.payloads(), vec!["a", "b"]);
        assert_eq!(store.summaries()[0].payload, "a");
    }
}
