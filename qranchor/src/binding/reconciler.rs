//! Applies reconciliation events to the scene.

use serde::Serialize;
use tracing::{debug, trace};

use super::policy::RemovalPolicy;
use super::scene::SceneGraph;
use super::store::{AssetAttachment, SceneBinding, SceneBindingStore};
use crate::anchor::{AnchorQuery, DistanceSmoother, WorldAnchorResolver, DEFAULT_SMOOTHING_WINDOW};
use crate::asset::LoadedAsset;
use crate::marker::Marker;
use crate::tracker::ReconciliationEvent;

/// Reconciler behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcilerConfig {
    pub removal_policy: RemovalPolicy,
    /// Ask the resolver to prefer the infinite plane at the binding's height.
    pub infinite_plane: bool,
    /// Distances averaged for feature-point hits. `1` disables smoothing.
    pub smoothing_window: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            removal_policy: RemovalPolicy::default(),
            infinite_plane: false,
            smoothing_window: DEFAULT_SMOOTHING_WINDOW,
        }
    }
}

impl ReconcilerConfig {
    pub fn with_removal_policy(mut self, policy: RemovalPolicy) -> Self {
        self.removal_policy = policy;
        self
    }

    pub fn with_infinite_plane(mut self, enabled: bool) -> Self {
        self.infinite_plane = enabled;
        self
    }

    pub fn with_smoothing_window(mut self, window: usize) -> Self {
        self.smoothing_window = window;
        self
    }
}

/// What one reconciliation pass did. Every list is in processing order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub frame_id: u64,
    /// New bindings created.
    pub placed: Vec<String>,
    /// Existing bindings moved.
    pub updated: Vec<String>,
    /// Markers whose hit-test failed this cycle.
    pub missed: Vec<String>,
    /// Bindings marked absent, pending stale expiry.
    pub absent: Vec<String>,
    /// Bindings deleted.
    pub removed: Vec<String>,
}

impl ReconcileReport {
    fn new(frame_id: u64) -> Self {
        Self {
            frame_id,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.placed.is_empty()
            && self.updated.is_empty()
            && self.missed.is_empty()
            && self.absent.is_empty()
            && self.removed.is_empty()
    }
}

/// The single writer of the scene.
///
/// Owns the [`SceneGraph`] and the [`SceneBindingStore`]; consults the
/// [`WorldAnchorResolver`] for every visible marker in each event.
pub struct SceneReconciler<S: SceneGraph, R> {
    config: ReconcilerConfig,
    resolver: R,
    scene: S,
    store: SceneBindingStore<S::Handle>,
}

impl<S, R> SceneReconciler<S, R>
where
    S: SceneGraph,
    R: WorldAnchorResolver,
{
    pub fn new(scene: S, resolver: R, config: ReconcilerConfig) -> Self {
        Self {
            config,
            resolver,
            scene,
            store: SceneBindingStore::new(),
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    pub fn store(&self) -> &SceneBindingStore<S::Handle> {
        &self.store
    }

    pub fn scene(&self) -> &S {
        &self.scene
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    /// Apply one event: persisted markers first, then added, then removed.
    pub fn apply<F>(&mut self, event: &ReconciliationEvent<F>) -> ReconcileReport {
        let mut report = ReconcileReport::new(event.frame_id);

        for marker in event.persisted.iter().chain(event.added.iter()) {
            self.anchor(marker, event.frame_id, &mut report);
        }

        for marker in &event.removed {
            self.handle_removed(marker, event.frame_id, &mut report);
        }

        report.removed.extend(self.expire_stale(event.frame_id));

        debug!(
            frame_id = event.frame_id,
            placed = report.placed.len(),
            updated = report.updated.len(),
            missed = report.missed.len(),
            removed = report.removed.len(),
            "Reconciled frame"
        );
        report
    }

    /// Remove bindings whose markers have been absent long enough, as of
    /// `frame_id`. Only [`RemovalPolicy::Stale`] expires anything.
    pub fn expire_stale(&mut self, frame_id: u64) -> Vec<String> {
        let RemovalPolicy::Stale { frames } = self.config.removal_policy else {
            return Vec::new();
        };

        let stale = self.store.stale(frame_id, frames);
        for payload in &stale {
            self.unbind(payload);
            debug!(payload = %payload, frame_id, "Removed stale binding");
        }
        stale
    }

    /// Mark that a model is being resolved for a binding.
    pub fn mark_asset_pending(&mut self, payload: &str) -> bool {
        self.set_asset(payload, AssetAttachment::Pending)
    }

    /// Record that the model for a binding could not be resolved.
    pub fn mark_asset_failed(&mut self, payload: &str, reason: impl Into<String>) -> bool {
        self.set_asset(payload, AssetAttachment::Failed(reason.into()))
    }

    /// Attach a loaded model to a binding's node.
    ///
    /// Returns `false` if the binding is gone; late completions are dropped.
    pub fn attach_asset(&mut self, payload: &str, asset: &LoadedAsset) -> bool {
        let Some(binding) = self.store.get_mut(payload) else {
            trace!(payload = %payload, "Binding gone before asset arrived");
            return false;
        };
        self.scene.attach_asset(binding.handle(), asset);
        binding.asset = AssetAttachment::Attached(asset.scene_path.display().to_string());
        true
    }

    fn set_asset(&mut self, payload: &str, state: AssetAttachment) -> bool {
        match self.store.get_mut(payload) {
            Some(binding) => {
                binding.asset = state;
                true
            }
            None => false,
        }
    }

    fn anchor(&mut self, marker: &Marker, frame_id: u64, report: &mut ReconcileReport) {
        let payload = marker.payload();
        let mut query = AnchorQuery::at(marker.midpoint()).with_infinite_plane(self.config.infinite_plane);
        if let Some(binding) = self.store.get(payload) {
            query = query.with_reference(binding.position());
        }

        let hit = match self.resolver.resolve(&query) {
            Ok(hit) => hit,
            Err(miss) => {
                trace!(payload = %payload, "{}", miss);
                if let Some(binding) = self.store.get_mut(payload) {
                    binding.last_seen = frame_id;
                    binding.absent_since = None;
                }
                report.missed.push(payload.to_string());
                return;
            }
        };

        match self.store.get_mut(payload) {
            Some(binding) => {
                let position = binding.smoother.apply(&hit);
                binding.position = position;
                binding.last_hit = hit.kind;
                binding.last_midpoint = marker.midpoint();
                binding.last_seen = frame_id;
                binding.absent_since = None;
                self.scene.update(binding.handle(), position);
                report.updated.push(payload.to_string());
            }
            None => {
                let mut smoother = DistanceSmoother::new(self.config.smoothing_window);
                let position = smoother.apply(&hit);
                let handle = self.scene.place(marker, position);
                self.store.insert(SceneBinding::new(
                    payload,
                    handle,
                    position,
                    hit.kind,
                    marker.midpoint(),
                    frame_id,
                    smoother,
                ));
                debug!(payload = %payload, position = %position, kind = ?hit.kind, "Placed marker");
                report.placed.push(payload.to_string());
            }
        }
    }

    fn handle_removed(&mut self, marker: &Marker, frame_id: u64, report: &mut ReconcileReport) {
        let payload = marker.payload();
        if !self.store.contains(payload) {
            return;
        }

        match self.config.removal_policy {
            RemovalPolicy::Retain => {}
            RemovalPolicy::Immediate => {
                self.unbind(payload);
                debug!(payload = %payload, "Removed binding");
                report.removed.push(payload.to_string());
            }
            RemovalPolicy::Stale { .. } => {
                if let Some(binding) = self.store.get_mut(payload) {
                    if binding.absent_since.is_none() {
                        binding.absent_since = Some(frame_id);
                        report.absent.push(payload.to_string());
                    }
                }
            }
        }
    }

    fn unbind(&mut self, payload: &str) {
        if let Some(binding) = self.store.remove(payload) {
            self.scene.remove(binding.into_handle());
        }
    }
}
