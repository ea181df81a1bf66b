//! The rendering side of a binding.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::anchor::Vec3;
use crate::asset::LoadedAsset;
use crate::marker::Marker;

/// Receives placement decisions. Implemented by the rendering engine.
///
/// Handles are opaque to the reconciler; it only stores and hands them back.
pub trait SceneGraph {
    type Handle: Clone + fmt::Debug;

    /// Create a node for `marker` at `position`.
    fn place(&mut self, marker: &Marker, position: Vec3) -> Self::Handle;

    /// Move an existing node.
    fn update(&mut self, handle: &Self::Handle, position: Vec3);

    /// Delete a node.
    fn remove(&mut self, handle: Self::Handle);

    /// Show a loaded model on a node.
    fn attach_asset(&mut self, handle: &Self::Handle, asset: &LoadedAsset);
}

/// Handle of a [`HeadlessScene`] node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeadlessNode {
    pub payload: String,
    pub position: Vec3,
    /// Scene file of the attached model.
    pub asset: Option<PathBuf>,
    /// Number of position updates since placement.
    pub updates: u64,
}

/// In-memory [`SceneGraph`] for tests, replay and headless use.
#[derive(Debug, Default)]
pub struct HeadlessScene {
    next_id: u64,
    nodes: BTreeMap<NodeId, HeadlessNode>,
}

impl HeadlessScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, id: NodeId) -> Option<&HeadlessNode> {
        self.nodes.get(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (&NodeId, &HeadlessNode)> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl SceneGraph for HeadlessScene {
    type Handle = NodeId;

    fn place(&mut self, marker: &Marker, position: Vec3) -> NodeId {
        self.next_id += 1;
        let id = NodeId(self.next_id);
        self.nodes.insert(
            id,
            HeadlessNode {
                payload: marker.payload().to_string(),
                position,
                asset: None,
                updates: 0,
            },
        );
        id
    }

    fn update(&mut self, handle: &NodeId, position: Vec3) {
        if let Some(node) = self.nodes.get_mut(handle) {
            node.position = position;
            node.updates += 1;
        }
    }

    fn remove(&mut self, handle: NodeId) {
        self.nodes.remove(&handle);
    }

    fn attach_asset(&mut self, handle: &NodeId, asset: &LoadedAsset) {
        if let Some(node) = self.nodes.get_mut(handle) {
            node.asset = Some(asset.scene_path.clone());
        }
    }
}
