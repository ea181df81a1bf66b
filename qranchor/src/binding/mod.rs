//! Scene binding reconciliation.
//!
//! Consumes [`ReconciliationEvent`](crate::tracker::ReconciliationEvent)s and
//! keeps one placed object per visible marker:
//!
//! - `added` and `persisted` markers are hit-tested at their midpoint. A hit
//!   creates the binding or moves it; a miss leaves things as they were.
//! - `removed` markers follow the configured [`RemovalPolicy`].
//!
//! The reconciler is the only writer of the [`SceneGraph`]; events must be
//! applied in the order the tracker emitted them.

mod policy;
mod reconciler;
mod scene;
mod store;

pub use policy::{RemovalPolicy, DEFAULT_STALE_FRAMES};
pub use reconciler::{ReconcileReport, ReconcilerConfig, SceneReconciler};
pub use scene::{HeadlessNode, HeadlessScene, NodeId, SceneGraph};
pub use store::{AssetAttachment, BindingSummary, SceneBinding, SceneBindingStore};
