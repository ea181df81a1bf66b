//! Application wiring and lifecycle.
//!
//! [`QrAnchorApp`] connects the marker tracker, the scene reconciler and the
//! asset cache, and owns the task that drives them.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          QrAnchorApp                             │
//! │                                                                  │
//! │  submit_frame ──► MarkerTracker ──► ReconciliationEvent          │
//! │                        │                   │                     │
//! │                   frame clock              ▼                     │
//! │                        │          consumer task ──► SceneReconciler
//! │                        └──► expire_stale   │          │          │
//! │                                            │      placed markers │
//! │                                            ▼          │          │
//! │                         AssetCacheManager::resolve ◄──┘          │
//! │                                            │                     │
//! │                                            └──► attach_asset     │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use qranchor::app::{AppConfig, QrAnchorApp};
//! use qranchor::binding::HeadlessScene;
//!
//! let app = QrAnchorApp::start(config, detector, HeadlessScene::new()).await?;
//! app.hit_tester().update(snapshot);
//! app.submit_frame(frame);
//!
//! app.shutdown().await?;
//! ```

mod bootstrap;
mod config;
mod error;

pub use bootstrap::QrAnchorApp;
pub use config::AppConfig;
pub use error::AppError;
