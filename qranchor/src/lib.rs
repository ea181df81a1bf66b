//! QrAnchor - QR markers anchored in an AR scene
//!
//! This library tracks QR markers across camera frames, anchors each one at a
//! world position, keeps a scene node bound to it and loads the 3D model the
//! marker names from a disk-backed asset cache.
//!
//! # Modules
//!
//! - [`marker`]: marker identity and frame-to-frame set difference
//! - [`tracker`]: single-flight detection and reconciliation events
//! - [`anchor`]: world anchoring through a hit-test fallback chain
//! - [`binding`]: scene bindings and the removal policy
//! - [`asset`]: model fetching, caching and disk eviction
//! - [`app`]: wiring of the above into one running application
//! - [`config`]: INI configuration file
//! - [`logging`]: tracing setup

pub mod anchor;
pub mod app;
pub mod asset;
pub mod binding;
pub mod config;
pub mod logging;
pub mod marker;
pub mod tracker;

/// Crate version, as reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
