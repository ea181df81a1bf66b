//! Application configuration for QrAnchorApp.
//!
//! Combines the tracker, reconciler, hit-test and asset cache settings so the
//! components are configured from one place.

use std::time::Duration;

use crate::anchor::HitTestConfig;
use crate::asset::AssetCacheConfig;
use crate::binding::{ReconcilerConfig, RemovalPolicy};
use crate::config::ConfigFile;
use crate::tracker::TrackerConfig;

/// Top-level configuration passed to `QrAnchorApp::start()`.
#[derive(Clone, Debug, Default)]
pub struct AppConfig {
    pub tracker: TrackerConfig,
    pub reconciler: ReconcilerConfig,
    /// Used when the app builds its own hit-tester.
    pub hit_test: HitTestConfig,
    pub assets: AssetCacheConfig,
}

impl AppConfig {
    pub fn new(assets: AssetCacheConfig) -> Self {
        Self {
            assets,
            ..Self::default()
        }
    }

    /// Create application config from the configuration file.
    pub fn from_config_file(config: &ConfigFile) -> Self {
        let a = &config.assets;
        let assets = AssetCacheConfig::new(a.directory.clone())
            .with_base_url(a.base_url.clone())
            .with_format(a.format)
            .with_max_size(a.max_size)
            .with_concurrent(a.concurrent)
            .with_max_attempts(a.max_attempts)
            .with_timeout(Duration::from_secs(a.timeout_secs))
            .with_scene_extension(a.scene_extension.clone())
            .with_resource_dir(a.resource_dir.clone());

        Self {
            tracker: TrackerConfig::default().with_origin(config.tracker.coordinate_origin),
            reconciler: ReconcilerConfig::default()
                .with_removal_policy(config.binding.removal_policy)
                .with_infinite_plane(config.binding.infinite_plane)
                .with_smoothing_window(config.binding.smoothing_window),
            hit_test: HitTestConfig::default(),
            assets,
        }
    }

    pub fn with_tracker(mut self, tracker: TrackerConfig) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn with_reconciler(mut self, reconciler: ReconcilerConfig) -> Self {
        self.reconciler = reconciler;
        self
    }

    pub fn with_removal_policy(mut self, policy: RemovalPolicy) -> Self {
        self.reconciler.removal_policy = policy;
        self
    }

    pub fn with_hit_test(mut self, hit_test: HitTestConfig) -> Self {
        self.hit_test = hit_test;
        self
    }
}
