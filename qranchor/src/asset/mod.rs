//! Model asset fetching and caching.
//!
//! [`AssetCacheManager`] turns marker payloads into [`LoadedAsset`]s backed by
//! files under a cache root, downloading bundles as needed and evicting the
//! least recently used entries when the cache outgrows its budget.
//!
//! # Example
//!
//! ```no_run
//! use qranchor::asset::{AssetCacheConfig, AssetCacheManager};
//!
//! # async fn run() -> Result<(), qranchor::asset::AssetError> {
//! let config = AssetCacheConfig::new("/tmp/qranchor-assets")
//!     .with_base_url("https://models.example.com/ar");
//! let manager = AssetCacheManager::with_http(config)?;
//!
//! let asset = manager.resolve("cup").await?;
//! println!("scene at {}", asset.scene_path.display());
//! # Ok(())
//! # }
//! ```

mod bundle;
mod descriptor;
mod error;
mod eviction;
mod fetcher;
mod manager;
mod state;
mod store;

pub use bundle::{
    file_sha256, list_files, sha256_hex, stage_bundle, unpack_archive, BundleFormat,
    BundleManifest, MANIFEST_FILE,
};
pub use descriptor::{validate_key, ModelDescriptor};
pub use error::{AssetError, AssetResult};
pub use eviction::{
    clear_disk_cache, dir_size, disk_usage, evict_to_budget, scan_entries, DiskEntry, GcResult,
};
pub use fetcher::{AssetFetcher, HttpFetcher, DEFAULT_FETCH_TIMEOUT};
pub use manager::{
    default_asset_dir, AssetCacheConfig, AssetCacheManager, CacheStats, DEFAULT_MAX_CACHE_BYTES,
    DEFAULT_RESOURCE_DIR, DEFAULT_SCENE_EXTENSION,
};
pub use state::{
    AssetStateTable, Begin, ConcurrentLoadPolicy, DownloadState, LoadResult, StateCounts,
};
pub use store::{AssetStore, EntryStatus, LoadedAsset, STAGING_DIR};
