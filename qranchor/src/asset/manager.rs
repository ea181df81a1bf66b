//! The asset cache manager.
//!
//! Resolves model keys to [`LoadedAsset`]s with three levels:
//!
//! 1. In memory: a `Loaded` state is served without I/O, after checking its
//!    scene file still exists.
//! 2. On disk: a complete entry under the cache root is loaded directly.
//! 3. Remote: the bundle is downloaded, staged, moved into place, and the
//!    cache is trimmed back under its size budget.
//!
//! Only one load per key runs at a time. Concurrent requests are rejected or
//! wait for the in-flight load, per [`ConcurrentLoadPolicy`]. Failed keys are
//! negative-cached after `max_attempts` consecutive failures.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::bundle::{stage_bundle, BundleFormat};
use super::descriptor::ModelDescriptor;
use super::error::{AssetError, AssetResult};
use super::eviction::{disk_usage, evict_to_budget, GcResult};
use super::fetcher::{AssetFetcher, HttpFetcher, DEFAULT_FETCH_TIMEOUT};
use super::state::{AssetStateTable, Begin, ConcurrentLoadPolicy, LoadResult};
use super::store::{AssetStore, EntryStatus, LoadedAsset};

/// Default disk budget (500 MB).
pub const DEFAULT_MAX_CACHE_BYTES: u64 = 500 * 1024 * 1024;

/// Default scene file extension.
pub const DEFAULT_SCENE_EXTENSION: &str = "scn";

/// Default name of the resource subdirectory.
pub const DEFAULT_RESOURCE_DIR: &str = "textures";

/// Default cache root: `~/.qranchor/assets`.
pub fn default_asset_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".qranchor")
        .join("assets")
}

/// Asset cache configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetCacheConfig {
    pub directory: PathBuf,
    /// Base URL for plain model names. Empty means disk-only for them.
    pub base_url: String,
    pub format: BundleFormat,
    pub max_size_bytes: u64,
    pub concurrent: ConcurrentLoadPolicy,
    /// Consecutive failures before a key is negative-cached.
    pub max_attempts: u32,
    pub timeout: Duration,
    pub scene_extension: String,
    pub resource_dir: String,
}

impl Default for AssetCacheConfig {
    fn default() -> Self {
        Self {
            directory: default_asset_dir(),
            base_url: String::new(),
            format: BundleFormat::default(),
            max_size_bytes: DEFAULT_MAX_CACHE_BYTES,
            concurrent: ConcurrentLoadPolicy::default(),
            max_attempts: 1,
            timeout: DEFAULT_FETCH_TIMEOUT,
            scene_extension: DEFAULT_SCENE_EXTENSION.to_string(),
            resource_dir: DEFAULT_RESOURCE_DIR.to_string(),
        }
    }
}

impl AssetCacheConfig {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Self::default()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_format(mut self, format: BundleFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_max_size(mut self, bytes: u64) -> Self {
        self.max_size_bytes = bytes;
        self
    }

    pub fn with_concurrent(mut self, policy: ConcurrentLoadPolicy) -> Self {
        self.concurrent = policy;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_scene_extension(mut self, extension: impl Into<String>) -> Self {
        self.scene_extension = extension.into();
        self
    }

    pub fn with_resource_dir(mut self, dir: impl Into<String>) -> Self {
        self.resource_dir = dir.into();
        self
    }
}

/// Cache counters plus current state sizes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub downloads: u64,
    pub failures: u64,
    pub rejected: u64,
    pub waits: u64,
    pub evictions: u64,
    pub bytes_evicted: u64,
    pub loaded: usize,
    pub loading: usize,
    pub failed: usize,
}

impl CacheStats {
    /// Fraction of successful resolves served without downloading.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.memory_hits + self.disk_hits;
        let total = hits + self.downloads;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    downloads: AtomicU64,
    failures: AtomicU64,
    rejected: AtomicU64,
    waits: AtomicU64,
    evictions: AtomicU64,
    bytes_evicted: AtomicU64,
}

struct Inner<F> {
    config: AssetCacheConfig,
    store: AssetStore,
    fetcher: F,
    table: Mutex<AssetStateTable>,
    /// Serializes commits and eviction. Taken before `table`.
    storage_lock: Mutex<()>,
    counters: Counters,
}

/// Finishes a load exactly once, even if the loading task panics.
struct LoadGuard<F: AssetFetcher> {
    inner: Arc<Inner<F>>,
    key: String,
    finished: bool,
}

impl<F: AssetFetcher> LoadGuard<F> {
    fn finish(mut self, result: LoadResult) -> LoadResult {
        self.finished = true;
        self.inner.finish(&self.key, &result);
        result
    }
}

impl<F: AssetFetcher> Drop for LoadGuard<F> {
    fn drop(&mut self) {
        if !self.finished {
            let result = Err(AssetError::Cancelled {
                key: self.key.clone(),
            });
            self.inner.finish(&self.key, &result);
        }
    }
}

/// Fetches, stores and serves model assets.
///
/// Cheap to clone; clones share state.
pub struct AssetCacheManager<F: AssetFetcher = HttpFetcher> {
    inner: Arc<Inner<F>>,
}

impl<F: AssetFetcher> Clone for AssetCacheManager<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl AssetCacheManager<HttpFetcher> {
    /// A manager fetching over HTTP with the configured timeout.
    pub fn with_http(config: AssetCacheConfig) -> AssetResult<Self> {
        let fetcher = HttpFetcher::new(config.timeout)?;
        Ok(Self::new(config, fetcher))
    }
}

impl<F: AssetFetcher> AssetCacheManager<F> {
    pub fn new(config: AssetCacheConfig, fetcher: F) -> Self {
        let store = AssetStore::new(config.directory.clone(), config.resource_dir.clone());
        info!(
            directory = %config.directory.display(),
            max_size = config.max_size_bytes,
            format = %config.format,
            concurrent = %config.concurrent,
            "Asset cache ready"
        );
        Self {
            inner: Arc::new(Inner {
                config,
                store,
                fetcher,
                table: Mutex::new(AssetStateTable::new()),
                storage_lock: Mutex::new(()),
                counters: Counters::default(),
            }),
        }
    }

    pub fn config(&self) -> &AssetCacheConfig {
        &self.inner.config
    }

    pub fn root(&self) -> &Path {
        self.inner.store.root()
    }

    /// Descriptor for a marker payload under this cache's defaults.
    pub fn descriptor(&self, payload: &str) -> AssetResult<ModelDescriptor> {
        ModelDescriptor::from_payload(
            payload,
            &self.inner.config.base_url,
            &self.inner.config.scene_extension,
        )
    }

    /// Resolve a marker payload (model name or URL).
    pub async fn resolve(&self, payload: &str) -> LoadResult {
        let descriptor = self.descriptor(payload)?;
        self.resolve_descriptor(descriptor).await
    }

    /// Resolve a model.
    pub async fn resolve_descriptor(&self, descriptor: ModelDescriptor) -> LoadResult {
        let inner = &self.inner;
        let begin = inner.table.lock().begin(
            descriptor.key(),
            inner.config.concurrent,
            inner.config.max_attempts,
            |asset| asset.scene_path.is_file(),
        );

        match begin {
            Begin::Hit(asset) => {
                inner.counters.memory_hits.fetch_add(1, Ordering::Relaxed);
                // Record the access on the blocking pool; the hit itself stays in memory.
                let touched = Arc::clone(inner);
                tokio::task::spawn_blocking(move || touched.store.touch(&descriptor));
                Ok(asset)
            }
            Begin::Rejected(err) => {
                inner.counters.rejected.fetch_add(1, Ordering::Relaxed);
                debug!(key = %descriptor.key(), error = %err, "Resolve rejected");
                Err(err)
            }
            Begin::Wait(rx) => {
                inner.counters.waits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %descriptor.key(), "Waiting for in-flight load");
                rx.await.unwrap_or_else(|_| {
                    Err(AssetError::Cancelled {
                        key: descriptor.key().to_string(),
                    })
                })
            }
            Begin::Load => {
                let key = descriptor.key().to_string();
                let guard = LoadGuard {
                    inner: Arc::clone(inner),
                    key: key.clone(),
                    finished: false,
                };
                // The load completes even if this future is dropped.
                let task = tokio::task::spawn_blocking(move || {
                    let result = guard.inner.load(&descriptor).map(Arc::new);
                    guard.finish(result)
                });
                task.await.unwrap_or_else(|e| {
                    warn!(key = %key, error = %e, "Load task failed");
                    Err(AssetError::Cancelled { key })
                })
            }
        }
    }

    /// Clear the in-memory state of a key, including a negative-cache entry.
    pub fn invalidate(&self, key: &str) -> bool {
        let cleared = self.inner.table.lock().invalidate(key);
        if cleared {
            debug!(key, "Invalidated asset");
        }
        cleared
    }

    /// Invalidate a key and delete its files. Returns the bytes freed.
    pub async fn purge(&self, key: &str) -> AssetResult<u64> {
        super::descriptor::validate_key(key)?;
        let inner = Arc::clone(&self.inner);
        let key = key.to_string();
        let label = key.clone();
        self.run_blocking(&label, move || {
            let _storage = inner.storage_lock.lock();
            {
                let mut table = inner.table.lock();
                if table.is_loading(&key) {
                    return Err(AssetError::AlreadyLoading { key });
                }
                table.invalidate(&key);
            }
            let freed = inner.store.remove_entry(&key)?;
            info!(key = %key, bytes = freed, "Purged asset");
            Ok(freed)
        })
        .await
    }

    /// Evict least-recently-used entries down to the budget.
    pub async fn gc(&self) -> AssetResult<GcResult> {
        let inner = Arc::clone(&self.inner);
        self.run_blocking("gc", move || {
            let _storage = inner.storage_lock.lock();
            inner.evict_locked()
        })
        .await
    }

    /// Bytes used by cache entries on disk.
    pub async fn disk_usage(&self) -> AssetResult<u64> {
        let root = self.root().to_path_buf();
        self.run_blocking("disk_usage", move || {
            disk_usage(&root).map_err(|e| AssetError::io(&root, e))
        })
        .await
    }

    pub fn stats(&self) -> CacheStats {
        let c = &self.inner.counters;
        let counts = self.inner.table.lock().counts();
        CacheStats {
            memory_hits: c.memory_hits.load(Ordering::Relaxed),
            disk_hits: c.disk_hits.load(Ordering::Relaxed),
            downloads: c.downloads.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            waits: c.waits.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
            bytes_evicted: c.bytes_evicted.load(Ordering::Relaxed),
            loaded: counts.loaded,
            loading: counts.loading,
            failed: counts.failed,
        }
    }

    async fn run_blocking<T, J>(&self, label: &str, job: J) -> AssetResult<T>
    where
        T: Send + 'static,
        J: FnOnce() -> AssetResult<T> + Send + 'static,
    {
        tokio::task::spawn_blocking(job).await.unwrap_or_else(|e| {
            warn!(task = label, error = %e, "Blocking cache task failed");
            Err(AssetError::Cancelled {
                key: label.to_string(),
            })
        })
    }
}

impl<F: AssetFetcher> Inner<F> {
    fn finish(&self, key: &str, result: &LoadResult) {
        if let Err(err) = result {
            self.counters.failures.fetch_add(1, Ordering::Relaxed);
            warn!(key, error = %err, "Asset load failed");
        }
        let notified = self.table.lock().finish(key, result);
        if notified > 0 {
            debug!(key, waiters = notified, "Delivered load result to waiters");
        }
    }

    /// Disk or remote load. Runs on the blocking pool.
    fn load(&self, descriptor: &ModelDescriptor) -> AssetResult<LoadedAsset> {
        let key = descriptor.key();

        match self.store.check(descriptor) {
            EntryStatus::Valid(_) => match self.store.load(descriptor) {
                Ok(asset) => {
                    self.counters.disk_hits.fetch_add(1, Ordering::Relaxed);
                    debug!(key, "Loaded asset from disk");
                    return Ok(asset);
                }
                Err(err) => {
                    warn!(key, error = %err, "Removing corrupt cache entry");
                    let _storage = self.storage_lock.lock();
                    self.store.remove_entry(key)?;
                }
            },
            EntryStatus::Partial => {
                warn!(key, "Removing incomplete cache entry");
                let _storage = self.storage_lock.lock();
                self.store.remove_entry(key)?;
            }
            EntryStatus::Missing => {}
        }

        if descriptor.base_url().is_empty() {
            return Err(AssetError::NoBaseUrl {
                key: key.to_string(),
            });
        }

        let staging = self.store.create_staging(key)?;
        let staged = stage_bundle(
            &self.fetcher,
            descriptor,
            self.config.format,
            self.store.resource_dir(),
            &staging,
        );
        if let Err(err) = staged {
            self.store.discard_staging(&staging);
            return Err(err);
        }
        self.counters.downloads.fetch_add(1, Ordering::Relaxed);

        let _storage = self.storage_lock.lock();
        let loaded = self
            .store
            .commit(key, &staging)
            .and_then(|_| self.store.load(descriptor));

        let asset = match loaded {
            Ok(asset) => asset,
            Err(err) => {
                self.store.discard_staging(&staging);
                if let Err(e) = self.store.remove_entry(key) {
                    warn!(key, error = %e, "Failed to remove broken cache entry");
                }
                return Err(err);
            }
        };
        info!(key, bytes = asset.size_bytes, "Downloaded asset");

        if let Err(e) = self.evict_locked() {
            warn!(error = %e, "Eviction after download failed");
        }
        Ok(asset)
    }

    /// Evict down to the budget. Caller holds the storage lock.
    fn evict_locked(&self) -> AssetResult<GcResult> {
        let root = self.store.root();
        let result = evict_to_budget(root, self.config.max_size_bytes, |key| {
            self.table.lock().is_loading(key)
        })
        .map_err(|e| AssetError::io(root, e))?;

        if result.entries_removed > 0 {
            self.counters
                .evictions
                .fetch_add(result.entries_removed as u64, Ordering::Relaxed);
            self.counters
                .bytes_evicted
                .fetch_add(result.bytes_freed, Ordering::Relaxed);
            self.table.lock().forget_loaded(&result.evicted);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::bundle::tests::MapFetcher;
    use crate::asset::{BundleManifest, MANIFEST_FILE};
    use std::collections::HashMap;
    use tempfile::TempDir;

    const BASE: &str = "http://models";

    fn fetcher_for(keys: &[&str]) -> MapFetcher {
        let mut files = HashMap::new();
        for key in keys {
            files.insert(
                format!("{}/{}/manifest.json", BASE, key),
                format!(r#"{{"scene":"{}.scn","resources":["t.png"]}}"#, key).into_bytes(),
            );
            files.insert(format!("{}/{}/textures/t.png", BASE, key), vec![1u8; 10]);
            files.insert(format!("{}/{}/{}.scn", BASE, key, key), vec![2u8; 100]);
        }
        MapFetcher(files)
    }

    fn config(tmp: &TempDir) -> AssetCacheConfig {
        AssetCacheConfig::new(tmp.path()).with_base_url(BASE)
    }

    #[tokio::test]
    async fn test_download_then_memory_hit() {
        let tmp = TempDir::new().unwrap();
        let manager = AssetCacheManager::new(config(&tmp), fetcher_for(&["cup"]));

        let first = manager.resolve("cup").await.unwrap();
        assert_eq!(first.scene_path, tmp.path().join("cup").join("cup.scn"));
        assert_eq!(first.resources, vec!["t.png"]);

        let second = manager.resolve("cup").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let stats = manager.stats();
        assert_eq!(stats.downloads, 1);
        assert_eq!(stats.memory_hits, 1);
        assert_eq!(stats.loaded, 1);
    }

    #[tokio::test]
    async fn test_failure_is_negative_cached() {
        let tmp = TempDir::new().unwrap();
        let manager = AssetCacheManager::new(config(&tmp), fetcher_for(&[]));

        let err = manager.resolve("ghost").await.unwrap_err();
        assert!(matches!(err, AssetError::Network { .. }));
        assert!(!tmp.path().join("ghost").exists());

        let err = manager.resolve("ghost").await.unwrap_err();
        assert!(matches!(err, AssetError::InvalidAsset { attempts: 1, .. }));
        assert_eq!(manager.stats().failures, 1);

        assert!(manager.invalidate("ghost"));
        let err = manager.resolve("ghost").await.unwrap_err();
        assert!(matches!(err, AssetError::Network { .. }));
    }

    #[tokio::test]
    async fn test_plain_name_without_base_url() {
        let tmp = TempDir::new().unwrap();
        let manager = AssetCacheManager::new(AssetCacheConfig::new(tmp.path()), fetcher_for(&[]));
        let err = manager.resolve("cup").await.unwrap_err();
        assert!(matches!(err, AssetError::NoBaseUrl { .. }));
    }

    #[tokio::test]
    async fn test_deleted_files_trigger_reload() {
        let tmp = TempDir::new().unwrap();
        let manager = AssetCacheManager::new(config(&tmp), fetcher_for(&["cup"]));

        manager.resolve("cup").await.unwrap();
        std::fs::remove_dir_all(tmp.path().join("cup")).unwrap();

        let again = manager.resolve("cup").await.unwrap();
        assert!(again.scene_path.is_file());
        assert_eq!(manager.stats().downloads, 2);
    }

    /// Writes a `cup` entry whose scene does not match its recorded checksum.
    fn seed_corrupt_entry(tmp: &TempDir) {
        let dir = tmp.path().join("cup");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("cup.scn"), b"corrupt").unwrap();
        let manifest = BundleManifest {
            scene: "cup.scn".to_string(),
            resources: Vec::new(),
            sha256: Some(crate::asset::sha256_hex(b"good-scene")),
        };
        std::fs::write(dir.join(MANIFEST_FILE), manifest.to_json().unwrap()).unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_downloaded_again() {
        let tmp = TempDir::new().unwrap();
        seed_corrupt_entry(&tmp);
        let manager = AssetCacheManager::new(
            config(&tmp).with_max_attempts(3),
            fetcher_for(&["cup"]),
        );

        let asset = manager.resolve("cup").await.unwrap();
        assert_eq!(std::fs::read(&asset.scene_path).unwrap(), vec![2u8; 100]);

        let stats = manager.stats();
        assert_eq!(stats.downloads, 1);
        assert_eq!(stats.disk_hits, 0);
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_removed_when_download_fails() {
        let tmp = TempDir::new().unwrap();
        seed_corrupt_entry(&tmp);
        let offline = AssetCacheManager::new(config(&tmp), fetcher_for(&[]));

        let err = offline.resolve("cup").await.unwrap_err();
        assert!(matches!(err, AssetError::Network { .. }));
        assert!(!tmp.path().join("cup").exists());

        assert!(offline.invalidate("cup"));
        let online = AssetCacheManager::new(config(&tmp), fetcher_for(&["cup"]));
        online.resolve("cup").await.unwrap();
        assert_eq!(online.stats().downloads, 1);
    }

    #[tokio::test]
    async fn test_memory_hit_records_access_time() {
        let tmp = TempDir::new().unwrap();
        let manager = AssetCacheManager::new(config(&tmp), fetcher_for(&["cup"]));
        let asset = manager.resolve("cup").await.unwrap();

        let hour_ago = std::time::SystemTime::now() - Duration::from_secs(3600);
        filetime::set_file_atime(&asset.scene_path, filetime::FileTime::from_system_time(hour_ago))
            .unwrap();

        manager.resolve("cup").await.unwrap();
        assert_eq!(manager.stats().memory_hits, 1);

        let recent = std::time::SystemTime::now() - Duration::from_secs(60);
        for _ in 0..200 {
            let accessed = std::fs::metadata(&asset.scene_path).unwrap().accessed().unwrap();
            if accessed > recent {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("access time was not updated after a memory hit");
    }

    #[tokio::test]
    async fn test_purge_removes_files() {
        let tmp = TempDir::new().unwrap();
        let manager = AssetCacheManager::new(config(&tmp), fetcher_for(&["cup"]));
        manager.resolve("cup").await.unwrap();

        let freed = manager.purge("cup").await.unwrap();
        assert_eq!(freed, 110 + manifest_len("cup"));
        assert!(!tmp.path().join("cup").exists());
        assert_eq!(manager.stats().loaded, 0);
        assert!(manager.purge("../etc").await.is_err());
    }

    fn manifest_len(key: &str) -> u64 {
        crate::asset::BundleManifest {
            scene: format!("{}.scn", key),
            resources: vec!["t.png".to_string()],
            sha256: None,
        }
        .to_json()
        .unwrap()
        .len() as u64
    }

    #[tokio::test]
    async fn test_download_evicts_over_budget() {
        let tmp = TempDir::new().unwrap();
        let budget = 110 + manifest_len("aaa");
        let manager =
            AssetCacheManager::new(config(&tmp).with_max_size(budget), fetcher_for(&["aaa", "bbb"]));

        manager.resolve("aaa").await.unwrap();
        manager.resolve("bbb").await.unwrap();

        assert!(!tmp.path().join("aaa").exists());
        assert!(tmp.path().join("bbb").exists());
        assert_eq!(manager.stats().evictions, 1);
        assert_eq!(manager.disk_usage().await.unwrap(), budget);
    }
}
