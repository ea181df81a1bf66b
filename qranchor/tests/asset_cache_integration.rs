//! Integration tests for the asset cache manager.
//!
//! These tests verify:
//! - concurrent resolves of one key under both load policies
//! - persistence across manager instances sharing a directory
//! - LRU eviction by file access time
//! - archive bundles and checksum verification
//!
//! Run with: `cargo test --test asset_cache_integration`

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use filetime::FileTime;
use flate2::write::GzEncoder;
use flate2::Compression;
use futures::future::join_all;
use parking_lot::Mutex;
use tempfile::TempDir;

use qranchor::asset::{
    sha256_hex, AssetCacheConfig, AssetCacheManager, AssetError, AssetFetcher, AssetResult,
    BundleFormat, ConcurrentLoadPolicy,
};

const BASE: &str = "http://models.test";

// ============================================================================
// Helper Functions
// ============================================================================

/// Serves files from memory and counts requests per URL.
#[derive(Default)]
struct CountingFetcher {
    files: HashMap<String, Vec<u8>>,
    calls: Mutex<HashMap<String, usize>>,
    delay: Duration,
}

impl CountingFetcher {
    fn with_models(keys: &[&str], scene_size: usize) -> Self {
        let mut fetcher = Self::default();
        for key in keys {
            fetcher.add_model(key, vec![b'x'; scene_size]);
        }
        fetcher
    }

    fn add_model(&mut self, key: &str, scene: Vec<u8>) {
        self.files.insert(
            format!("{}/{}/manifest.json", BASE, key),
            format!(r#"{{"scene":"{}.scn","resources":[]}}"#, key).into_bytes(),
        );
        self.files.insert(format!("{}/{}/{}.scn", BASE, key, key), scene);
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn calls(&self, url: &str) -> usize {
        self.calls.lock().get(url).copied().unwrap_or(0)
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }
}

impl AssetFetcher for CountingFetcher {
    fn fetch(&self, url: &str) -> AssetResult<Vec<u8>> {
        *self.calls.lock().entry(url.to_string()).or_default() += 1;
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.files.get(url).cloned().ok_or_else(|| AssetError::Network {
            url: url.to_string(),
            reason: "404 Not Found".to_string(),
        })
    }
}

fn config(dir: &Path) -> AssetCacheConfig {
    AssetCacheConfig::new(dir).with_base_url(BASE)
}

fn manifest_url(key: &str) -> String {
    format!("{}/{}/manifest.json", BASE, key)
}

/// Set the access time of every file of a cache entry.
fn age_entry(root: &Path, key: &str, age: Duration) {
    let when = FileTime::from_system_time(SystemTime::now() - age);
    for entry in std::fs::read_dir(root.join(key)).unwrap() {
        let path = entry.unwrap().path();
        if path.is_file() {
            filetime::set_file_atime(&path, when).unwrap();
        }
    }
}

fn tarball(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (path, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, *data).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

// ============================================================================
// Concurrency
// ============================================================================

/// Concurrent resolves of one key share a single download under Wait.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_resolves_share_one_load() {
    let tmp = TempDir::new().unwrap();
    let fetcher =
        Arc::new(CountingFetcher::with_models(&["chair"], 256).delayed(Duration::from_millis(50)));
    let manager = AssetCacheManager::new(
        config(tmp.path()).with_concurrent(ConcurrentLoadPolicy::Wait),
        Arc::clone(&fetcher),
    );

    let results = join_all((0..8).map(|_| {
        let manager = manager.clone();
        tokio::spawn(async move { manager.resolve("chair").await })
    }))
    .await;

    let assets: Vec<_> = results
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();
    for asset in &assets[1..] {
        assert!(Arc::ptr_eq(&assets[0], asset));
    }
    assert_eq!(fetcher.calls(&manifest_url("chair")), 1);

    let stats = manager.stats();
    assert_eq!(stats.downloads, 1);
    assert_eq!(stats.loaded, 1);
    assert_eq!(stats.loading, 0);
}

/// Under Reject a second resolve fails fast while the first is loading.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reject_policy_refuses_concurrent_resolve() {
    let tmp = TempDir::new().unwrap();
    let fetcher =
        Arc::new(CountingFetcher::with_models(&["lamp"], 64).delayed(Duration::from_millis(200)));
    let manager = AssetCacheManager::new(
        config(tmp.path()).with_concurrent(ConcurrentLoadPolicy::Reject),
        Arc::clone(&fetcher),
    );

    let first = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.resolve("lamp").await })
    };
    for _ in 0..100 {
        if manager.stats().loading == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let second = manager.resolve("lamp").await;
    assert!(matches!(second, Err(AssetError::AlreadyLoading { ref key }) if key == "lamp"));

    first.await.unwrap().unwrap();
    assert_eq!(manager.stats().rejected, 1);

    // Once loaded, the same key is served from memory.
    manager.resolve("lamp").await.unwrap();
    assert_eq!(manager.stats().memory_hits, 1);
}

/// A dropped resolve future still finishes the load for waiters.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_abandoned_resolve_still_completes() {
    let tmp = TempDir::new().unwrap();
    let fetcher =
        Arc::new(CountingFetcher::with_models(&["vase"], 64).delayed(Duration::from_millis(100)));
    let manager = AssetCacheManager::new(config(tmp.path()), Arc::clone(&fetcher));

    let abandoned = manager.resolve("vase");
    let _ = tokio::time::timeout(Duration::from_millis(20), abandoned).await;

    let asset = manager.resolve("vase").await.unwrap();
    assert!(asset.scene_path.is_file());
    assert_eq!(fetcher.calls(&manifest_url("vase")), 1);
}

// ============================================================================
// Persistence
// ============================================================================

/// A new manager on the same directory serves cached models without fetching.
#[tokio::test]
async fn test_disk_cache_survives_manager_restart() {
    let tmp = TempDir::new().unwrap();

    let first_fetcher = Arc::new(CountingFetcher::with_models(&["desk"], 128));
    let first = AssetCacheManager::new(config(tmp.path()), Arc::clone(&first_fetcher));
    let original = first.resolve("desk").await.unwrap();
    drop(first);

    let empty = Arc::new(CountingFetcher::default());
    let second = AssetCacheManager::new(config(tmp.path()), Arc::clone(&empty));
    let reloaded = second.resolve("desk").await.unwrap();

    assert_eq!(reloaded.scene_path, original.scene_path);
    assert_eq!(reloaded.size_bytes, original.size_bytes);
    assert_eq!(empty.total_calls(), 0);
    assert_eq!(second.stats().disk_hits, 1);
    assert_eq!(second.stats().downloads, 0);
}

/// URL payloads and plain names for the same key share one entry.
#[tokio::test]
async fn test_url_payload_uses_key_from_last_segment() {
    let tmp = TempDir::new().unwrap();
    let fetcher = Arc::new(CountingFetcher::with_models(&["sofa"], 32));
    let manager = AssetCacheManager::new(config(tmp.path()), Arc::clone(&fetcher));

    let by_url = manager
        .resolve(&format!("{}/sofa.scn?v=2", BASE))
        .await
        .unwrap();
    let by_name = manager.resolve("sofa").await.unwrap();

    assert!(Arc::ptr_eq(&by_url, &by_name));
    assert_eq!(by_url.key, "sofa");
}

// ============================================================================
// Eviction
// ============================================================================

/// The least recently accessed entry is evicted when a download overflows
/// the budget.
#[tokio::test]
async fn test_lru_eviction_by_access_time() {
    let tmp = TempDir::new().unwrap();
    let fetcher = Arc::new(CountingFetcher::with_models(&["a", "b", "c"], 1000));
    let manager = AssetCacheManager::new(
        config(tmp.path()).with_max_size(2500),
        Arc::clone(&fetcher),
    );

    manager.resolve("a").await.unwrap();
    manager.resolve("b").await.unwrap();
    age_entry(tmp.path(), "a", Duration::from_secs(3600));
    age_entry(tmp.path(), "b", Duration::from_secs(1800));

    manager.resolve("c").await.unwrap();

    assert!(!tmp.path().join("a").exists());
    assert!(tmp.path().join("b").exists());
    assert!(tmp.path().join("c").exists());

    let stats = manager.stats();
    assert_eq!(stats.evictions, 1);
    assert!(stats.bytes_evicted >= 1000);
    assert!(manager.disk_usage().await.unwrap() <= 2500);

    // The evicted model is downloaded again on demand.
    manager.resolve("a").await.unwrap();
    assert_eq!(fetcher.calls(&manifest_url("a")), 2);
}

/// Explicit garbage collection honors a lowered budget.
#[tokio::test]
async fn test_gc_evicts_oldest_first() {
    let tmp = TempDir::new().unwrap();
    let fetcher = Arc::new(CountingFetcher::with_models(&["old", "new"], 1000));
    let loader = AssetCacheManager::new(config(tmp.path()), Arc::clone(&fetcher));
    loader.resolve("old").await.unwrap();
    loader.resolve("new").await.unwrap();
    age_entry(tmp.path(), "old", Duration::from_secs(7200));

    let tight = AssetCacheManager::new(
        config(tmp.path()).with_max_size(1500),
        Arc::clone(&fetcher),
    );
    let result = tight.gc().await.unwrap();

    assert_eq!(result.evicted, vec!["old".to_string()]);
    assert!(result.bytes_remaining <= 1500);
    assert!(tmp.path().join("new").exists());
}

// ============================================================================
// Bundle formats
// ============================================================================

#[tokio::test]
async fn test_archive_bundle() {
    let tmp = TempDir::new().unwrap();
    let mut fetcher = CountingFetcher::default();
    fetcher.files.insert(
        format!("{}/robot.tar.gz", BASE),
        tarball(&[
            ("robot.scn", b"robot scene".as_slice()),
            ("textures/metal.png", b"png".as_slice()),
        ]),
    );
    let manager = AssetCacheManager::new(
        config(tmp.path()).with_format(BundleFormat::Archive),
        fetcher,
    );

    let asset = manager.resolve("robot").await.unwrap();
    assert!(asset.scene_path.ends_with("robot/robot.scn"));
    assert_eq!(asset.resources, vec!["metal.png".to_string()]);
    assert!(tmp.path().join("robot/textures/metal.png").is_file());
}

/// A checksum mismatch fails the load and is negative-cached.
#[tokio::test]
async fn test_checksum_mismatch_is_negative_cached() {
    let tmp = TempDir::new().unwrap();
    let mut fetcher = CountingFetcher::default();
    fetcher.files.insert(
        manifest_url("bust"),
        format!(
            r#"{{"scene":"bust.scn","resources":[],"sha256":"{}"}}"#,
            sha256_hex(b"expected")
        )
        .into_bytes(),
    );
    fetcher
        .files
        .insert(format!("{}/bust/bust.scn", BASE), b"tampered".to_vec());
    let fetcher = Arc::new(fetcher);
    let manager = AssetCacheManager::new(config(tmp.path()), Arc::clone(&fetcher));

    let first = manager.resolve("bust").await;
    assert!(matches!(first, Err(AssetError::ChecksumMismatch { .. })));
    assert!(!tmp.path().join("bust").exists());

    let second = manager.resolve("bust").await;
    assert!(matches!(second, Err(AssetError::InvalidAsset { attempts: 1, .. })));
    assert_eq!(fetcher.calls(&manifest_url("bust")), 1);

    assert!(manager.invalidate("bust"));
    assert!(manager.resolve("bust").await.is_err());
    assert_eq!(fetcher.calls(&manifest_url("bust")), 2);
}
