//! On-disk layout of the asset cache.
//!
//! ```text
//! <root>/<key>/<key>.<ext>          scene file
//! <root>/<key>/<resource_dir>/...   resources
//! <root>/<key>/manifest.json        what a complete entry contains
//! <root>/.staging/<key>-<n>/        downloads in progress
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use filetime::FileTime;
use serde::Serialize;
use tracing::{debug, warn};

use super::bundle::{file_sha256, BundleManifest, MANIFEST_FILE};
use super::descriptor::ModelDescriptor;
use super::error::{AssetError, AssetResult};
use super::eviction::dir_size;

/// Directory under the root that holds in-progress downloads.
pub const STAGING_DIR: &str = ".staging";

/// A model available on disk, ready to hand to the renderer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadedAsset {
    pub key: String,
    /// The cache entry directory.
    pub directory: PathBuf,
    pub scene_path: PathBuf,
    /// Resource paths relative to the resource directory.
    pub resources: Vec<String>,
    /// Total bytes of the entry.
    pub size_bytes: u64,
}

/// Completeness of a cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryStatus {
    /// Manifest, scene and every listed resource are present.
    Valid(BundleManifest),
    /// The directory exists but something is missing or unreadable.
    Partial,
    Missing,
}

/// Paths and file operations for one cache root.
#[derive(Debug)]
pub struct AssetStore {
    root: PathBuf,
    resource_dir: String,
    staging_seq: AtomicU64,
}

impl AssetStore {
    pub fn new(root: impl Into<PathBuf>, resource_dir: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            resource_dir: resource_dir.into(),
            staging_seq: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resource_dir(&self) -> &str {
        &self.resource_dir
    }

    pub fn entry_dir(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    pub fn scene_path(&self, descriptor: &ModelDescriptor) -> PathBuf {
        self.entry_dir(descriptor.key()).join(descriptor.scene_file_name())
    }

    pub fn staging_root(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    /// Inspect the entry for `descriptor`.
    pub fn check(&self, descriptor: &ModelDescriptor) -> EntryStatus {
        let dir = self.entry_dir(descriptor.key());
        if !dir.exists() {
            return EntryStatus::Missing;
        }

        let manifest = match fs::read(dir.join(MANIFEST_FILE))
            .ok()
            .and_then(|bytes| BundleManifest::parse(&bytes, MANIFEST_FILE).ok())
        {
            Some(manifest) => manifest,
            None => return EntryStatus::Partial,
        };

        if manifest.scene != descriptor.scene_file_name() || !dir.join(&manifest.scene).is_file() {
            return EntryStatus::Partial;
        }

        let resources = dir.join(&self.resource_dir);
        if manifest.resources.iter().any(|r| !resources.join(r).is_file()) {
            return EntryStatus::Partial;
        }

        EntryStatus::Valid(manifest)
    }

    /// A fresh, empty staging directory for `key`.
    pub fn create_staging(&self, key: &str) -> AssetResult<PathBuf> {
        let seq = self.staging_seq.fetch_add(1, Ordering::Relaxed);
        let dir = self
            .staging_root()
            .join(format!("{}-{}-{}", key, std::process::id(), seq));
        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(|e| AssetError::io(&dir, e))?;
        }
        fs::create_dir_all(&dir).map_err(|e| AssetError::io(&dir, e))?;
        Ok(dir)
    }

    /// Move a staged bundle into place, replacing any previous entry.
    ///
    /// Caller holds the storage lock.
    pub fn commit(&self, key: &str, staging: &Path) -> AssetResult<PathBuf> {
        let dest = self.entry_dir(key);
        if dest.exists() {
            fs::remove_dir_all(&dest).map_err(|e| AssetError::io(&dest, e))?;
        }
        fs::rename(staging, &dest).map_err(|e| AssetError::io(&dest, e))?;
        debug!(key, path = %dest.display(), "Committed cache entry");
        Ok(dest)
    }

    /// Load a valid entry and mark it as just used. A recorded scene checksum
    /// is verified.
    pub fn load(&self, descriptor: &ModelDescriptor) -> AssetResult<LoadedAsset> {
        let manifest = match self.check(descriptor) {
            EntryStatus::Valid(manifest) => manifest,
            _ => {
                return Err(AssetError::parse(
                    descriptor.key(),
                    "cache entry is incomplete",
                ))
            }
        };

        let directory = self.entry_dir(descriptor.key());
        let scene_path = directory.join(&manifest.scene);
        if fs::metadata(&scene_path).map(|m| m.len()).unwrap_or(0) == 0 {
            return Err(AssetError::parse(
                scene_path.display().to_string(),
                "scene file is empty",
            ));
        }

        if let Some(expected) = &manifest.sha256 {
            let actual = file_sha256(&scene_path)?;
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(AssetError::ChecksumMismatch {
                    file: scene_path.display().to_string(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        let size_bytes = dir_size(&directory).map_err(|e| AssetError::io(&directory, e))?;
        self.touch(descriptor);

        Ok(LoadedAsset {
            key: descriptor.key().to_string(),
            directory,
            scene_path,
            resources: manifest.resources,
            size_bytes,
        })
    }

    /// Record an access for LRU eviction by bumping the scene file's atime.
    pub fn touch(&self, descriptor: &ModelDescriptor) {
        let path = self.scene_path(descriptor);
        let now = FileTime::from_system_time(SystemTime::now());
        if let Err(e) = filetime::set_file_atime(&path, now) {
            warn!(path = %path.display(), error = %e, "Failed to update access time");
        }
    }

    /// Delete an entry. Returns the bytes freed.
    pub fn remove_entry(&self, key: &str) -> AssetResult<u64> {
        let dir = self.entry_dir(key);
        if !dir.exists() {
            return Ok(0);
        }
        let bytes = dir_size(&dir).unwrap_or(0);
        fs::remove_dir_all(&dir).map_err(|e| AssetError::io(&dir, e))?;
        Ok(bytes)
    }

    /// Best-effort removal of a staging directory.
    pub fn discard_staging(&self, staging: &Path) {
        if let Err(e) = fs::remove_dir_all(staging) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %staging.display(), error = %e, "Failed to remove staging directory");
            }
        }
    }
}
