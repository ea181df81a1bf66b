//! Remote bundle formats and staging of downloads.
//!
//! A bundle is a scene file plus auxiliary resources. It is published either
//! as loose files described by a `manifest.json`, or as one `.tar.gz` archive
//! with the scene at the root and resources in a subfolder. Either way it is
//! staged into a scratch directory in the cache layout:
//!
//! ```text
//! <staging>/<key>.<ext>
//! <staging>/<resource_dir>/...
//! <staging>/manifest.json
//! ```

use std::fmt;
use std::fs;
use std::io::Read;
use std::path::{Component, Path};
use std::str::FromStr;

use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::descriptor::ModelDescriptor;
use super::error::{AssetError, AssetResult};
use super::fetcher::AssetFetcher;

/// File name of the manifest, both remote and in the cache entry.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Contents of `manifest.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleManifest {
    /// Scene file name at the bundle root.
    pub scene: String,
    /// Resource paths relative to the resource directory.
    #[serde(default)]
    pub resources: Vec<String>,
    /// Hex SHA-256 of the scene file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl BundleManifest {
    pub fn parse(bytes: &[u8], source: &str) -> AssetResult<Self> {
        let manifest: Self =
            serde_json::from_slice(bytes).map_err(|e| AssetError::parse(source, e))?;
        manifest.validate(source)?;
        Ok(manifest)
    }

    /// Every name must stay inside the bundle.
    pub fn validate(&self, source: &str) -> AssetResult<()> {
        if !is_plain_file_name(&self.scene) {
            return Err(AssetError::parse(source, format!("bad scene name '{}'", self.scene)));
        }
        if let Some(bad) = self.resources.iter().find(|r| !is_relative_path(r)) {
            return Err(AssetError::parse(source, format!("bad resource path '{}'", bad)));
        }
        Ok(())
    }

    pub fn to_json(&self) -> AssetResult<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| AssetError::parse(MANIFEST_FILE, e))
    }
}

/// How bundles are published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BundleFormat {
    #[default]
    Manifest,
    Archive,
}

impl FromStr for BundleFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "manifest" => Ok(Self::Manifest),
            "archive" | "tar.gz" => Ok(Self::Archive),
            other => Err(format!(
                "unknown bundle format '{}' (expected manifest or archive)",
                other
            )),
        }
    }
}

impl fmt::Display for BundleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manifest => write!(f, "manifest"),
            Self::Archive => write!(f, "archive"),
        }
    }
}

/// Download a bundle into `staging` and write its cache manifest.
///
/// Returns the manifest as stored, whose scene is always `<key>.<ext>`.
pub fn stage_bundle(
    fetcher: &dyn AssetFetcher,
    descriptor: &ModelDescriptor,
    format: BundleFormat,
    resource_dir: &str,
    staging: &Path,
) -> AssetResult<BundleManifest> {
    let manifest = match format {
        BundleFormat::Manifest => stage_loose_files(fetcher, descriptor, resource_dir, staging)?,
        BundleFormat::Archive => stage_archive(fetcher, descriptor, resource_dir, staging)?,
    };

    let path = staging.join(MANIFEST_FILE);
    fs::write(&path, manifest.to_json()?).map_err(|e| AssetError::io(&path, e))?;
    Ok(manifest)
}

fn stage_loose_files(
    fetcher: &dyn AssetFetcher,
    descriptor: &ModelDescriptor,
    resource_dir: &str,
    staging: &Path,
) -> AssetResult<BundleManifest> {
    let manifest_url = descriptor.manifest_url();
    let remote = BundleManifest::parse(&fetcher.fetch(&manifest_url)?, &manifest_url)?;

    for resource in &remote.resources {
        let bytes = fetcher.fetch(&descriptor.resource_url(resource_dir, resource))?;
        write_file(&staging.join(resource_dir).join(resource), &bytes)?;
    }

    let scene_bytes = fetcher.fetch(&descriptor.file_url(&remote.scene))?;
    if let Some(expected) = &remote.sha256 {
        verify_sha256(&remote.scene, &scene_bytes, expected)?;
    }
    write_file(&staging.join(descriptor.scene_file_name()), &scene_bytes)?;

    debug!(
        key = %descriptor.key(),
        resources = remote.resources.len(),
        scene_bytes = scene_bytes.len(),
        "Staged bundle"
    );

    Ok(BundleManifest {
        scene: descriptor.scene_file_name(),
        resources: remote.resources,
        sha256: remote.sha256,
    })
}

fn stage_archive(
    fetcher: &dyn AssetFetcher,
    descriptor: &ModelDescriptor,
    resource_dir: &str,
    staging: &Path,
) -> AssetResult<BundleManifest> {
    let url = descriptor.archive_url();
    let bytes = fetcher.fetch(&url)?;
    unpack_archive(&bytes, staging, &url)?;

    let scene = find_scene(staging, descriptor)?;
    let target = staging.join(descriptor.scene_file_name());
    if scene != descriptor.scene_file_name() {
        let from = staging.join(&scene);
        fs::rename(&from, &target).map_err(|e| AssetError::io(&from, e))?;
    }

    let resources = list_files(&staging.join(resource_dir))?;
    debug!(key = %descriptor.key(), archive_bytes = bytes.len(), resources = resources.len(), "Unpacked archive");

    Ok(BundleManifest {
        scene: descriptor.scene_file_name(),
        resources,
        sha256: None,
    })
}

/// Extract a gzip-compressed tarball into `dest`.
///
/// Entries that would land outside `dest` are skipped.
pub fn unpack_archive(bytes: &[u8], dest: &Path, source: &str) -> AssetResult<()> {
    let mut archive = tar::Archive::new(GzDecoder::new(bytes));
    let entries = archive.entries().map_err(|e| AssetError::parse(source, e))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| AssetError::parse(source, e))?;
        let unpacked = entry
            .unpack_in(dest)
            .map_err(|e| AssetError::parse(source, e))?;
        if !unpacked {
            debug!(source, "Skipped archive entry outside bundle");
        }
    }
    Ok(())
}

/// The root-level scene file: `<key>.<ext>` if present, else the only
/// root-level file with the right extension.
fn find_scene(staging: &Path, descriptor: &ModelDescriptor) -> AssetResult<String> {
    let expected = descriptor.scene_file_name();
    if staging.join(&expected).is_file() {
        return Ok(expected);
    }

    let read = fs::read_dir(staging).map_err(|e| AssetError::io(staging, e))?;
    let mut candidates: Vec<String> = read
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| {
            Path::new(name)
                .extension()
                .is_some_and(|ext| ext == descriptor.extension())
        })
        .collect();

    match candidates.len() {
        1 => Ok(candidates.remove(0)),
        0 => Err(AssetError::parse(
            descriptor.archive_url(),
            format!("no .{} scene file at archive root", descriptor.extension()),
        )),
        _ => Err(AssetError::parse(
            descriptor.archive_url(),
            format!("ambiguous scene files: {}", candidates.join(", ")),
        )),
    }
}

/// Files under `dir`, relative, `/`-separated and sorted. A missing
/// directory has no files.
pub fn list_files(dir: &Path) -> AssetResult<Vec<String>> {
    let mut files = Vec::new();
    if dir.is_dir() {
        collect_files(dir, "", &mut files)?;
    }
    files.sort();
    Ok(files)
}

fn collect_files(dir: &Path, prefix: &str, out: &mut Vec<String>) -> AssetResult<()> {
    let read = fs::read_dir(dir).map_err(|e| AssetError::io(dir, e))?;
    for entry in read {
        let entry = entry.map_err(|e| AssetError::io(dir, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let relative = if prefix.is_empty() {
            name
        } else {
            format!("{}/{}", prefix, name)
        };
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, &relative, out)?;
        } else {
            out.push(relative);
        }
    }
    Ok(())
}

fn write_file(path: &Path, bytes: &[u8]) -> AssetResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| AssetError::io(parent, e))?;
    }
    fs::write(path, bytes).map_err(|e| AssetError::io(path, e))
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn verify_sha256(file: &str, bytes: &[u8], expected: &str) -> AssetResult<()> {
    let actual = sha256_hex(bytes);
    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(AssetError::ChecksumMismatch {
            file: file.to_string(),
            expected: expected.to_string(),
            actual,
        })
    }
}

/// Hash a file on disk.
pub fn file_sha256(path: &Path) -> AssetResult<String> {
    let mut file = fs::File::open(path).map_err(|e| AssetError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buffer).map_err(|e| AssetError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

fn is_relative_path(path: &str) -> bool {
    !path.is_empty() && Path::new(path).components().all(|c| matches!(c, Component::Normal(_)))
}
