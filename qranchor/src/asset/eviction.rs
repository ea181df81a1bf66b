//! Disk accounting and least-recently-used eviction.
//!
//! Eviction works on whole cache entries. An entry's last access is the
//! newest access time of any file inside it.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime};

use serde::Serialize;
use tracing::{debug, info, warn};

use super::store::STAGING_DIR;

/// Outcome of an eviction or clear pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GcResult {
    pub entries_removed: usize,
    pub bytes_freed: u64,
    /// Bytes still in use afterwards.
    pub bytes_remaining: u64,
    pub duration_ms: u64,
    /// Keys removed, oldest first.
    pub evicted: Vec<String>,
}

impl fmt::Display for GcResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GC: removed {} entries, freed {} bytes in {}ms ({} bytes remaining)",
            self.entries_removed, self.bytes_freed, self.duration_ms, self.bytes_remaining
        )
    }
}

/// One cache entry on disk.
#[derive(Debug, Clone)]
pub struct DiskEntry {
    pub key: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub last_access: SystemTime,
}

/// Total size of the files under `path`.
pub fn dir_size(path: &Path) -> io::Result<u64> {
    let mut total = 0;
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        total += if meta.is_dir() {
            dir_size(&entry.path())?
        } else {
            meta.len()
        };
    }
    Ok(total)
}

/// Newest file access time under `path`. Directory access times are
/// ignored since scanning updates them. Falls back to the directory's
/// modification time when it holds no files.
fn newest_access(path: &Path) -> io::Result<SystemTime> {
    match newest_file_access(path)? {
        Some(accessed) => Ok(accessed),
        None => fs::metadata(path)?.modified(),
    }
}

fn newest_file_access(path: &Path) -> io::Result<Option<SystemTime>> {
    let mut newest = None;
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        let accessed = if meta.is_dir() {
            newest_file_access(&entry.path())?
        } else {
            Some(meta.accessed()?)
        };
        newest = newest.max(accessed);
    }
    Ok(newest)
}

/// Every entry directory under `root`. Staging and other hidden
/// directories are skipped. A missing root has no entries.
pub fn scan_entries(root: &Path) -> io::Result<Vec<DiskEntry>> {
    let read = match fs::read_dir(root) {
        Ok(read) => read,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut entries = Vec::new();
    for entry in read {
        let entry = entry?;
        let key = entry.file_name().to_string_lossy().into_owned();
        if key.starts_with('.') || !entry.file_type()?.is_dir() {
            continue;
        }
        let path = entry.path();
        entries.push(DiskEntry {
            key,
            size_bytes: dir_size(&path)?,
            last_access: newest_access(&path)?,
            path,
        });
    }
    Ok(entries)
}

/// Bytes used by cache entries under `root`, excluding staging.
pub fn disk_usage(root: &Path) -> io::Result<u64> {
    Ok(scan_entries(root)?.iter().map(|e| e.size_bytes).sum())
}

/// Delete least-recently-accessed entries until usage is at most `budget`.
///
/// Entries for which `protected` returns true are never removed. Stops early
/// if only protected entries remain.
pub fn evict_to_budget<P>(root: &Path, budget: u64, protected: P) -> io::Result<GcResult>
where
    P: Fn(&str) -> bool,
{
    let start = Instant::now();
    let mut entries = scan_entries(root)?;
    let mut usage: u64 = entries.iter().map(|e| e.size_bytes).sum();
    let mut result = GcResult::default();

    if usage > budget {
        entries.sort_by(|a, b| a.last_access.cmp(&b.last_access).then_with(|| a.key.cmp(&b.key)));

        for entry in entries {
            if usage <= budget {
                break;
            }
            if protected(&entry.key) {
                debug!(key = %entry.key, "Skipping protected entry");
                continue;
            }
            match fs::remove_dir_all(&entry.path) {
                Ok(()) => {
                    usage = usage.saturating_sub(entry.size_bytes);
                    result.entries_removed += 1;
                    result.bytes_freed += entry.size_bytes;
                    debug!(key = %entry.key, bytes = entry.size_bytes, "Evicted cache entry");
                    result.evicted.push(entry.key);
                }
                Err(e) => {
                    warn!(key = %entry.key, error = %e, "Failed to evict cache entry");
                }
            }
        }

        if usage > budget {
            warn!(usage, budget, "Cache still over budget after eviction");
        }
    }

    result.bytes_remaining = usage;
    result.duration_ms = start.elapsed().as_millis() as u64;
    if result.entries_removed > 0 {
        info!(
            entries = result.entries_removed,
            bytes = result.bytes_freed,
            remaining = usage,
            "Cache eviction complete"
        );
    }
    Ok(result)
}

/// Delete every entry and any leftover staging data under `root`.
pub fn clear_disk_cache(root: &Path) -> io::Result<GcResult> {
    let start = Instant::now();
    let mut result = GcResult::default();

    for entry in scan_entries(root)? {
        fs::remove_dir_all(&entry.path)?;
        result.entries_removed += 1;
        result.bytes_freed += entry.size_bytes;
        result.evicted.push(entry.key);
    }

    let staging = root.join(STAGING_DIR);
    if staging.exists() {
        result.bytes_freed += dir_size(&staging).unwrap_or(0);
        fs::remove_dir_all(&staging)?;
    }

    result.duration_ms = start.elapsed().as_millis() as u64;
    Ok(result)
}
