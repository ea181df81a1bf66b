//! Per-key load state.
//!
//! ```text
//!               begin                 finish(Ok)
//!   (absent) ─────────► Loading ─────────────────► Loaded
//!      ▲                   │  ▲
//!      │                   │  │ begin, attempts < max
//!      │   invalidate      ▼  │
//!      └──────────────── Failed { attempts }
//! ```
//!
//! A `Failed` entry short-circuits only once it has reached the configured
//! number of attempts; before that it remembers the count and lets the next
//! request retry.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tokio::sync::oneshot;

use super::error::{AssetError, AssetResult};
use super::store::LoadedAsset;

/// Shared result of one load.
pub type LoadResult = AssetResult<Arc<LoadedAsset>>;

/// What a request for a key that is already loading does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConcurrentLoadPolicy {
    /// Fail with [`AssetError::AlreadyLoading`].
    Reject,
    /// Wait for the in-flight load and share its result.
    #[default]
    Wait,
}

impl FromStr for ConcurrentLoadPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "wait" => Ok(Self::Wait),
            other => Err(format!(
                "unknown concurrent load policy '{}' (expected reject or wait)",
                other
            )),
        }
    }
}

impl fmt::Display for ConcurrentLoadPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reject => write!(f, "reject"),
            Self::Wait => write!(f, "wait"),
        }
    }
}

/// State of one key.
#[derive(Debug)]
pub enum DownloadState {
    Loading {
        waiters: Vec<oneshot::Sender<LoadResult>>,
        /// Failures before this attempt.
        prior_failures: u32,
    },
    Loaded(Arc<LoadedAsset>),
    Failed { error: AssetError, attempts: u32 },
}

impl DownloadState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Loading { .. } => "loading",
            Self::Loaded(_) => "loaded",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Decision for a new request.
#[derive(Debug)]
pub enum Begin {
    /// Served from memory.
    Hit(Arc<LoadedAsset>),
    /// The caller must perform the load and report it with
    /// [`AssetStateTable::finish`].
    Load,
    /// Another caller is loading; await its result.
    Wait(oneshot::Receiver<LoadResult>),
    Rejected(AssetError),
}

/// Number of keys in each state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateCounts {
    pub loading: usize,
    pub loaded: usize,
    pub failed: usize,
}

/// All per-key states. Not synchronized; the manager wraps it in a mutex.
#[derive(Debug, Default)]
pub struct AssetStateTable {
    entries: HashMap<String, DownloadState>,
}

impl AssetStateTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&DownloadState> {
        self.entries.get(key)
    }

    /// Decide how to serve a request for `key`.
    ///
    /// `still_valid` re-checks a loaded entry; entries that fail it are
    /// dropped and reloaded.
    pub fn begin<V>(
        &mut self,
        key: &str,
        policy: ConcurrentLoadPolicy,
        max_attempts: u32,
        still_valid: V,
    ) -> Begin
    where
        V: FnOnce(&LoadedAsset) -> bool,
    {
        let prior_failures = match self.entries.get_mut(key) {
            None => 0,
            Some(DownloadState::Loaded(asset)) => {
                if still_valid(asset) {
                    return Begin::Hit(Arc::clone(asset));
                }
                0
            }
            Some(DownloadState::Loading { waiters, .. }) => {
                return match policy {
                    ConcurrentLoadPolicy::Reject => Begin::Rejected(AssetError::AlreadyLoading {
                        key: key.to_string(),
                    }),
                    ConcurrentLoadPolicy::Wait => {
                        let (tx, rx) = oneshot::channel();
                        waiters.push(tx);
                        Begin::Wait(rx)
                    }
                };
            }
            Some(DownloadState::Failed { attempts, .. }) => {
                if *attempts >= max_attempts.max(1) {
                    return Begin::Rejected(AssetError::InvalidAsset {
                        key: key.to_string(),
                        attempts: *attempts,
                    });
                }
                *attempts
            }
        };

        self.entries.insert(
            key.to_string(),
            DownloadState::Loading {
                waiters: Vec::new(),
                prior_failures,
            },
        );
        Begin::Load
    }

    /// Record the outcome of a load started by [`begin`](Self::begin) and
    /// wake its waiters. Returns the number of waiters notified.
    pub fn finish(&mut self, key: &str, result: &LoadResult) -> usize {
        let (waiters, prior_failures) = match self.entries.remove(key) {
            Some(DownloadState::Loading {
                waiters,
                prior_failures,
            }) => (waiters, prior_failures),
            Some(other) => {
                // Not loading (e.g. invalidated meanwhile); keep what is there.
                self.entries.insert(key.to_string(), other);
                (Vec::new(), 0)
            }
            None => (Vec::new(), 0),
        };

        let next = match result {
            Ok(asset) => DownloadState::Loaded(Arc::clone(asset)),
            Err(error) => DownloadState::Failed {
                error: error.clone(),
                attempts: prior_failures + 1,
            },
        };
        self.entries.entry(key.to_string()).or_insert(next);

        let notified = waiters.len();
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
        notified
    }

    /// Forget a loaded or failed key. Loading keys are left alone.
    pub fn invalidate(&mut self, key: &str) -> bool {
        match self.entries.get(key) {
            Some(DownloadState::Loading { .. }) | None => false,
            Some(_) => {
                self.entries.remove(key);
                true
            }
        }
    }

    /// Drop in-memory handles for keys whose files were evicted.
    pub fn forget_loaded<'a>(&mut self, keys: impl IntoIterator<Item = &'a String>) {
        for key in keys {
            if let Some(DownloadState::Loaded(_)) = self.entries.get(key.as_str()) {
                self.entries.remove(key.as_str());
            }
        }
    }

    pub fn is_loading(&self, key: &str) -> bool {
        matches!(self.entries.get(key), Some(DownloadState::Loading { .. }))
    }

    pub fn counts(&self) -> StateCounts {
        let mut counts = StateCounts::default();
        for state in self.entries.values() {
            match state {
                DownloadState::Loading { .. } => counts.loading += 1,
                DownloadState::Loaded(_) => counts.loaded += 1,
                DownloadState::Failed { .. } => counts.failed += 1,
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn asset(key: &str) -> Arc<LoadedAsset> {
        Arc::new(LoadedAsset {
            key: key.to_string(),
            directory: PathBuf::from("/cache").join(key),
            scene_path: PathBuf::from("/cache").join(key).join("scene.scn"),
            resources: Vec::new(),
            size_bytes: 1,
        })
    }

    fn network_error() -> AssetError {
        AssetError::Network {
            url: "http://x".into(),
            reason: "refused".into(),
        }
    }

    #[test]
    fn test_load_then_hit() {
        let mut table = AssetStateTable::new();
        assert!(matches!(table.begin("a", ConcurrentLoadPolicy::Wait, 1, |_| true), Begin::Load));
        assert!(table.is_loading("a"));

        table.finish("a", &Ok(asset("a")));
        assert!(matches!(table.begin("a", ConcurrentLoadPolicy::Wait, 1, |_| true), Begin::Hit(_)));
    }

    #[test]
    fn test_invalid_loaded_entry_reloads() {
        let mut table = AssetStateTable::new();
        table.begin("a", ConcurrentLoadPolicy::Wait, 1, |_| true);
        table.finish("a", &Ok(asset("a")));
        assert!(matches!(table.begin("a", ConcurrentLoadPolicy::Wait, 1, |_| false), Begin::Load));
    }

    #[test]
    fn test_reject_while_loading() {
        let mut table = AssetStateTable::new();
        table.begin("a", ConcurrentLoadPolicy::Reject, 1, |_| true);
        match table.begin("a", ConcurrentLoadPolicy::Reject, 1, |_| true) {
            Begin::Rejected(AssetError::AlreadyLoading { key }) => assert_eq!(key, "a"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_waiters_receive_result() {
        let mut table = AssetStateTable::new();
        table.begin("a", ConcurrentLoadPolicy::Wait, 1, |_| true);
        let Begin::Wait(rx1) = table.begin("a", ConcurrentLoadPolicy::Wait, 1, |_| true) else {
            panic!("expected wait");
        };
        let Begin::Wait(rx2) = table.begin("a", ConcurrentLoadPolicy::Wait, 1, |_| true) else {
            panic!("expected wait");
        };

        assert_eq!(table.finish("a", &Ok(asset("a"))), 2);
        assert_eq!(rx1.await.unwrap().unwrap().key, "a");
        assert_eq!(rx2.await.unwrap().unwrap().key, "a");
    }

    #[test]
    fn test_negative_cache_after_max_attempts() {
        let mut table = AssetStateTable::new();

        table.begin("a", ConcurrentLoadPolicy::Wait, 2, |_| true);
        table.finish("a", &Err(network_error()));
        // One failure of two allowed: retry.
        assert!(matches!(table.begin("a", ConcurrentLoadPolicy::Wait, 2, |_| true), Begin::Load));
        table.finish("a", &Err(network_error()));

        match table.begin("a", ConcurrentLoadPolicy::Wait, 2, |_| true) {
            Begin::Rejected(AssetError::InvalidAsset { attempts, .. }) => assert_eq!(attempts, 2),
            other => panic!("unexpected {:?}", other),
        }

        assert!(table.invalidate("a"));
        assert!(matches!(table.begin("a", ConcurrentLoadPolicy::Wait, 2, |_| true), Begin::Load));
    }

    #[test]
    fn test_invalidate_ignores_loading() {
        let mut table = AssetStateTable::new();
        table.begin("a", ConcurrentLoadPolicy::Wait, 1, |_| true);
        assert!(!table.invalidate("a"));
        assert!(!table.invalidate("missing"));
    }

    #[test]
    fn test_forget_loaded_and_counts() {
        let mut table = AssetStateTable::new();
        for key in ["a", "b"] {
            table.begin(key, ConcurrentLoadPolicy::Wait, 1, |_| true);
            table.finish(key, &Ok(asset(key)));
        }
        table.begin("c", ConcurrentLoadPolicy::Wait, 1, |_| true);

        table.forget_loaded(&["a".to_string(), "c".to_string()]);
        assert_eq!(
            table.counts(),
            StateCounts {
                loading: 1,
                loaded: 1,
                failed: 0
            }
        );
    }
}
