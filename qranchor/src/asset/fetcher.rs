//! Byte fetching for asset bundles.

use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::Client;
use tracing::debug;

use super::error::{AssetError, AssetResult};

/// Default timeout for one HTTP request.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Fetches the bytes behind a URL. Blocking; called from the blocking pool.
pub trait AssetFetcher: Send + Sync + 'static {
    fn fetch(&self, url: &str) -> AssetResult<Vec<u8>>;
}

impl<T: AssetFetcher + ?Sized> AssetFetcher for Arc<T> {
    fn fetch(&self, url: &str) -> AssetResult<Vec<u8>> {
        (**self).fetch(url)
    }
}

/// [`AssetFetcher`] over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> AssetResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("qranchor/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AssetError::Network {
                url: String::new(),
                reason: format!("failed to create HTTP client: {}", e),
            })?;
        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl AssetFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> AssetResult<Vec<u8>> {
        let network = |reason: String| AssetError::Network {
            url: url.to_string(),
            reason,
        };

        let response = self.client.get(url).send().map_err(|e| {
            if e.is_timeout() {
                network(format!("timed out after {}s", self.timeout.as_secs()))
            } else {
                network(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(network(format!("HTTP {}", status)));
        }

        let bytes = response.bytes().map_err(|e| network(e.to_string()))?;
        debug!(url, bytes = bytes.len(), "Fetched");
        Ok(bytes.to_vec())
    }
}
