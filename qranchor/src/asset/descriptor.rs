//! Model descriptors derived from marker payloads.

use std::fmt;

use serde::Serialize;

use super::error::{AssetError, AssetResult};

const ARCHIVE_SUFFIX: &str = ".tar.gz";

/// Where a model lives and what its scene file is called.
///
/// The key doubles as the on-disk directory name, so it is restricted to
/// ASCII alphanumerics plus `.`, `_` and `-`, and must start alphanumeric.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ModelDescriptor {
    key: String,
    extension: String,
    base_url: String,
}

impl ModelDescriptor {
    pub fn new(
        key: impl Into<String>,
        extension: impl Into<String>,
        base_url: impl Into<String>,
    ) -> AssetResult<Self> {
        let key = key.into();
        validate_key(&key)?;
        let extension = extension.into().trim_start_matches('.').to_string();
        Ok(Self {
            key,
            extension,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Interpret a marker payload.
    ///
    /// A URL payload names the model by its last path segment (an extension
    /// there overrides `default_extension`) and its parent becomes the base
    /// URL. Anything else is a plain key under `default_base`.
    pub fn from_payload(
        payload: &str,
        default_base: &str,
        default_extension: &str,
    ) -> AssetResult<Self> {
        let payload = payload.trim();
        if !is_url(payload) {
            return Self::new(payload, default_extension, default_base);
        }

        let without_query = payload
            .split(['?', '#'])
            .next()
            .unwrap_or(payload)
            .trim_end_matches('/');
        let scheme_end = without_query.find("://").map(|i| i + 3).unwrap_or(0);

        let (base, segment) = match without_query.rsplit_once('/') {
            Some((base, segment)) if base.len() >= scheme_end => (base, segment),
            _ => return Err(AssetError::InvalidKey(payload.to_string())),
        };

        let (key, extension) = if let Some(stem) = segment.strip_suffix(ARCHIVE_SUFFIX) {
            (stem, default_extension)
        } else {
            match segment.rsplit_once('.') {
                Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => (stem, ext),
                _ => (segment, default_extension),
            }
        };

        Self::new(key, extension, base)
    }

    /// Cache key and directory name.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Name of the scene file inside the cache entry.
    pub fn scene_file_name(&self) -> String {
        format!("{}.{}", self.key, self.extension)
    }

    pub fn manifest_url(&self) -> String {
        self.file_url("manifest.json")
    }

    /// URL of a file at the root of the remote bundle.
    pub fn file_url(&self, name: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.key, name)
    }

    pub fn resource_url(&self, resource_dir: &str, name: &str) -> String {
        format!("{}/{}/{}/{}", self.base_url, self.key, resource_dir, name)
    }

    pub fn archive_url(&self) -> String {
        format!("{}/{}{}", self.base_url, self.key, ARCHIVE_SUFFIX)
    }
}

impl fmt::Display for ModelDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)
    }
}

fn is_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Check a model key.
pub fn validate_key(key: &str) -> AssetResult<()> {
    let mut chars = key.chars();
    let valid = match chars.next() {
        Some(first) => {
            first.is_ascii_alphanumeric()
                && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(AssetError::InvalidKey(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://models.example.com/ar";

    #[test]
    fn test_plain_name() {
        let d = ModelDescriptor::from_payload("cup", BASE, "scn").unwrap();
        assert_eq!(d.key(), "cup");
        assert_eq!(d.extension(), "scn");
        assert_eq!(d.scene_file_name(), "cup.scn");
        assert_eq!(d.manifest_url(), "https://models.example.com/ar/cup/manifest.json");
        assert_eq!(d.resource_url("art", "tex.png"), "https://models.example.com/ar/cup/art/tex.png");
        assert_eq!(d.archive_url(), "https://models.example.com/ar/cup.tar.gz");
    }

    #[test]
    fn test_url_payload_with_extension() {
        let d = ModelDescriptor::from_payload("https://cdn.example.org/models/jet.usdz?v=2", BASE, "scn")
            .unwrap();
        assert_eq!(d.key(), "jet");
        assert_eq!(d.extension(), "usdz");
        assert_eq!(d.base_url(), "https://cdn.example.org/models");
    }

    #[test]
    fn test_url_payload_archive_and_bare() {
        let d = ModelDescriptor::from_payload("http://h/m/lamp.tar.gz", BASE, "scn").unwrap();
        assert_eq!(d.key(), "lamp");
        assert_eq!(d.extension(), "scn");

        let d = ModelDescriptor::from_payload("http://h/m/lamp/", BASE, "scn").unwrap();
        assert_eq!(d.key(), "lamp");
        assert_eq!(d.base_url(), "http://h/m");
    }

    #[test]
    fn test_url_without_path_rejected() {
        assert!(ModelDescriptor::from_payload("https://host", BASE, "scn").is_err());
    }

    #[test]
    fn test_key_validation() {
        assert!(validate_key("ship_2.v1-final").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key(".hidden").is_err());
        assert!(validate_key("../etc").is_err());
        assert!(validate_key("a/b").is_err());
        assert!(validate_key("with space").is_err());
    }
}
