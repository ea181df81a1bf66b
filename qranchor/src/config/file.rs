//! The INI configuration file.
//!
//! ```ini
//! [tracker]
//! coordinate_origin = top_left
//!
//! [binding]
//! removal_policy = stale
//! stale_frames = 30
//! infinite_plane = false
//! smoothing_window = 10
//!
//! [assets]
//! directory = ~/.qranchor/assets
//! base_url = https://models.example.com/ar
//! format = manifest
//! max_size = 500MB
//! concurrent = wait
//! max_attempts = 1
//! timeout_secs = 60
//! scene_extension = scn
//! resource_dir = textures
//!
//! [logging]
//! directory = ~/.qranchor/logs
//! level = info
//! ```
//!
//! Missing sections and keys take their defaults.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use ini::{Ini, Properties};

use super::size::parse_size;
use super::ConfigError;
use crate::asset::{
    default_asset_dir, BundleFormat, ConcurrentLoadPolicy, DEFAULT_FETCH_TIMEOUT,
    DEFAULT_MAX_CACHE_BYTES, DEFAULT_RESOURCE_DIR, DEFAULT_SCENE_EXTENSION,
};
use crate::anchor::DEFAULT_SMOOTHING_WINDOW;
use crate::binding::{RemovalPolicy, DEFAULT_STALE_FRAMES};
use crate::marker::CoordinateOrigin;

/// Name of the configuration directory under the home directory.
pub const CONFIG_DIR_NAME: &str = ".qranchor";

/// Name of the configuration file.
pub const CONFIG_FILE_NAME: &str = "config.ini";

/// `~/.qranchor`.
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
}

/// `~/.qranchor/config.ini`.
pub fn config_file_path() -> PathBuf {
    config_directory().join(CONFIG_FILE_NAME)
}

/// Expand a leading `~` to the home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix('~'), dirs::home_dir()) {
        (Some(rest), Some(home)) if rest.is_empty() || rest.starts_with('/') => {
            home.join(rest.trim_start_matches('/'))
        }
        _ => PathBuf::from(path),
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrackerSettings {
    pub coordinate_origin: CoordinateOrigin,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BindingSettings {
    pub removal_policy: RemovalPolicy,
    pub infinite_plane: bool,
    pub smoothing_window: usize,
}

impl Default for BindingSettings {
    fn default() -> Self {
        Self {
            removal_policy: RemovalPolicy::default(),
            infinite_plane: false,
            smoothing_window: DEFAULT_SMOOTHING_WINDOW,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssetSettings {
    pub directory: PathBuf,
    pub base_url: String,
    pub format: BundleFormat,
    pub max_size: u64,
    pub concurrent: ConcurrentLoadPolicy,
    pub max_attempts: u32,
    pub timeout_secs: u64,
    pub scene_extension: String,
    pub resource_dir: String,
}

impl Default for AssetSettings {
    fn default() -> Self {
        Self {
            directory: default_asset_dir(),
            base_url: String::new(),
            format: BundleFormat::default(),
            max_size: DEFAULT_MAX_CACHE_BYTES,
            concurrent: ConcurrentLoadPolicy::default(),
            max_attempts: 1,
            timeout_secs: DEFAULT_FETCH_TIMEOUT.as_secs(),
            scene_extension: DEFAULT_SCENE_EXTENSION.to_string(),
            resource_dir: DEFAULT_RESOURCE_DIR.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoggingSettings {
    /// Directory for daily log files. Console only when unset.
    pub directory: Option<PathBuf>,
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            directory: None,
            level: "info".to_string(),
        }
    }
}

/// Parsed configuration file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConfigFile {
    pub tracker: TrackerSettings,
    pub binding: BindingSettings,
    pub assets: AssetSettings,
    pub logging: LoggingSettings,
}

impl ConfigFile {
    /// Load from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&config_file_path())
    }

    /// Load from `path`. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_ini(&ini)
    }

    /// Parse from INI text.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(text).map_err(|e| ConfigError::Parse {
            path: PathBuf::from("<string>"),
            reason: e.to_string(),
        })?;
        Self::from_ini(&ini)
    }

    pub fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(section) = ini.section(Some("tracker")) {
            let s = Section::new("tracker", section);
            if let Some(origin) = s.parsed::<CoordinateOrigin>("coordinate_origin")? {
                config.tracker.coordinate_origin = origin;
            }
        }

        if let Some(section) = ini.section(Some("binding")) {
            let s = Section::new("binding", section);
            let frames = s.parsed::<u64>("stale_frames")?.unwrap_or(DEFAULT_STALE_FRAMES);
            match s.get("removal_policy") {
                Some(name) => {
                    config.binding.removal_policy = RemovalPolicy::from_name(name, frames)
                        .map_err(|reason| s.invalid("removal_policy", name, reason))?;
                }
                None => {
                    config.binding.removal_policy = RemovalPolicy::Stale { frames };
                }
            }
            if let Some(v) = s.parsed::<bool>("infinite_plane")? {
                config.binding.infinite_plane = v;
            }
            if let Some(v) = s.parsed::<usize>("smoothing_window")? {
                config.binding.smoothing_window = v;
            }
        }

        if let Some(section) = ini.section(Some("assets")) {
            let s = Section::new("assets", section);
            let assets = &mut config.assets;
            if let Some(v) = s.get("directory") {
                assets.directory = expand_tilde(v);
            }
            if let Some(v) = s.get("base_url") {
                assets.base_url = v.trim_end_matches('/').to_string();
            }
            if let Some(v) = s.parsed::<BundleFormat>("format")? {
                assets.format = v;
            }
            if let Some(v) = s.get("max_size") {
                assets.max_size =
                    parse_size(v).map_err(|e| s.invalid("max_size", v, e.to_string()))?;
            }
            if let Some(v) = s.parsed::<ConcurrentLoadPolicy>("concurrent")? {
                assets.concurrent = v;
            }
            if let Some(v) = s.parsed::<u32>("max_attempts")? {
                if v == 0 {
                    return Err(s.invalid("max_attempts", "0", "must be at least 1"));
                }
                assets.max_attempts = v;
            }
            if let Some(v) = s.parsed::<u64>("timeout_secs")? {
                assets.timeout_secs = v;
            }
            if let Some(v) = s.get("scene_extension") {
                assets.scene_extension = v.trim_start_matches('.').to_string();
            }
            if let Some(v) = s.get("resource_dir") {
                assets.resource_dir = v.to_string();
            }
        }

        if let Some(section) = ini.section(Some("logging")) {
            let s = Section::new("logging", section);
            if let Some(v) = s.get("directory") {
                config.logging.directory = Some(expand_tilde(v));
            }
            if let Some(v) = s.get("level") {
                config.logging.level = v.to_string();
            }
        }

        Ok(config)
    }

    pub fn to_ini(&self) -> Ini {
        let mut ini = Ini::new();
        ini.with_section(Some("tracker"))
            .set("coordinate_origin", self.tracker.coordinate_origin.to_string());

        let frames = match self.binding.removal_policy {
            RemovalPolicy::Stale { frames } => frames,
            _ => DEFAULT_STALE_FRAMES,
        };
        ini.with_section(Some("binding"))
            .set("removal_policy", self.binding.removal_policy.name())
            .set("stale_frames", frames.to_string())
            .set("infinite_plane", self.binding.infinite_plane.to_string())
            .set("smoothing_window", self.binding.smoothing_window.to_string());

        let a = &self.assets;
        ini.with_section(Some("assets"))
            .set("directory", a.directory.display().to_string())
            .set("base_url", a.base_url.as_str())
            .set("format", a.format.to_string())
            .set("max_size", a.max_size.to_string())
            .set("concurrent", a.concurrent.to_string())
            .set("max_attempts", a.max_attempts.to_string())
            .set("timeout_secs", a.timeout_secs.to_string())
            .set("scene_extension", a.scene_extension.as_str())
            .set("resource_dir", a.resource_dir.as_str());

        let mut logging = ini.with_section(Some("logging"));
        logging.set("level", self.logging.level.as_str());
        if let Some(dir) = &self.logging.directory {
            logging.set("directory", dir.display().to_string());
        }
        ini
    }

    /// Render as INI text.
    pub fn to_ini_string(&self) -> String {
        let mut buf = Vec::new();
        // Writing to a Vec cannot fail.
        let _ = self.to_ini().write_to(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Write to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        self.to_ini()
            .write_to_file(path)
            .map_err(|e| ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })
    }
}

/// Typed access to one INI section.
struct Section<'a> {
    name: &'static str,
    props: &'a Properties,
}

impl<'a> Section<'a> {
    fn new(name: &'static str, props: &'a Properties) -> Self {
        Self { name, props }
    }

    /// Non-empty trimmed value.
    fn get(&self, key: &str) -> Option<&'a str> {
        self.props.get(key).map(str::trim).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: ToString,
    {
        match self.get(key) {
            Some(value) => value
                .parse::<T>()
                .map(Some)
                .map_err(|e| self.invalid(key, value, e.to_string())),
            None => Ok(None),
        }
    }

    fn invalid(&self, key: &str, value: &str, reason: impl Into<String>) -> ConfigError {
        ConfigError::InvalidValue {
            section: self.name.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = ConfigFile::load_from(&tmp.path().join("none.ini")).unwrap();
        assert_eq!(config, ConfigFile::default());
    }

    #[test]
    fn test_parse_all_sections() {
        let config = ConfigFile::parse(
            r#"
[tracker]
coordinate_origin = bottom_left

[binding]
removal_policy = stale
stale_frames = 5
infinite_plane = true
smoothing_window = 3

[assets]
directory = /var/cache/qr
base_url = http://models.local/ar/
format = archive
max_size = 2GB
concurrent = reject
max_attempts = 3
timeout_secs = 10
scene_extension = .usdz
resource_dir = art

[logging]
directory = /var/log/qr
level = debug
"#,
        )
        .unwrap();

        assert_eq!(config.tracker.coordinate_origin, CoordinateOrigin::BottomLeft);
        assert_eq!(config.binding.removal_policy, RemovalPolicy::Stale { frames: 5 });
        assert!(config.binding.infinite_plane);
        assert_eq!(config.binding.smoothing_window, 3);
        assert_eq!(config.assets.directory, PathBuf::from("/var/cache/qr"));
        assert_eq!(config.assets.base_url, "http://models.local/ar");
        assert_eq!(config.assets.format, BundleFormat::Archive);
        assert_eq!(config.assets.max_size, 2 * 1024 * 1024 * 1024);
        assert_eq!(config.assets.concurrent, ConcurrentLoadPolicy::Reject);
        assert_eq!(config.assets.max_attempts, 3);
        assert_eq!(config.assets.scene_extension, "usdz");
        assert_eq!(config.logging.directory, Some(PathBuf::from("/var/log/qr")));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_stale_frames_alone_keeps_stale_policy() {
        let config = ConfigFile::parse("[binding]\nstale_frames = 7\n").unwrap();
        assert_eq!(config.binding.removal_policy, RemovalPolicy::Stale { frames: 7 });
    }

    #[test]
    fn test_invalid_values_are_reported() {
        let err = ConfigFile::parse("[binding]\nremoval_policy = sometimes\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "removal_policy"));

        let err = ConfigFile::parse("[assets]\nmax_size = huge\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "max_size"));

        assert!(ConfigFile::parse("[assets]\nmax_attempts = 0\n").is_err());
        assert!(ConfigFile::parse("[binding]\ninfinite_plane = maybe\n").is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join(CONFIG_FILE_NAME);

        let mut config = ConfigFile::default();
        config.binding.removal_policy = RemovalPolicy::Immediate;
        config.assets.base_url = "http://m".to_string();
        config.assets.max_size = 64 * 1024 * 1024;
        config.save_to(&path).unwrap();

        let loaded = ConfigFile::load_from(&path).unwrap();
        assert_eq!(loaded.binding.removal_policy, RemovalPolicy::Immediate);
        assert_eq!(loaded.assets.base_url, "http://m");
        assert_eq!(loaded.assets.max_size, 64 * 1024 * 1024);
        assert!(config.to_ini_string().contains("[assets]"));
    }

    #[test]
    fn test_expand_tilde() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand_tilde("~/x"), home.join("x"));
        assert_eq!(expand_tilde("/abs"), PathBuf::from("/abs"));
        assert_eq!(expand_tilde("~user/x"), PathBuf::from("~user/x"));
    }
}
