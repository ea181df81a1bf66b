//! CLI subcommands.

pub mod cache;
pub mod config;
pub mod fetch;
pub mod replay;

use qranchor::app::AppConfig;
use qranchor::asset::AssetCacheManager;

use crate::error::CliError;
use crate::runner::CliRunner;

/// An HTTP-backed asset cache configured from the loaded config file.
fn asset_manager(runner: &CliRunner) -> Result<AssetCacheManager, CliError> {
    let config = AppConfig::from_config_file(runner.config());
    Ok(AssetCacheManager::with_http(config.assets)?)
}
