//! Fetch command - resolve one model into the cache.

use qranchor::config::format_size;

use super::asset_manager;
use crate::error::CliError;
use crate::runner::CliRunner;

pub fn run(runner: &CliRunner, payload: &str) -> Result<(), CliError> {
    let manager = asset_manager(runner)?;
    let descriptor = manager.descriptor(payload)?;
    println!("Resolving '{}'", descriptor.key());

    let asset = runner.block_on(manager.resolve_descriptor(descriptor))??;
    let stats = manager.stats();

    println!("  Scene:     {}", asset.scene_path.display());
    println!("  Resources: {}", asset.resources.len());
    println!("  Size:      {}", format_size(asset.size_bytes));
    println!(
        "  Source:    {}",
        if stats.downloads > 0 { "downloaded" } else { "disk cache" }
    );
    Ok(())
}
