//! Cache management CLI commands.

use clap::Subcommand;
use qranchor::asset::{clear_disk_cache, scan_entries};
use qranchor::config::format_size;

use super::asset_manager;
use crate::error::CliError;
use crate::runner::CliRunner;

/// Cache action subcommands.
#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Show disk cache statistics
    Stats,
    /// Clear the disk cache, removing all cached models
    Clear,
    /// Evict least recently used models until the cache fits its size limit
    Gc,
    /// Forget one model and delete its cached files
    #[command(alias = "purge")]
    Invalidate {
        /// Model key
        key: String,
    },
}

/// Run a cache subcommand.
pub fn run(runner: &CliRunner, action: CacheAction) -> Result<(), CliError> {
    let cache_dir = &runner.config().assets.directory;

    match action {
        CacheAction::Stats => {
            println!("Model cache: {}", cache_dir.display());

            let mut entries =
                scan_entries(cache_dir).map_err(|e| CliError::CacheStats(e.to_string()))?;
            entries.sort_by(|a, b| b.last_access.cmp(&a.last_access));
            let total: u64 = entries.iter().map(|e| e.size_bytes).sum();

            println!("  Models: {}", entries.len());
            println!(
                "  Size:   {} of {}",
                format_size(total),
                format_size(runner.config().assets.max_size)
            );
            for entry in &entries {
                println!("    {:<32} {:>12}", entry.key, format_size(entry.size_bytes));
            }
            Ok(())
        }
        CacheAction::Clear => {
            println!("Clearing model cache at: {}", cache_dir.display());

            match clear_disk_cache(cache_dir) {
                Ok(result) => {
                    println!(
                        "Deleted {} models, freed {}",
                        result.entries_removed,
                        format_size(result.bytes_freed)
                    );
                    Ok(())
                }
                Err(e) => Err(CliError::CacheClear(e.to_string())),
            }
        }
        CacheAction::Gc => {
            let manager = asset_manager(runner)?;
            let result = runner.block_on(manager.gc())??;

            println!(
                "Evicted {} models, freed {} ({} remaining)",
                result.entries_removed,
                format_size(result.bytes_freed),
                format_size(result.bytes_remaining)
            );
            for key in &result.evicted {
                println!("  {}", key);
            }
            Ok(())
        }
        CacheAction::Invalidate { key } => {
            let manager = asset_manager(runner)?;
            let freed = runner.block_on(manager.purge(&key))??;

            if freed == 0 {
                println!("'{}' is not cached", key);
            } else {
                println!("Removed '{}', freed {}", key, format_size(freed));
            }
            Ok(())
        }
    }
}
