//! Cache command - checksum cache access for plugin hooks
//!
//! Output is kept machine-friendly: `get` and `checksum` print a bare value
//! and `check` communicates only through its exit status.

use super::Settings;
use crate::cache::{checksum_file, checksum_paths, Cache, CacheEntry};
use crate::cli::args::{CacheAction, CacheArgs, OutputFormat};
use crate::error::{KeelError, KeelResult};
use crate::store::Store;
use crate::ui::{self, UiContext};
use console::style;
use std::path::PathBuf;

/// Execute the cache command
pub async fn execute(args: CacheArgs, settings: &Settings) -> KeelResult<()> {
    if let CacheAction::Checksum { paths } = &args.action {
        println!("{}", checksum_of(paths)?);
        return Ok(());
    }

    let cache = Cache::new(Store::open(settings.paths.db_path()?)?);

    match args.action {
        CacheAction::Get { key } => {
            let checksum = cache.get(&key)?.ok_or(KeelError::CacheMiss(key))?;
            println!("{checksum}");
        }
        CacheAction::Set { key, checksum } => cache.set(&key, &checksum)?,
        CacheAction::Check { key, checksum } => {
            if !cache.is_fresh(&key, &checksum)? {
                return Err(KeelError::CacheStale(key));
            }
        }
        CacheAction::Remove { key } => {
            if !cache.remove(&key)? {
                return Err(KeelError::CacheMiss(key));
            }
        }
        CacheAction::List { format } => list(&cache.list()?, format)?,
        CacheAction::Checksum { .. } => {}
    }

    Ok(())
}

/// A single file hashes to its plain content checksum so the value matches
/// `sha256sum`; several files hash to a combined checksum.
fn checksum_of(paths: &[PathBuf]) -> KeelResult<String> {
    match paths {
        [single] => checksum_file(single),
        many => checksum_paths(many),
    }
}

fn list(entries: &[CacheEntry], format: OutputFormat) -> KeelResult<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(entries)?),
        OutputFormat::Plain => {
            for entry in entries {
                println!("{}\t{}", entry.key, entry.checksum);
            }
        }
        OutputFormat::Table => {
            let ctx = UiContext::detect();
            if entries.is_empty() {
                ui::step_info(&ctx, "Cache is empty");
                return Ok(());
            }

            ui::section(&ctx, "Cache");
            println!(
                "{:<32} {:<16} {:<26}",
                style("KEY").bold(),
                style("CHECKSUM").bold(),
                style("UPDATED").bold()
            );
            println!("{}", "-".repeat(76));
            for entry in entries {
                let short = entry.checksum.get(..16).unwrap_or(&entry.checksum);
                println!("{:<32} {:<16} {:<26}", entry.key, short, entry.updated_at);
            }
        }
    }
    Ok(())
}
