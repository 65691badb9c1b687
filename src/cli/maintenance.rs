//! Store maintenance commands

use anyhow::Result;

use super::output::Output;
use crate::storage::{format_size, StorageManager};

pub fn rebuild_index(store: &StorageManager, output: &Output) -> Result<()> {
    let report = store.rebuild_index()?;

    if output.is_json() {
        output.data(&report);
        return Ok(());
    }

    output.success(&format!(
        "Rebuilt index: {} tags across {} shards",
        report.tags, report.shards
    ));
    for tag in &report.duplicates {
        println!("  warning: '{}' is stored in more than one shard", tag);
    }
    Ok(())
}

pub fn status(store: &StorageManager, output: &Output) -> Result<()> {
    let stats = store.stats()?;
    let config = store.config()?;

    if output.is_json() {
        output.data(&serde_json::json!({
            "storagePath": store.storage_path().display().to_string(),
            "config": config,
            "metadata": stats,
        }));
        return Ok(());
    }

    println!("Storage: {}", store.storage_path().display());
    if let Some(config) = &config {
        println!("Version: {}", config.version);
        println!("Max shard size: {}", config.max_shard_size);
    }
    println!("Entries: {}", stats.total_entries);
    println!("Shards: {}", stats.total_shards);
    if let Some(current) = stats.current_shard {
        println!("Current shard: {}", current);
    }

    if !stats.shards.is_empty() {
        println!();
        println!("{:<12} {:>8} {:>10}  STATUS", "SHARD", "ENTRIES", "SIZE");
        for (id, record) in &stats.shards {
            println!(
                "{:<12} {:>8} {:>10}  {:?}",
                id.to_string(),
                record.entries,
                format_size(record.size_bytes),
                record.status
            );
        }
    }
    Ok(())
}
