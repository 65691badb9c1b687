//! Context CLI commands

use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};

use anyhow::{bail, Result};
use chrono::{DateTime, Local, Utc};

use super::output::{categories_text, preview, Output};
use crate::domain::ContextEntry;
use crate::storage::StorageManager;

/// Splits a comma-separated category list, dropping empty items
pub fn parse_categories(raw: Option<&str>) -> Vec<String> {
    raw.map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn add(
    store: &StorageManager,
    output: &Output,
    tag: &str,
    content: &str,
    categories: Option<&str>,
) -> Result<()> {
    let categories = parse_categories(categories);
    output.verbose_ctx("add", &format!("Categories: {:?}", categories));

    store.add(tag, content, &categories)?;

    if output.is_json() {
        output.data(&serde_json::json!({ "added": tag }));
    } else {
        output.success(&format!("Added context '{}'", tag));
    }
    Ok(())
}

pub fn read(store: &StorageManager, output: &Output, tag: &str) -> Result<()> {
    let Some(entry) = store.read(tag)? else {
        bail!("Context '{}' not found", tag);
    };

    if output.is_json() {
        output.data(&BTreeMap::from([(tag, &entry)]));
    } else {
        println!("{}", entry.content);
    }
    Ok(())
}

pub fn update(
    store: &StorageManager,
    output: &Output,
    tag: &str,
    content: &str,
    categories: Option<&str>,
) -> Result<()> {
    let categories = parse_categories(categories);
    store.update(tag, content, &categories)?;

    if output.is_json() {
        output.data(&serde_json::json!({ "updated": tag }));
    } else {
        output.success(&format!("Updated context '{}'", tag));
    }
    Ok(())
}

pub fn remove(store: &StorageManager, output: &Output, tag: &str, force: bool) -> Result<()> {
    if !store.exists(tag)? {
        bail!("Context '{}' not found", tag);
    }

    if !force && !confirm(&format!("Are you sure you want to remove context '{}'? (y/N): ", tag))? {
        output.success("Removal cancelled");
        return Ok(());
    }

    if !store.remove(tag)? {
        bail!("Failed to remove context '{}'", tag);
    }

    if output.is_json() {
        output.data(&serde_json::json!({ "removed": tag }));
    } else {
        output.success(&format!("Removed context '{}'", tag));
    }
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{}", prompt);
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    let answer = answer.trim().to_lowercase();
    Ok(answer == "y" || answer == "yes")
}

pub fn list(store: &StorageManager, output: &Output, details: bool) -> Result<()> {
    if details {
        let contexts = store.get_all()?;
        if output.is_json() {
            output.data(&contexts);
            return Ok(());
        }

        println!("Found {} contexts:", contexts.len());
        println!();
        for (tag, entry) in &contexts {
            print_entry(tag, entry, 100, true);
        }
        return Ok(());
    }

    let tags = store.list()?;
    if output.is_json() {
        output.data(&tags);
    } else if tags.is_empty() {
        println!("No contexts found");
    } else {
        println!("Found {} contexts:", tags.len());
        for tag in &tags {
            println!("  {}", tag);
        }
    }
    Ok(())
}

pub fn search(store: &StorageManager, output: &Output, query: &str, fuzzy: bool) -> Result<()> {
    output.verbose_ctx("search", &format!("Query: {:?}, fuzzy: {}", query, fuzzy));

    let results = store.search(query, fuzzy)?;
    output.verbose_ctx("search", &format!("Found {} results", results.len()));

    if output.is_json() {
        output.data(&results);
    } else if results.is_empty() {
        println!("No contexts found matching '{}'", query);
    } else {
        println!("Found {} matching contexts:", results.len());
        println!();
        for result in &results {
            print_entry(&result.tag, &result.entry, 150, false);
            if let Some(score) = result.score {
                println!("Score: {:.3}", score);
            }
        }
    }
    Ok(())
}

fn print_entry(tag: &str, entry: &ContextEntry, max_content: usize, modified: bool) {
    println!("Tag: {}", tag);
    println!("Created: {}", format_timestamp(&entry.metadata.created));
    if modified {
        println!("Modified: {}", format_timestamp(&entry.metadata.modified));
    }
    println!("Categories: {}", categories_text(entry.categories()));
    println!("Content: {}", preview(&entry.content, max_content));
    println!("---");
}
