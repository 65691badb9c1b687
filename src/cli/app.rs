//! Main CLI application structure

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use super::output::{Output, OutputFormat};
use super::{contexts, maintenance};
use crate::storage::{GlobalConfig, StorageManager, StorageOptions};

#[derive(Parser)]
#[command(name = "loccon")]
#[command(author, version, about = "Local context storage and management tool")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output format (defaults to the global config, then text)
    #[arg(long, short = 'f', global = true)]
    pub format: Option<OutputFormat>,

    /// Enable verbose output for debugging
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Storage directory (defaults to the nearest .loccon)
    #[arg(long, short = 's', global = true, env = "LOCCON_STORAGE_PATH")]
    pub storage_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Add a new context
    Add {
        /// Context tag
        tag: String,

        /// Context content
        content: String,

        /// Comma-separated categories
        #[arg(long, short)]
        categories: Option<String>,
    },

    /// Print a context
    Read {
        /// Context tag
        tag: String,
    },

    /// Replace the content and categories of a context
    Update {
        /// Context tag
        tag: String,

        /// New content
        content: String,

        /// Comma-separated categories
        #[arg(long, short)]
        categories: Option<String>,
    },

    /// Remove a context
    Remove {
        /// Context tag
        tag: String,

        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,
    },

    /// List all contexts
    List {
        /// Show content and metadata for every context
        #[arg(long, short)]
        details: bool,
    },

    /// Search contexts
    Search {
        /// Search query
        query: String,

        /// Tolerate typos and rank results by similarity
        #[arg(long)]
        fuzzy: bool,
    },

    /// Recompute the tag index from shard files
    RebuildIndex,

    /// Show storage statistics
    Status,
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_filter),
    )
    .format_timestamp(None)
    .try_init();
}

/// Main entry point for the CLI
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let global = GlobalConfig::load()?;
    let format = cli.format.unwrap_or_else(|| global.default_format.into());
    let output = Output::new(format, cli.verbose);

    let storage_path = global.resolve_storage_path(cli.storage_path.as_deref())?;
    output.verbose(&format!("Using storage at {}", storage_path.display()));

    let options = StorageOptions::default()
        .with_lock_timeout(global.lock_timeout())
        .with_max_shard_size(global.max_shard_size);
    let store = StorageManager::open(&storage_path, options)
        .with_context(|| format!("Failed to open storage at {}", storage_path.display()))?;

    match cli.command {
        Commands::Add {
            tag,
            content,
            categories,
        } => contexts::add(&store, &output, &tag, &content, categories.as_deref())?,
        Commands::Read { tag } => contexts::read(&store, &output, &tag)?,
        Commands::Update {
            tag,
            content,
            categories,
        } => contexts::update(&store, &output, &tag, &content, categories.as_deref())?,
        Commands::Remove { tag, force } => contexts::remove(&store, &output, &tag, force)?,
        Commands::List { details } => contexts::list(&store, &output, details)?,
        Commands::Search { query, fuzzy } => contexts::search(&store, &output, &query, fuzzy)?,
        Commands::RebuildIndex => maintenance::rebuild_index(&store, &output)?,
        Commands::Status => maintenance::status(&store, &output)?,
    }

    output.verbose("Command completed successfully");
    Ok(())
}
