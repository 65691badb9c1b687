//! # Storage Layer
//!
//! Sharded, file-backed persistence for context entries.
//!
//! ## Layout
//!
//! | Data | Format | Location |
//! |------|--------|----------|
//! | Store config | JSON | `<root>/config.json` |
//! | Tag index | JSON (rebuildable) | `<root>/index.json` |
//! | Shard bookkeeping | JSON | `<root>/metadata.json` |
//! | Entries | JSON, one document per shard | `<root>/shards/shard-NNN.json` |
//! | Writer lock | Process id marker | `<root>/.lock` |
//!
//! ## Concurrency Safety
//!
//! - Every mutation runs under a cross-process lock ([`StoreLock`])
//! - Stale locks left by dead processes are removed automatically
//! - All writes are atomic (temp file + rename)
//! - Reads take no lock
//!
//! ## Key Types
//!
//! - [`StorageManager`] - Entry point: add, read, update, remove, search
//! - [`ShardManager`] - Shard allocation, rotation and metadata
//! - [`IndexManager`] - Tag to shard index and its rebuild
//! - [`GlobalConfig`] - User-level defaults from `config.toml`

mod config;
mod error;
mod index;
mod lock;
mod manager;
mod root;
mod search;
mod shard;

pub use config::{
    find_storage_root, format_size, ConfigError, GlobalConfig, OutputFormat, StorageType,
    StoreConfig, DEFAULT_LOCK_TIMEOUT, STORE_VERSION,
};
pub use error::{StoreError, StoreResult};
pub use index::{IndexDocument, IndexManager, RebuildReport};
pub use lock::{
    is_process_running, LockGuard, LockStrategy, OsFileLock, PidFileLock, StoreLock, POLL_INTERVAL,
};
pub use manager::{StorageManager, StorageOptions, SEARCH_FIELDS};
pub use root::{serialized_len, StorageRoot, STORAGE_DIR_NAME};
pub use search::{
    EditDistanceMatcher, FuzzyMatch, FuzzyMatcher, FuzzyRecord, WeightedField, DEFAULT_THRESHOLD,
};
pub use shard::{
    GlobalMetadata, Shard, ShardManager, ShardRecord, ShardStatus, DEFAULT_MAX_SHARD_SIZE,
};
