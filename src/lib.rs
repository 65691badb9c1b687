//! loccon - local context storage
//!
//! Stores tagged text snippets ("contexts") with categories and
//! timestamps in a directory of size-capped JSON shards, with a rebuildable
//! tag index and a cross-process lock that keeps concurrent writers from
//! losing each other's updates.

pub mod cli;
pub mod domain;
pub mod storage;

pub use domain::{ContextEntry, EntryMetadata, SearchResult, ShardId, ValidationError, Validator};
pub use storage::{StorageManager, StorageOptions, StoreError, StoreResult};
