//! Tag to shard index
//!
//! `index.json` maps every tag to the shard holding it. It is derived data:
//! every mutation rewrites the whole document, and [`IndexManager::rebuild`]
//! recomputes it from the shard files alone, ignoring whatever the previous
//! index said.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::StoreResult;
use super::root::StorageRoot;
use super::shard::ShardManager;
use crate::domain::ShardId;

/// Contents of `index.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDocument {
    #[serde(default)]
    pub tag_to_shard: BTreeMap<String, ShardId>,
    pub last_updated: DateTime<Utc>,
}

impl Default for IndexDocument {
    fn default() -> Self {
        Self {
            tag_to_shard: BTreeMap::new(),
            last_updated: Utc::now(),
        }
    }
}

/// Outcome of a rebuild
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RebuildReport {
    /// Shard files scanned
    pub shards: usize,
    /// Tags in the rebuilt index
    pub tags: usize,
    /// Tags found in more than one shard (the highest shard wins)
    pub duplicates: Vec<String>,
}

/// Owns `index.json`
#[derive(Debug, Clone)]
pub struct IndexManager {
    root: Arc<StorageRoot>,
}

impl IndexManager {
    pub fn new(root: Arc<StorageRoot>) -> Self {
        Self { root }
    }

    /// Writes an empty index unless one exists
    pub fn initialize(&self) -> StoreResult<bool> {
        self.root
            .write_json_if_absent(&self.root.index_path(), &IndexDocument::default())
    }

    /// Reads the index (a missing file reads as empty)
    pub fn load(&self) -> StoreResult<IndexDocument> {
        Ok(self
            .root
            .read_json_opt(&self.root.index_path())?
            .unwrap_or_default())
    }

    fn save(&self, mut index: IndexDocument) -> StoreResult<()> {
        index.last_updated = Utc::now();
        self.root.write_json(&self.root.index_path(), &index)
    }

    pub fn shard_for_tag(&self, tag: &str) -> StoreResult<Option<ShardId>> {
        Ok(self.load()?.tag_to_shard.get(tag).copied())
    }

    pub fn set_tag_shard(&self, tag: &str, shard: ShardId) -> StoreResult<()> {
        let mut index = self.load()?;
        index.tag_to_shard.insert(tag.to_string(), shard);
        self.save(index)
    }

    /// Drops a binding; returns whether it existed
    pub fn remove_tag(&self, tag: &str) -> StoreResult<bool> {
        let mut index = self.load()?;
        let existed = index.tag_to_shard.remove(tag).is_some();
        self.save(index)?;
        Ok(existed)
    }

    /// All indexed tags in sorted order
    pub fn all_tags(&self) -> StoreResult<Vec<String>> {
        Ok(self.load()?.tag_to_shard.into_keys().collect())
    }

    pub fn tag_exists(&self, tag: &str) -> StoreResult<bool> {
        Ok(self.load()?.tag_to_shard.contains_key(tag))
    }

    /// Replaces the index with the tag set of every shard file on disk
    pub fn rebuild(&self, shards: &ShardManager) -> StoreResult<RebuildReport> {
        let shard_ids = shards.scan_shard_files()?;
        let mut mapping = BTreeMap::new();
        let mut duplicates = Vec::new();

        for id in &shard_ids {
            let Some(shard) = shards.load_shard_opt(*id)? else {
                continue;
            };

            for tag in shard.contexts.into_keys() {
                if let Some(previous) = mapping.insert(tag.clone(), *id) {
                    log::warn!("Tag '{}' found in both {} and {}", tag, previous, id);
                    duplicates.push(tag);
                }
            }
        }

        let report = RebuildReport {
            shards: shard_ids.len(),
            tags: mapping.len(),
            duplicates,
        };

        self.save(IndexDocument {
            tag_to_shard: mapping,
            last_updated: Utc::now(),
        })?;

        log::debug!(
            "Rebuilt index: {} tags across {} shards",
            report.tags,
            report.shards
        );
        Ok(report)
    }
}
