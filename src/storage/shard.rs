//! Shard files and global metadata
//!
//! Entries live in size-capped shard documents under `shards/`. Exactly one
//! shard is current at a time and receives new tags; once a save pushes its
//! compact serialized size to the threshold it is marked `full` and the next
//! request for the current shard allocates a new one. Full shards still
//! accept updates and removals of the tags they already hold.
//!
//! `metadata.json` tracks every shard's entry count, size and status.
//! `totalEntries` is recomputed from those records on every save.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, ErrorKind};
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::error::{StoreError, StoreResult};
use super::root::{serialized_len, StorageRoot};
use crate::domain::{ContextEntry, ShardId};

/// Default rotation threshold: 5 MiB of compact JSON
pub const DEFAULT_MAX_SHARD_SIZE: u64 = 5 * 1024 * 1024;

/// One shard document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shard {
    pub shard_id: ShardId,
    #[serde(default)]
    pub contexts: BTreeMap<String, ContextEntry>,
}

impl Shard {
    pub fn empty(shard_id: ShardId) -> Self {
        Self {
            shard_id,
            contexts: BTreeMap::new(),
        }
    }

    /// Size of the compact serialization, as used by the capacity policy
    pub fn size_bytes(&self) -> u64 {
        serialized_len(self) as u64
    }
}

/// Whether a shard still accepts new tags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardStatus {
    #[default]
    Active,
    Full,
}

/// Bookkeeping for one shard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardRecord {
    pub entries: u64,
    pub size_bytes: u64,
    pub status: ShardStatus,
}

/// Contents of `metadata.json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GlobalMetadata {
    pub total_entries: u64,
    pub total_shards: u64,
    #[serde(with = "optional_shard_id")]
    pub current_shard: Option<ShardId>,
    pub shards: BTreeMap<ShardId, ShardRecord>,
}

impl GlobalMetadata {
    /// Recomputes `totalEntries` from the shard records
    fn recount(&mut self) {
        self.total_entries = self.shards.values().map(|s| s.entries).sum();
    }

    /// The next never-used shard id, given the shard files already on disk
    ///
    /// Metadata alone is not trusted: a lost or stale `metadata.json` must
    /// not hand out the id of a shard file that still holds entries.
    fn next_shard_id(&self, on_disk: &[ShardId]) -> ShardId {
        let highest = self
            .shards
            .keys()
            .chain(on_disk)
            .map(|id| id.number() as u64)
            .max()
            .unwrap_or(0)
            .max(self.total_shards);

        ShardId::new(highest as u32 + 1)
    }
}

/// `currentShard` is persisted as `""` when no shard exists yet
mod optional_shard_id {
    use super::*;

    pub fn serialize<S: Serializer>(id: &Option<ShardId>, s: S) -> Result<S::Ok, S::Error> {
        match id {
            Some(id) => s.serialize_str(&id.to_string()),
            None => s.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<ShardId>, D::Error> {
        let raw = String::deserialize(d)?;
        if raw.is_empty() {
            return Ok(None);
        }
        raw.parse().map(Some).map_err(serde::de::Error::custom)
    }
}

/// Owns the shard files and `metadata.json`
#[derive(Debug, Clone)]
pub struct ShardManager {
    root: Arc<StorageRoot>,
    max_shard_size: u64,
}

impl ShardManager {
    pub fn new(root: Arc<StorageRoot>, max_shard_size: u64) -> Self {
        Self {
            root,
            max_shard_size,
        }
    }

    /// Writes an empty `metadata.json` unless one exists
    pub fn initialize(&self) -> StoreResult<bool> {
        self.root
            .write_json_if_absent(&self.root.metadata_path(), &GlobalMetadata::default())
    }

    /// Reads `metadata.json` (a missing file reads as empty metadata)
    pub fn metadata(&self) -> StoreResult<GlobalMetadata> {
        Ok(self
            .root
            .read_json_opt(&self.root.metadata_path())?
            .unwrap_or_default())
    }

    fn save_metadata(&self, metadata: &GlobalMetadata) -> StoreResult<()> {
        self.root.write_json(&self.root.metadata_path(), metadata)
    }

    /// Returns the shard that receives new tags, allocating one if there is
    /// none or the current one is full
    pub fn current_shard(&self) -> StoreResult<ShardId> {
        let metadata = self.metadata()?;

        match metadata.current_shard {
            Some(id) => match metadata.shards.get(&id) {
                Some(record) if record.status == ShardStatus::Active => Ok(id),
                Some(_) => {
                    log::debug!("Shard {} is full, rotating", id);
                    self.create_shard()
                }
                None => {
                    log::warn!("Current shard {} has no metadata record, rotating", id);
                    self.create_shard()
                }
            },
            None => self.create_shard(),
        }
    }

    /// Allocates the next shard id, writes an empty shard document and
    /// registers it as the current, active shard
    pub fn create_shard(&self) -> StoreResult<ShardId> {
        let mut metadata = self.metadata()?;
        let id = metadata.next_shard_id(&self.scan_shard_files()?);
        let shard = Shard::empty(id);

        self.root.ensure_dirs()?;
        let path = self.root.shard_path(id);
        if !self.root.write_json_if_absent(&path, &shard)? {
            return Err(StoreError::io(
                &path,
                io::Error::new(ErrorKind::AlreadyExists, "shard file already exists"),
            ));
        }

        metadata.total_shards += 1;
        metadata.current_shard = Some(id);
        metadata.shards.insert(
            id,
            ShardRecord {
                entries: 0,
                size_bytes: shard.size_bytes(),
                status: ShardStatus::Active,
            },
        );
        self.save_metadata(&metadata)?;

        log::debug!("Created shard {}", id);
        Ok(id)
    }

    /// Loads a shard document
    pub fn load_shard(&self, id: ShardId) -> StoreResult<Shard> {
        self.root.read_json(&self.root.shard_path(id))
    }

    /// Loads a shard document, returning `None` if its file is missing
    pub fn load_shard_opt(&self, id: ShardId) -> StoreResult<Option<Shard>> {
        self.root.read_json_opt(&self.root.shard_path(id))
    }

    /// Persists a shard and refreshes its metadata record
    ///
    /// The `full` flip is decided after the write, so a single save may push
    /// a shard past the threshold; the next new tag then goes elsewhere.
    pub fn save_shard(&self, shard: &Shard) -> StoreResult<()> {
        self.root
            .write_json(&self.root.shard_path(shard.shard_id), shard)?;

        let size_bytes = shard.size_bytes();
        let mut metadata = self.metadata()?;
        metadata.shards.insert(
            shard.shard_id,
            ShardRecord {
                entries: shard.contexts.len() as u64,
                size_bytes,
                status: if size_bytes >= self.max_shard_size {
                    ShardStatus::Full
                } else {
                    ShardStatus::Active
                },
            },
        );
        metadata.recount();
        self.save_metadata(&metadata)
    }

    /// Predicts whether adding `tag -> entry` keeps the shard under the
    /// threshold
    pub fn has_capacity(&self, id: ShardId, tag: &str, entry: &ContextEntry) -> StoreResult<bool> {
        let current = self.load_shard(id)?.size_bytes();
        let mut candidate = BTreeMap::new();
        candidate.insert(tag, entry);
        let additional = serialized_len(&candidate) as u64;

        Ok(current + additional < self.max_shard_size)
    }

    /// Shard ids recorded in metadata or present on disk, in numeric order
    pub fn all_shard_ids(&self) -> StoreResult<Vec<ShardId>> {
        let mut ids: BTreeSet<ShardId> = self.metadata()?.shards.into_keys().collect();
        ids.extend(self.scan_shard_files()?);
        Ok(ids.into_iter().collect())
    }

    /// Shard ids found on disk under `shards/`, in numeric order
    pub fn scan_shard_files(&self) -> StoreResult<Vec<ShardId>> {
        let dir = self.root.shards_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&dir, e)),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| StoreError::io(&dir, e))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<ShardId>().ok())
            {
                ids.push(id);
            }
        }

        ids.sort();
        Ok(ids)
    }
}
