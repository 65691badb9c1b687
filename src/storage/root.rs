//! Storage root handle
//!
//! One [`StorageRoot`] exists per opened directory. It knows where every
//! persisted document lives and performs all whole-file JSON I/O, so the
//! index and shard managers never build paths or touch the filesystem on
//! their own.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::error::{StoreError, StoreResult};
use crate::domain::ShardId;

/// Name of the default storage directory
pub const STORAGE_DIR_NAME: &str = ".loccon";

/// Paths and file I/O for one storage root
#[derive(Debug, Clone)]
pub struct StorageRoot {
    path: PathBuf,
}

impl StorageRoot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the root directory
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config_path(&self) -> PathBuf {
        self.path.join("config.json")
    }

    pub fn index_path(&self) -> PathBuf {
        self.path.join("index.json")
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.path.join("metadata.json")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.path.join(".lock")
    }

    /// File held by the OS advisory lock strategy
    pub fn flock_path(&self) -> PathBuf {
        self.path.join(".flock")
    }

    pub fn shards_dir(&self) -> PathBuf {
        self.path.join("shards")
    }

    pub fn shard_path(&self, id: ShardId) -> PathBuf {
        self.shards_dir().join(id.file_name())
    }

    /// Creates the root and `shards/` directories if missing
    pub fn ensure_dirs(&self) -> StoreResult<()> {
        let shards = self.shards_dir();
        fs::create_dir_all(&shards).map_err(|e| StoreError::io(&shards, e))
    }

    /// Reads and parses a JSON document
    pub fn read_json<T: DeserializeOwned>(&self, path: &Path) -> StoreResult<T> {
        let bytes = fs::read(path).map_err(|e| StoreError::io(path, e))?;
        serde_json::from_slice(&bytes).map_err(|e| StoreError::json(path, e))
    }

    /// Reads a JSON document, returning `None` if the file does not exist
    pub fn read_json_opt<T: DeserializeOwned>(&self, path: &Path) -> StoreResult<Option<T>> {
        match fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StoreError::json(path, e)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    /// Writes a JSON document (pretty, two-space indent) atomically
    pub fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> StoreResult<()> {
        let temp_path = write_temp(path, value)?;
        fs::rename(&temp_path, path).map_err(|e| StoreError::io(path, e))
    }

    /// Writes a JSON document only if the file does not exist yet
    ///
    /// The document is linked into place in one step, so an existing file
    /// is never replaced, even by a concurrent writer.
    pub fn write_json_if_absent<T: Serialize>(&self, path: &Path, value: &T) -> StoreResult<bool> {
        let temp_path = write_temp(path, value)?;
        let linked = fs::hard_link(&temp_path, path);
        let _ = fs::remove_file(&temp_path);

        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }
}

fn write_temp<T: Serialize>(path: &Path, value: &T) -> StoreResult<PathBuf> {
    let body = serde_json::to_vec_pretty(value).map_err(|e| StoreError::json(path, e))?;

    let temp_path = temp_path_for(path);
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)
        .map_err(|e| StoreError::io(&temp_path, e))?;

    let mut writer = BufWriter::new(&file);
    writer
        .write_all(&body)
        .and_then(|_| writer.flush())
        .map_err(|e| StoreError::io(&temp_path, e))?;

    Ok(temp_path)
}

/// Size in bytes of the compact JSON serialization
pub fn serialized_len<T: Serialize>(value: &T) -> usize {
    serde_json::to_vec(value).map(|v| v.len()).unwrap_or(0)
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(
        ".{}.{}.tmp",
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    path.with_file_name(name)
}
