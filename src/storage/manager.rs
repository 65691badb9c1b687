//! Storage manager
//!
//! Public contract of the engine. Every mutation validates its inputs
//! first, then holds the storage lock across the whole read-modify-write of
//! shard, metadata and index files; the guard releases it on every exit
//! path. Reads never lock and may observe a root mid-mutation.
//!
//! An index entry pointing at a shard that no longer holds the tag is not
//! an error: reads report the tag as absent until [`StorageManager::rebuild_index`]
//! repairs the index.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::config::{StoreConfig, DEFAULT_LOCK_TIMEOUT};
use super::error::{StoreError, StoreResult};
use super::index::{IndexManager, RebuildReport};
use super::lock::{LockGuard, LockStrategy, StoreLock};
use super::root::StorageRoot;
use super::search::{
    EditDistanceMatcher, FuzzyMatcher, FuzzyRecord, WeightedField, DEFAULT_THRESHOLD,
};
use super::shard::{GlobalMetadata, ShardManager, DEFAULT_MAX_SHARD_SIZE};
use crate::domain::{ContextEntry, SearchResult, ShardId, Validator};

/// Field weights for fuzzy search
pub const SEARCH_FIELDS: [WeightedField; 3] = [
    WeightedField::new("tag", 0.4),
    WeightedField::new("content", 0.4),
    WeightedField::new("categories", 0.2),
];

/// Tunables for opening a storage root
#[derive(Debug, Clone)]
pub struct StorageOptions {
    pub lock_timeout: Duration,
    pub max_shard_size: u64,
    pub lock_strategy: LockStrategy,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            max_shard_size: DEFAULT_MAX_SHARD_SIZE,
            lock_strategy: LockStrategy::default(),
        }
    }
}

impl StorageOptions {
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_max_shard_size(mut self, bytes: u64) -> Self {
        self.max_shard_size = bytes;
        self
    }

    pub fn with_lock_strategy(mut self, strategy: LockStrategy) -> Self {
        self.lock_strategy = strategy;
        self
    }
}

/// Sharded context store rooted at one directory
pub struct StorageManager {
    root: Arc<StorageRoot>,
    shards: ShardManager,
    index: IndexManager,
    lock: Box<dyn StoreLock>,
    lock_timeout: Duration,
    matcher: Box<dyn FuzzyMatcher>,
}

impl StorageManager {
    /// Opens (and initializes if needed) the storage root at `path`
    pub fn open(path: impl Into<PathBuf>, options: StorageOptions) -> StoreResult<Self> {
        let root = Arc::new(StorageRoot::new(path));
        let lock = options.lock_strategy.build(&root);

        root.ensure_dirs()?;
        lock.recover()?;

        let shards = ShardManager::new(Arc::clone(&root), options.max_shard_size);
        let index = IndexManager::new(Arc::clone(&root));

        StoreConfig::initialize(&root, options.max_shard_size)?;
        index.initialize()?;
        shards.initialize()?;

        log::debug!("Opened storage root {}", root.path().display());

        Ok(Self {
            root,
            shards,
            index,
            lock,
            lock_timeout: options.lock_timeout,
            matcher: Box::new(EditDistanceMatcher),
        })
    }

    /// Replaces the fuzzy matching capability
    pub fn with_matcher(mut self, matcher: impl FuzzyMatcher + 'static) -> Self {
        self.matcher = Box::new(matcher);
        self
    }

    /// Returns the storage root directory
    pub fn storage_path(&self) -> &Path {
        self.root.path()
    }

    /// Records `lastAccessed`; the mutation is already committed, so a
    /// failure here is only logged
    fn touch_config(&self) {
        if let Err(e) = StoreConfig::touch(&self.root) {
            log::warn!("Failed to update lastAccessed: {}", e);
        }
    }

    fn locked<T>(&self, op: impl FnOnce() -> StoreResult<T>) -> StoreResult<T> {
        let _guard = LockGuard::acquire(self.lock.as_ref(), self.lock_timeout)?;
        op()
    }

    /// Stores a new context under `tag`
    pub fn add<S: AsRef<str>>(&self, tag: &str, content: &str, categories: &[S]) -> StoreResult<()> {
        Validator::validate_entry(tag, content, categories)?;
        let entry = ContextEntry::new(Validator::sanitize(content), sanitize_all(categories));

        self.locked(|| {
            if self.index.tag_exists(tag)? {
                return Err(StoreError::DuplicateTag(tag.to_string()));
            }

            let mut shard_id = self.shards.current_shard()?;
            if !self.shards.has_capacity(shard_id, tag, &entry)? {
                // An empty shard takes the entry regardless of its size
                if self.shards.load_shard(shard_id)?.contexts.is_empty() {
                    log::debug!("Entry '{}' exceeds shard capacity on its own", tag);
                } else {
                    shard_id = self.shards.create_shard()?;
                }
            }

            let mut shard = self.shards.load_shard(shard_id)?;
            shard.contexts.insert(tag.to_string(), entry);
            self.shards.save_shard(&shard)?;
            self.index.set_tag_shard(tag, shard_id)?;
            self.touch_config();

            log::debug!("Added '{}' to {}", tag, shard_id);
            Ok(())
        })
    }

    /// Returns the context stored under `tag`, if any
    pub fn read(&self, tag: &str) -> StoreResult<Option<ContextEntry>> {
        Validator::validate_tag(tag)?;

        let Some(shard_id) = self.index.shard_for_tag(tag)? else {
            return Ok(None);
        };

        Ok(self
            .shards
            .load_shard_opt(shard_id)?
            .and_then(|mut shard| shard.contexts.remove(tag)))
    }

    /// Returns true if `read(tag)` would find an entry
    pub fn exists(&self, tag: &str) -> StoreResult<bool> {
        Ok(self.read(tag)?.is_some())
    }

    /// Replaces content and categories of an existing context in place
    ///
    /// The entry stays in its shard even if that pushes the shard past the
    /// rotation threshold.
    pub fn update<S: AsRef<str>>(
        &self,
        tag: &str,
        content: &str,
        categories: &[S],
    ) -> StoreResult<()> {
        Validator::validate_entry(tag, content, categories)?;
        let content = Validator::sanitize(content);
        let categories = sanitize_all(categories);

        self.locked(|| {
            let not_found = || StoreError::NotFound(tag.to_string());

            let shard_id = self.index.shard_for_tag(tag)?.ok_or_else(not_found)?;
            let mut shard = self.shards.load_shard_opt(shard_id)?.ok_or_else(not_found)?;
            let existing = shard.contexts.get(tag).ok_or_else(not_found)?;

            let revised = existing.revised(content, categories);
            shard.contexts.insert(tag.to_string(), revised);
            self.shards.save_shard(&shard)?;
            self.touch_config();

            log::debug!("Updated '{}' in {}", tag, shard_id);
            Ok(())
        })
    }

    /// Deletes a context; returns false if the tag was not stored
    pub fn remove(&self, tag: &str) -> StoreResult<bool> {
        Validator::validate_tag(tag)?;

        self.locked(|| {
            let Some(shard_id) = self.index.shard_for_tag(tag)? else {
                return Ok(false);
            };

            let Some(mut shard) = self.shards.load_shard_opt(shard_id)? else {
                return Ok(false);
            };

            if shard.contexts.remove(tag).is_none() {
                return Ok(false);
            }

            self.shards.save_shard(&shard)?;
            self.index.remove_tag(tag)?;
            self.touch_config();

            log::debug!("Removed '{}' from {}", tag, shard_id);
            Ok(true)
        })
    }

    /// All indexed tags in sorted order
    pub fn list(&self) -> StoreResult<Vec<String>> {
        self.index.all_tags()
    }

    /// Every readable context keyed by tag
    pub fn get_all(&self) -> StoreResult<BTreeMap<String, ContextEntry>> {
        let mut by_shard: BTreeMap<ShardId, Vec<String>> = BTreeMap::new();
        for (tag, shard_id) in self.index.load()?.tag_to_shard {
            by_shard.entry(shard_id).or_default().push(tag);
        }

        let mut contexts = BTreeMap::new();
        for (shard_id, tags) in by_shard {
            let Some(mut shard) = self.shards.load_shard_opt(shard_id)? else {
                continue;
            };
            for tag in tags {
                if let Some(entry) = shard.contexts.remove(&tag) {
                    contexts.insert(tag, entry);
                }
            }
        }

        Ok(contexts)
    }

    /// Searches every shard
    ///
    /// Without `fuzzy`, a case-insensitive substring match against tag,
    /// content and categories. With `fuzzy`, results come from the matcher
    /// ranked by score; exact substring hits are always included.
    pub fn search(&self, query: &str, fuzzy: bool) -> StoreResult<Vec<SearchResult>> {
        let candidates = self.all_entries()?;
        let needle = query.to_lowercase();
        let is_exact = |tag: &str, entry: &ContextEntry| {
            entry.search_text(tag).to_lowercase().contains(&needle)
        };

        if !fuzzy {
            return Ok(candidates
                .into_iter()
                .filter(|(tag, entry)| is_exact(tag, entry))
                .map(|(tag, entry)| SearchResult {
                    tag,
                    entry,
                    score: None,
                })
                .collect());
        }

        let records: Vec<FuzzyRecord<'_>> = candidates
            .iter()
            .map(|(tag, entry)| FuzzyRecord {
                fields: vec![
                    vec![tag.as_str()],
                    vec![entry.content.as_str()],
                    entry.categories().iter().map(String::as_str).collect(),
                ],
            })
            .collect();

        let mut ranked: Vec<(usize, f64)> = self
            .matcher
            .rank(query, &SEARCH_FIELDS, &records, DEFAULT_THRESHOLD)
            .into_iter()
            .filter(|m| m.index < candidates.len())
            .map(|m| (m.index, m.score))
            .collect();

        let seen: HashSet<usize> = ranked.iter().map(|(i, _)| *i).collect();
        for (i, (tag, entry)) in candidates.iter().enumerate() {
            if !seen.contains(&i) && is_exact(tag, entry) {
                ranked.push((i, 0.0));
            }
        }
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1));

        Ok(ranked
            .into_iter()
            .map(|(i, score)| {
                let (tag, entry) = &candidates[i];
                SearchResult {
                    tag: tag.clone(),
                    entry: entry.clone(),
                    score: Some(score),
                }
            })
            .collect())
    }

    /// Recomputes the index from shard contents
    pub fn rebuild_index(&self) -> StoreResult<RebuildReport> {
        self.locked(|| self.index.rebuild(&self.shards))
    }

    /// Current global metadata
    pub fn stats(&self) -> StoreResult<GlobalMetadata> {
        self.shards.metadata()
    }

    /// Contents of `config.json`
    pub fn config(&self) -> StoreResult<Option<StoreConfig>> {
        StoreConfig::load(&self.root)
    }

    /// All entries of all shards recorded in metadata, shard by shard
    fn all_entries(&self) -> StoreResult<Vec<(String, ContextEntry)>> {
        let mut entries = Vec::new();
        for shard_id in self.shards.all_shard_ids()? {
            if let Some(shard) = self.shards.load_shard_opt(shard_id)? {
                entries.extend(shard.contexts);
            }
        }
        Ok(entries)
    }
}

fn sanitize_all<S: AsRef<str>>(values: &[S]) -> Vec<String> {
    values
        .iter()
        .map(|v| Validator::sanitize(v.as_ref()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ValidationError;
    use crate::storage::lock::PidFileLock;
    use crate::storage::search::FuzzyMatch;
    use crate::storage::shard::ShardStatus;
    use std::fs;
    use std::thread;
    use std::time::Instant;
    use tempfile::TempDir;

    const NO_CATEGORIES: [&str; 0] = [];

    fn open(dir: &TempDir) -> StorageManager {
        StorageManager::open(dir.path(), StorageOptions::default()).unwrap()
    }

    fn open_small(dir: &TempDir, max_shard_size: u64) -> StorageManager {
        let options = StorageOptions::default().with_max_shard_size(max_shard_size);
        StorageManager::open(dir.path(), options).unwrap()
    }

    #[test]
    fn open_initializes_layout() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);

        assert!(dir.path().join("config.json").is_file());
        assert!(dir.path().join("index.json").is_file());
        assert!(dir.path().join("metadata.json").is_file());
        assert!(dir.path().join("shards").is_dir());
        assert_eq!(store.storage_path(), dir.path());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn reopen_keeps_data() {
        let dir = TempDir::new().unwrap();
        open(&dir).add("keep", "me", &NO_CATEGORIES).unwrap();

        let store = open(&dir);
        assert!(store.exists("keep").unwrap());
    }

    #[test]
    fn add_then_read() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);

        store.add("milk", "buy milk", &["errand"]).unwrap();
        let entry = store.read("milk").unwrap().unwrap();

        assert_eq!(entry.content, "buy milk");
        assert_eq!(entry.categories(), &["errand".to_string()]);
        assert_eq!(entry.metadata.created, entry.metadata.modified);
    }

    #[test]
    fn update_keeps_created() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);

        store.add("milk", "buy milk", &["errand"]).unwrap();
        let before = store.read("milk").unwrap().unwrap();

        thread::sleep(Duration::from_millis(5));
        store
            .update("milk", "buy oat milk", &["errand", "grocery"])
            .unwrap();
        let after = store.read("milk").unwrap().unwrap();

        assert_eq!(after.content, "buy oat milk");
        assert_eq!(after.categories(), &["errand".to_string(), "grocery".to_string()]);
        assert_eq!(after.metadata.created, before.metadata.created);
        assert!(after.metadata.modified > before.metadata.modified);
    }

    #[test]
    fn duplicate_add_fails() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);

        store.add("t", "first", &NO_CATEGORIES).unwrap();
        let err = store.add("t", "second", &NO_CATEGORIES).unwrap_err();

        assert!(matches!(err, StoreError::DuplicateTag(ref t) if t == "t"));
        assert_eq!(store.read("t").unwrap().unwrap().content, "first");
    }

    #[test]
    fn add_after_remove_succeeds() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);

        store.add("t", "first", &NO_CATEGORIES).unwrap();
        assert!(store.remove("t").unwrap());
        store.add("t", "again", &NO_CATEGORIES).unwrap();

        assert_eq!(store.read("t").unwrap().unwrap().content, "again");
    }

    #[test]
    fn update_unknown_tag_fails() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);

        let err = store.update("nope", "x", &NO_CATEGORIES).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn remove_once() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);

        store.add("t", "x", &NO_CATEGORIES).unwrap();
        assert!(store.remove("t").unwrap());
        assert!(!store.remove("t").unwrap());
        assert!(store.read("t").unwrap().is_none());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn inputs_are_sanitized() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);

        store
            .add("t", "line one\nline\u{0} two\u{7}", &["wo\u{1b}rk"])
            .unwrap();
        let entry = store.read("t").unwrap().unwrap();

        assert_eq!(entry.content, "line one\nline two");
        assert_eq!(entry.categories(), &["work".to_string()]);
    }

    #[test]
    fn validation_happens_before_locking() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);

        let holder = PidFileLock::new(dir.path().join(".lock"));
        holder.acquire(Duration::from_secs(1)).unwrap();

        let start = Instant::now();
        let err = store.add("bad/tag", "x", &NO_CATEGORIES).unwrap_err();
        assert!(matches!(
            err,
            StoreError::Validation(ValidationError::TagInvalidChar('/'))
        ));
        assert!(start.elapsed() < Duration::from_millis(100));

        assert!(matches!(
            store.update("t", "", &NO_CATEGORIES),
            Err(StoreError::Validation(ValidationError::EmptyContent))
        ));
        assert!(matches!(
            store.read(" padded"),
            Err(StoreError::Validation(_))
        ));
    }

    #[test]
    fn list_and_get_all() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);

        store.add("b", "second", &NO_CATEGORIES).unwrap();
        store.add("a", "first", &["x"]).unwrap();

        assert_eq!(store.list().unwrap(), vec!["a", "b"]);

        let all = store.get_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["a"].content, "first");
        assert_eq!(all["b"].content, "second");
    }

    #[test]
    fn metadata_tracks_entries() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);

        store.add("a", "1", &NO_CATEGORIES).unwrap();
        store.add("b", "2", &NO_CATEGORIES).unwrap();
        store.remove("a").unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.total_shards, 1);
        let sum: u64 = stats.shards.values().map(|s| s.entries).sum();
        assert_eq!(sum, stats.total_entries);
    }

    #[test]
    fn mutations_touch_last_accessed() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        let before = store.config().unwrap().unwrap().last_accessed;

        thread::sleep(Duration::from_millis(5));
        store.add("a", "1", &NO_CATEGORIES).unwrap();

        assert!(store.config().unwrap().unwrap().last_accessed > before);
    }

    #[test]
    fn corrupt_config_does_not_fail_mutations() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        fs::write(dir.path().join("config.json"), "garbage").unwrap();

        store.add("t", "x", &NO_CATEGORIES).unwrap();
        store.update("t", "y", &NO_CATEGORIES).unwrap();
        assert_eq!(store.read("t").unwrap().unwrap().content, "y");
        assert!(store.remove("t").unwrap());
        assert!(!dir.path().join(".lock").exists());
    }

    #[test]
    fn lost_metadata_keeps_existing_entries() {
        let dir = TempDir::new().unwrap();
        open(&dir).add("keep", "old entry", &NO_CATEGORIES).unwrap();

        fs::remove_file(dir.path().join("metadata.json")).unwrap();
        let store = open(&dir);
        store.add("new", "fresh entry", &NO_CATEGORIES).unwrap();

        assert_eq!(store.read("keep").unwrap().unwrap().content, "old entry");
        assert_eq!(store.read("new").unwrap().unwrap().content, "fresh entry");
        assert_eq!(store.search("entry", false).unwrap().len(), 2);
        assert_eq!(
            store.index.shard_for_tag("new").unwrap(),
            Some(ShardId::new(2))
        );
    }

    #[test]
    fn rotates_when_shard_would_overflow() {
        let dir = TempDir::new().unwrap();
        let store = open_small(&dir, 1024);
        let body = "x".repeat(400);

        store.add("one", &body, &NO_CATEGORIES).unwrap();
        store.add("two", &body, &NO_CATEGORIES).unwrap();
        store.add("three", &body, &NO_CATEGORIES).unwrap();

        let stats = store.stats().unwrap();
        assert!(stats.total_shards >= 2);
        assert_eq!(stats.total_entries, 3);

        // Every tag still resolves
        for tag in ["one", "two", "three"] {
            assert!(store.exists(tag).unwrap());
        }

        // No shard grew past the threshold through new tags
        for record in stats.shards.values() {
            assert!(record.size_bytes < 1024 || record.entries == 1);
        }
    }

    #[test]
    fn full_shard_is_never_current() {
        let dir = TempDir::new().unwrap();
        let store = open_small(&dir, 512);

        // A single oversized entry lands in the empty first shard and fills it
        store.add("huge", &"x".repeat(800), &NO_CATEGORIES).unwrap();
        let stats = store.stats().unwrap();
        let first = ShardId::first();
        assert_eq!(stats.shards[&first].status, ShardStatus::Full);

        store.add("small", "tiny", &NO_CATEGORIES).unwrap();
        let stats = store.stats().unwrap();
        let current = stats.current_shard.unwrap();
        assert_ne!(current, first);
        assert_eq!(stats.shards[&current].entries, 1);
        assert_eq!(store.index.shard_for_tag("small").unwrap(), Some(current));
    }

    #[test]
    fn update_stays_in_full_shard() {
        let dir = TempDir::new().unwrap();
        let store = open_small(&dir, 512);

        store.add("huge", &"x".repeat(800), &NO_CATEGORIES).unwrap();
        store.update("huge", &"y".repeat(900), &NO_CATEGORIES).unwrap();

        assert_eq!(
            store.index.shard_for_tag("huge").unwrap(),
            Some(ShardId::first())
        );
        assert_eq!(store.read("huge").unwrap().unwrap().content.len(), 900);
        assert!(store.remove("huge").unwrap());
    }

    #[test]
    fn dangling_index_reads_as_absent() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        store.add("a", "1", &NO_CATEGORIES).unwrap();

        // Simulate a crash between shard save and index update
        store.index.set_tag_shard("ghost", ShardId::first()).unwrap();
        store.index.set_tag_shard("lost", ShardId::new(42)).unwrap();

        assert!(store.read("ghost").unwrap().is_none());
        assert!(store.read("lost").unwrap().is_none());
        assert!(!store.remove("ghost").unwrap());
        assert!(matches!(
            store.update("ghost", "x", &NO_CATEGORIES),
            Err(StoreError::NotFound(_))
        ));
        assert_eq!(store.get_all().unwrap().len(), 1);
    }

    #[test]
    fn rebuild_repairs_index() {
        let dir = TempDir::new().unwrap();
        let store = open_small(&dir, 1024);
        let body = "x".repeat(400);
        for tag in ["a", "b", "c", "d"] {
            store.add(tag, &body, &NO_CATEGORIES).unwrap();
        }
        let expected: BTreeMap<String, ShardId> = store.index.load().unwrap().tag_to_shard;

        fs::write(dir.path().join("index.json"), "garbage").unwrap();
        assert!(store.list().is_err());

        let report = store.rebuild_index().unwrap();
        assert_eq!(report.tags, 4);

        assert_eq!(store.index.load().unwrap().tag_to_shard, expected);
        for tag in ["a", "b", "c", "d"] {
            assert!(store.read(tag).unwrap().is_some());
        }
    }

    #[test]
    fn rebuild_drops_dangling_tags() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        store.add("real", "1", &NO_CATEGORIES).unwrap();
        store.index.set_tag_shard("ghost", ShardId::first()).unwrap();

        store.rebuild_index().unwrap();

        assert_eq!(store.list().unwrap(), vec!["real"]);
    }

    #[test]
    fn lock_timeout_surfaces_and_releases() {
        let dir = TempDir::new().unwrap();
        let options = StorageOptions::default().with_lock_timeout(Duration::from_millis(200));
        let store = StorageManager::open(dir.path(), options).unwrap();

        let holder = PidFileLock::new(dir.path().join(".lock"));
        holder.acquire(Duration::from_secs(1)).unwrap();

        let err = store.add("t", "x", &NO_CATEGORIES).unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout { .. }));
        assert!(err.is_retryable());
        assert!(matches!(
            store.remove("t"),
            Err(StoreError::LockTimeout { .. })
        ));

        holder.release().unwrap();
        store.add("t", "x", &NO_CATEGORIES).unwrap();
    }

    #[test]
    fn failed_mutation_releases_lock() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);

        store.add("t", "x", &NO_CATEGORIES).unwrap();
        assert!(store.add("t", "x", &NO_CATEGORIES).is_err());
        assert!(store.update("missing", "x", &NO_CATEGORIES).is_err());

        assert!(!dir.path().join(".lock").exists());
    }

    #[test]
    fn waits_for_lock_holder() {
        let dir = TempDir::new().unwrap();
        let holder = PidFileLock::new(dir.path().join(".lock"));
        let store = Arc::new(open(&dir));

        holder.acquire(Duration::from_secs(1)).unwrap();

        let writer = {
            let store = Arc::clone(&store);
            thread::spawn(move || store.add("late", "x", &NO_CATEGORIES))
        };

        thread::sleep(Duration::from_millis(300));
        // The writer is blocked while the lock is held
        assert!(store.read("late").unwrap().is_none());

        holder.release().unwrap();
        writer.join().unwrap().unwrap();
        assert!(store.read("late").unwrap().is_some());
    }

    #[test]
    fn concurrent_writers_do_not_lose_updates() {
        let dir = TempDir::new().unwrap();
        open(&dir);

        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let path = dir.path().to_path_buf();
                thread::spawn(move || {
                    let options =
                        StorageOptions::default().with_lock_timeout(Duration::from_secs(30));
                    let store = StorageManager::open(path, options).unwrap();
                    for i in 0..10 {
                        let tag = format!("w{}-{}", worker, i);
                        store.add(&tag, "payload", &NO_CATEGORIES).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let store = open(&dir);
        assert_eq!(store.list().unwrap().len(), 40);
        assert_eq!(store.get_all().unwrap().len(), 40);
        assert_eq!(store.stats().unwrap().total_entries, 40);
    }

    #[test]
    fn os_lock_strategy_works_end_to_end() {
        let dir = TempDir::new().unwrap();
        let options = StorageOptions::default().with_lock_strategy(LockStrategy::OsAdvisory);
        let store = StorageManager::open(dir.path(), options).unwrap();

        store.add("t", "x", &NO_CATEGORIES).unwrap();
        store.update("t", "y", &NO_CATEGORIES).unwrap();
        assert!(store.remove("t").unwrap());
        assert!(!dir.path().join(".lock").exists());
    }

    #[test]
    fn open_clears_stale_lock() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".lock"), "999999999").unwrap();

        let store = open(&dir);
        assert!(!dir.path().join(".lock").exists());
        store.add("t", "x", &NO_CATEGORIES).unwrap();
    }

    #[test]
    fn stale_lock_during_mutation_is_recovered() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        fs::write(dir.path().join(".lock"), "999999999").unwrap();

        let start = Instant::now();
        store.add("t", "x", &NO_CATEGORIES).unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    fn search_fixture(dir: &TempDir) -> StorageManager {
        let store = open_small(dir, 1024);
        store.add("milk", "buy oat milk", &["errand"]).unwrap();
        store
            .add("roadmap", "Q3 planning for the storage engine", &["work"])
            .unwrap();
        store
            .add("pancakes", "flour, eggs and syrup", &["recipes", "weekend"])
            .unwrap();
        store
    }

    #[test]
    fn substring_search_is_case_insensitive() {
        let dir = TempDir::new().unwrap();
        let store = search_fixture(&dir);

        let results = store.search("STORAGE", false).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].tag, "roadmap");
        assert!(results[0].score.is_none());
    }

    #[test]
    fn substring_search_in_categories_only() {
        let dir = TempDir::new().unwrap();
        let store = search_fixture(&dir);

        let results = store.search("weekend", false).unwrap();
        let tags: Vec<_> = results.iter().map(|r| r.tag.as_str()).collect();
        assert_eq!(tags, vec!["pancakes"]);
    }

    #[test]
    fn substring_search_spans_shards() {
        let dir = TempDir::new().unwrap();
        let store = open_small(&dir, 600);
        for i in 0..4 {
            store
                .add(&format!("note-{}", i), &format!("{} shared", "x".repeat(300)), &NO_CATEGORIES)
                .unwrap();
        }
        assert!(store.stats().unwrap().total_shards > 1);

        assert_eq!(store.search("shared", false).unwrap().len(), 4);
    }

    #[test]
    fn fuzzy_search_tolerates_typos() {
        let dir = TempDir::new().unwrap();
        let store = search_fixture(&dir);

        let results = store.search("pancakse", true).unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].tag, "pancakes");
        assert!(results.iter().all(|r| r.score.is_some()));
    }

    #[test]
    fn fuzzy_results_cover_exact_results() {
        let dir = TempDir::new().unwrap();
        let store = search_fixture(&dir);

        for query in ["milk", "errand", "Q3 planning", "eggs and", "e"] {
            let exact: HashSet<String> = store
                .search(query, false)
                .unwrap()
                .into_iter()
                .map(|r| r.tag)
                .collect();
            let fuzzy: HashSet<String> = store
                .search(query, true)
                .unwrap()
                .into_iter()
                .map(|r| r.tag)
                .collect();
            assert!(fuzzy.is_superset(&exact), "query {:?}", query);
        }
    }

    struct NothingMatches;

    impl FuzzyMatcher for NothingMatches {
        fn rank(
            &self,
            _query: &str,
            _fields: &[WeightedField],
            _records: &[FuzzyRecord<'_>],
            _threshold: f64,
        ) -> Vec<FuzzyMatch> {
            Vec::new()
        }
    }

    #[test]
    fn custom_matcher_still_keeps_exact_hits() {
        let dir = TempDir::new().unwrap();
        let store = search_fixture(&dir).with_matcher(NothingMatches);

        let results = store.search("syrup", true).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].score, Some(0.0));
        assert!(store.search("pancakse", true).unwrap().is_empty());
    }
}
