//! Persistent disk cache for rendered page artifacts.
//!
//! One directory per document namespace, one file per [`CacheKey`]. Artifacts
//! are written to a temporary file in the same directory and renamed into
//! place, so a reader either sees a complete artifact or nothing at all.
//! There is no eviction: the namespace is cleared wholesale when the document
//! it belongs to is replaced.

use crate::key::CacheKey;
use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tempfile::NamedTempFile;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A complete, published artifact on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub key: CacheKey,
    pub path: PathBuf,
    pub byte_len: u64,
}

impl Artifact {
    pub fn read(&self) -> io::Result<Vec<u8>> {
        fs::read(&self.path)
    }
}

/// Lifecycle of one cache entry: `Absent -> Rendering -> Ready | Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryState {
    Absent,
    Rendering,
    Ready(Artifact),
    Failed(String),
}

/// Statistics for monitoring cache behaviour
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered with a ready artifact
    pub hits: u64,
    /// Lookups that found nothing usable
    pub misses: u64,
    /// Artifacts published
    pub stores: u64,
    /// Renders or writes marked as failed
    pub failures: u64,
    /// Ready entries currently held
    pub entry_count: usize,
    /// Bytes held by ready entries
    pub disk_used: u64,
}

impl CacheStats {
    /// Cache hit rate as a fraction (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct CacheState {
    entries: HashMap<CacheKey, EntryState>,
    stats: CacheStats,
}

impl CacheState {
    fn publish(&mut self, artifact: Artifact) {
        let previous = self.entries.insert(artifact.key, EntryState::Ready(artifact.clone()));
        if let Some(EntryState::Ready(old)) = previous {
            self.stats.disk_used = self.stats.disk_used.saturating_sub(old.byte_len);
            self.stats.entry_count = self.stats.entry_count.saturating_sub(1);
        }
        self.stats.disk_used += artifact.byte_len;
        self.stats.entry_count += 1;
    }

    fn forget(&mut self, key: &CacheKey) {
        if let Some(EntryState::Ready(old)) = self.entries.remove(key) {
            self.stats.disk_used = self.stats.disk_used.saturating_sub(old.byte_len);
            self.stats.entry_count = self.stats.entry_count.saturating_sub(1);
        }
    }
}

/// Render cache for one document namespace.
///
/// Cloning is cheap and every clone shares the same state. Safe for
/// concurrent use from all render workers.
#[derive(Clone)]
pub struct RenderCache {
    namespace: String,
    dir: PathBuf,
    state: Arc<Mutex<CacheState>>,
}

impl RenderCache {
    /// Opens (creating if needed) the namespace directory under `root` and
    /// registers every artifact a previous run left there.
    pub fn open<P: AsRef<Path>>(root: P, namespace: &str) -> Result<Self, CacheError> {
        let dir = root.as_ref().join(namespace);
        fs::create_dir_all(&dir)?;

        let cache = Self {
            namespace: namespace.to_owned(),
            dir,
            state: Arc::new(Mutex::new(CacheState {
                entries: HashMap::new(),
                stats: CacheStats::default(),
            })),
        };

        let recovered = cache.load_from_disk()?;
        log::info!("opened render cache {} ({} artifacts on disk)", cache.dir.display(), recovered);

        Ok(cache)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn key_to_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    /// Returns the ready artifact for `key`, if any.
    ///
    /// An entry whose file disappeared behind our back is dropped and reported
    /// as a miss.
    pub fn lookup(&self, key: &CacheKey) -> Option<Artifact> {
        let mut state = self.lock();

        let artifact = match state.entries.get(key) {
            Some(EntryState::Ready(artifact)) => artifact.clone(),
            _ => {
                state.stats.misses += 1;
                return None;
            }
        };

        if artifact.path.is_file() {
            state.stats.hits += 1;
            Some(artifact)
        } else {
            log::warn!("artifact for {key} vanished from disk");
            state.forget(key);
            state.stats.misses += 1;
            None
        }
    }

    /// Check if a ready artifact is registered, without touching statistics
    pub fn contains(&self, key: &CacheKey) -> bool {
        matches!(self.lock().entries.get(key), Some(EntryState::Ready(_)))
    }

    pub fn state(&self, key: &CacheKey) -> EntryState {
        self.lock().entries.get(key).cloned().unwrap_or(EntryState::Absent)
    }

    /// Moves `key` to `Rendering` unless it is already rendering or ready.
    ///
    /// Returns `false` when another caller owns the render or the artifact
    /// already exists.
    pub fn begin_render(&self, key: &CacheKey) -> bool {
        let mut state = self.lock();
        match state.entries.get(key) {
            Some(EntryState::Rendering) | Some(EntryState::Ready(_)) => false,
            _ => {
                state.entries.insert(*key, EntryState::Rendering);
                true
            }
        }
    }

    /// Publishes `bytes` as the artifact for `key`.
    ///
    /// The bytes are written and synced to a temporary file first and only
    /// then renamed to the key's file name. On failure the entry is marked
    /// `Failed` and the temporary file is removed.
    pub fn store(&self, key: &CacheKey, bytes: &[u8]) -> Result<Artifact, CacheError> {
        let path = self.key_to_path(key);

        match self.write_atomically(&path, bytes) {
            Ok(()) => {
                let artifact = Artifact { key: *key, path, byte_len: bytes.len() as u64 };
                let mut state = self.lock();
                state.publish(artifact.clone());
                state.stats.stores += 1;
                log::debug!("stored {key} ({} bytes)", bytes.len());
                Ok(artifact)
            }
            Err(err) => {
                self.mark_failed(key, err.to_string());
                Err(err.into())
            }
        }
    }

    fn write_atomically(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        let mut temp = NamedTempFile::new_in(&self.dir)?;
        temp.write_all(bytes)?;
        temp.as_file().sync_all()?;
        temp.persist(path).map_err(|err| err.error)?;
        Ok(())
    }

    pub fn mark_failed(&self, key: &CacheKey, message: impl Into<String>) {
        let mut state = self.lock();
        state.forget(key);
        state.entries.insert(*key, EntryState::Failed(message.into()));
        state.stats.failures += 1;
    }

    /// Removes every artifact in this namespace, including files left by
    /// earlier runs and abandoned temporary files.
    pub fn clear(&self) -> Result<(), CacheError> {
        let mut state = self.lock();

        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.is_file() {
                if let Err(err) = fs::remove_file(&path) {
                    if err.kind() != io::ErrorKind::NotFound {
                        return Err(err.into());
                    }
                }
            }
        }

        state.entries.clear();
        state.stats.entry_count = 0;
        state.stats.disk_used = 0;
        log::info!("cleared render cache {}", self.dir.display());

        Ok(())
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats.clone()
    }

    /// Number of ready entries
    pub fn len(&self) -> usize {
        self.lock().stats.entry_count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registers existing artifact files as ready entries. Returns how many
    /// were found.
    fn load_from_disk(&self) -> io::Result<usize> {
        let mut state = self.lock();
        let mut found = 0;

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();

            let Some(key) = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(CacheKey::from_file_name)
            else {
                continue;
            };

            let byte_len = entry.metadata()?.len();
            state.publish(Artifact { key, path, byte_len });
            found += 1;
        }

        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::RenderScale;
    use std::thread;

    fn key(page: u32) -> CacheKey {
        CacheKey::new(page, RenderScale::new(2.0))
    }

    #[test]
    fn test_store_then_lookup() {
        let temp = tempfile::tempdir().unwrap();
        let cache = RenderCache::open(temp.path(), "deck").unwrap();

        assert!(cache.lookup(&key(1)).is_none());

        let stored = cache.store(&key(1), b"png bytes").unwrap();
        let found = cache.lookup(&key(1)).unwrap();

        assert_eq!(stored, found);
        assert_eq!(found.read().unwrap(), b"png bytes");
        assert_eq!(found.path, temp.path().join("deck").join("page_000001_x2000.png"));
    }

    #[test]
    fn test_lookup_store_lookup_is_idempotent() {
        let temp = tempfile::tempdir().unwrap();
        let cache = RenderCache::open(temp.path(), "deck").unwrap();

        let first = cache.store(&key(3), b"same").unwrap();
        let second = cache.store(&key(3), b"same").unwrap();

        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().disk_used, 4);
    }

    #[test]
    fn test_lifecycle_states() {
        let temp = tempfile::tempdir().unwrap();
        let cache = RenderCache::open(temp.path(), "deck").unwrap();

        assert_eq!(cache.state(&key(0)), EntryState::Absent);
        assert!(cache.begin_render(&key(0)));
        assert_eq!(cache.state(&key(0)), EntryState::Rendering);
        assert!(!cache.begin_render(&key(0)));

        let artifact = cache.store(&key(0), b"x").unwrap();
        assert_eq!(cache.state(&key(0)), EntryState::Ready(artifact));
        assert!(!cache.begin_render(&key(0)));

        assert!(cache.begin_render(&key(1)));
        cache.mark_failed(&key(1), "boom");
        assert_eq!(cache.state(&key(1)), EntryState::Failed("boom".to_owned()));
        assert!(cache.begin_render(&key(1)), "failed entries may be retried");
        assert_eq!(cache.stats().failures, 1);
    }

    #[test]
    fn test_clear_forces_recomputation() {
        let temp = tempfile::tempdir().unwrap();
        let cache = RenderCache::open(temp.path(), "deck").unwrap();

        let artifact = cache.store(&key(0), b"a").unwrap();
        cache.store(&key(1), b"b").unwrap();
        fs::write(cache.dir().join(".tmpLeftover"), b"junk").unwrap();

        cache.clear().unwrap();

        assert!(cache.lookup(&key(0)).is_none());
        assert!(cache.lookup(&key(1)).is_none());
        assert!(!artifact.path.exists());
        assert!(cache.is_empty());
        assert_eq!(fs::read_dir(cache.dir()).unwrap().count(), 0);
    }

    #[test]
    fn test_reopen_recovers_artifacts() {
        let temp = tempfile::tempdir().unwrap();
        {
            let cache = RenderCache::open(temp.path(), "deck").unwrap();
            cache.store(&key(4), b"four").unwrap();
            cache.store(&key(5), b"five").unwrap();
        }
        fs::write(temp.path().join("deck").join("README"), b"ignored").unwrap();

        let reopened = RenderCache::open(temp.path(), "deck").unwrap();

        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.lookup(&key(4)).unwrap().read().unwrap(), b"four");
        assert!(reopened.lookup(&key(6)).is_none());
    }

    #[test]
    fn test_namespaces_are_isolated() {
        let temp = tempfile::tempdir().unwrap();
        let a = RenderCache::open(temp.path(), "aaaa").unwrap();
        let b = RenderCache::open(temp.path(), "bbbb").unwrap();

        a.store(&key(0), b"a").unwrap();
        b.clear().unwrap();

        assert!(a.contains(&key(0)));
        assert!(!b.contains(&key(0)));
    }

    #[test]
    fn test_vanished_file_is_a_miss() {
        let temp = tempfile::tempdir().unwrap();
        let cache = RenderCache::open(temp.path(), "deck").unwrap();

        let artifact = cache.store(&key(2), b"gone soon").unwrap();
        fs::remove_file(&artifact.path).unwrap();

        assert!(cache.lookup(&key(2)).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_store_failure_marks_entry_failed() {
        let temp = tempfile::tempdir().unwrap();
        let cache = RenderCache::open(temp.path(), "deck").unwrap();
        fs::remove_dir_all(cache.dir()).unwrap();

        let err = cache.store(&key(9), b"nowhere to go");

        assert!(matches!(err, Err(CacheError::Io(_))));
        assert!(matches!(cache.state(&key(9)), EntryState::Failed(_)));
    }

    #[test]
    fn test_stats() {
        let temp = tempfile::tempdir().unwrap();
        let cache = RenderCache::open(temp.path(), "deck").unwrap();

        cache.store(&key(1), b"1").unwrap();
        cache.lookup(&key(1));
        cache.lookup(&key(2));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.stores, 1);
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[test]
    fn test_readers_never_observe_partial_artifacts() {
        let temp = tempfile::tempdir().unwrap();
        let cache = RenderCache::open(temp.path(), "deck").unwrap();
        let payload = vec![7u8; 512 * 1024];
        let path = cache.dir().join(key(0).file_name());

        let writer = {
            let cache = cache.clone();
            let payload = payload.clone();
            thread::spawn(move || {
                for _ in 0..20 {
                    cache.store(&key(0), &payload).unwrap();
                }
            })
        };

        while !writer.is_finished() {
            if let Ok(bytes) = fs::read(&path) {
                assert_eq!(bytes.len(), payload.len());
            }
        }
        writer.join().unwrap();

        assert_eq!(fs::read(&path).unwrap(), payload);
    }
}
