//! Content-addressed on-disk store with single-flight computation.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::fingerprint::Fingerprint;

/// Errors from the cache store.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Kind of entry. Each namespace is a directory under the cache root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Documents,
    Scripts,
    Clips,
}

impl Namespace {
    pub const ALL: [Namespace; 3] = [Namespace::Documents, Namespace::Scripts, Namespace::Clips];

    pub fn dir_name(&self) -> &'static str {
        match self {
            Namespace::Documents => "documents",
            Namespace::Scripts => "scripts",
            Namespace::Clips => "clips",
        }
    }
}

/// Cache settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Entries kept per namespace before the least recently used is dropped.
    pub max_entries: Option<usize>,
}

/// Hit/miss counters.
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}

type KeyLock = Arc<tokio::sync::Mutex<()>>;
type EntryKey = (Namespace, Fingerprint);

/// Pipeline cache shared by all jobs.
///
/// Entries are JSON documents, optionally paired with a binary blob (clip
/// audio). An entry becomes visible only once its JSON file is renamed into
/// place, and is never rewritten afterwards. Entries pinned by a running
/// job are skipped by eviction until the job releases them.
pub struct PipelineCache {
    root: PathBuf,
    locks: Mutex<HashMap<EntryKey, KeyLock>>,
    capacity: Option<NonZeroUsize>,
    recency: Mutex<HashMap<Namespace, LruCache<Fingerprint, ()>>>,
    pins: Mutex<HashMap<String, HashSet<EntryKey>>>,
    pub stats: CacheStats,
}

impl PipelineCache {
    /// Open (or create) a cache rooted at `root`.
    pub fn open(root: impl Into<PathBuf>, config: &CacheConfig) -> Result<Self, CacheError> {
        let root = root.into();
        let capacity = config.max_entries.and_then(NonZeroUsize::new);
        let mut lists = HashMap::new();

        for ns in Namespace::ALL {
            let dir = root.join(ns.dir_name());
            std::fs::create_dir_all(&dir)?;
            if capacity.is_some() {
                let mut lru = LruCache::unbounded();
                for fp in Self::existing_entries(&dir)? {
                    lru.put(fp, ());
                }
                lists.insert(ns, lru);
            }
        }

        let cache = Self {
            root,
            locks: Mutex::new(HashMap::new()),
            capacity,
            recency: Mutex::new(lists),
            pins: Mutex::new(HashMap::new()),
            stats: CacheStats::default(),
        };
        for ns in Namespace::ALL {
            cache.trim(ns);
        }
        Ok(cache)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Existing entries of a namespace directory, oldest first.
    fn existing_entries(dir: &Path) -> Result<Vec<Fingerprint>, CacheError> {
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json")
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
                && !stem.starts_with('.')
            {
                let modified = std::fs::metadata(&path)?.modified()?;
                entries.push((modified, Fingerprint::from_hex(stem)));
            }
        }
        entries.sort_by_key(|(modified, _)| *modified);
        Ok(entries.into_iter().map(|(_, fp)| fp).collect())
    }

    fn entry_path(&self, ns: Namespace, fp: &Fingerprint) -> PathBuf {
        self.root.join(ns.dir_name()).join(format!("{fp}.json"))
    }

    /// Path of the binary blob paired with an entry.
    pub fn blob_path(&self, ns: Namespace, fp: &Fingerprint) -> PathBuf {
        self.root.join(ns.dir_name()).join(format!("{fp}.wav"))
    }

    /// Whether an entry exists, without counting a hit or miss.
    pub fn contains(&self, ns: Namespace, fp: &Fingerprint) -> bool {
        self.entry_path(ns, fp).exists()
    }

    /// Read an entry.
    pub fn get<T: DeserializeOwned>(
        &self,
        ns: Namespace,
        fp: &Fingerprint,
    ) -> Result<Option<T>, CacheError> {
        let path = self.entry_path(ns, fp);
        let json = match std::fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        self.stats.hits.fetch_add(1, Ordering::Relaxed);
        self.touch(ns, fp);
        Ok(Some(serde_json::from_str(&json)?))
    }

    /// Write an entry unless one already exists; returns the stored value.
    pub fn insert_if_absent<T: Serialize + DeserializeOwned>(
        &self,
        ns: Namespace,
        fp: &Fingerprint,
        value: T,
    ) -> Result<T, CacheError> {
        if let Some(existing) = self.get(ns, fp)? {
            return Ok(existing);
        }
        self.write_entry(ns, fp, &value)?;
        Ok(value)
    }

    /// Write the blob for an entry. Call before the entry itself is written.
    pub fn write_blob(&self, ns: Namespace, fp: &Fingerprint, bytes: &[u8]) -> Result<PathBuf, CacheError> {
        let path = self.blob_path(ns, fp);
        self.write_atomic(&path, bytes)?;
        Ok(path)
    }

    pub fn read_blob(&self, ns: Namespace, fp: &Fingerprint) -> Result<Vec<u8>, CacheError> {
        Ok(std::fs::read(self.blob_path(ns, fp))?)
    }

    /// Return the cached value for `fp`, or run `compute` and store its
    /// result. Concurrent callers for the same key wait for the first one.
    /// The flag is `true` on a cache hit.
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        ns: Namespace,
        fp: &Fingerprint,
        compute: F,
    ) -> Result<(T, bool), E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let lock = self.key_lock(ns, fp);
        let guard = lock.lock().await;

        let result = match self.get(ns, fp) {
            Ok(Some(value)) => {
                debug!(namespace = ns.dir_name(), key = %fp.short(), "cache hit");
                Ok((value, true))
            }
            Ok(None) => match compute().await {
                Ok(value) => self.write_entry(ns, fp, &value).map(|_| (value, false)).map_err(E::from),
                Err(e) => Err(e),
            },
            Err(e) => Err(E::from(e)),
        };

        drop(guard);
        self.release_lock(ns, fp, lock);
        result
    }

    /// Keep `fp` from being evicted until `owner` calls [`Self::release`].
    /// Pin before the entry is written so a concurrent insert cannot evict
    /// it in between.
    pub fn pin(&self, owner: &str, ns: Namespace, fp: &Fingerprint) {
        self.pins
            .lock()
            .entry(owner.to_string())
            .or_default()
            .insert((ns, fp.clone()));
    }

    /// Drop every pin held by `owner` and evict anything now over capacity.
    pub fn release(&self, owner: &str) {
        if self.pins.lock().remove(owner).is_none() {
            return;
        }
        for ns in Namespace::ALL {
            self.trim(ns);
        }
    }

    fn is_pinned(&self, ns: Namespace, fp: &Fingerprint) -> bool {
        let key = (ns, fp.clone());
        self.pins.lock().values().any(|set| set.contains(&key))
    }

    fn key_lock(&self, ns: Namespace, fp: &Fingerprint) -> KeyLock {
        let mut locks = self.locks.lock();
        locks.entry((ns, fp.clone())).or_default().clone()
    }

    fn release_lock(&self, ns: Namespace, fp: &Fingerprint, lock: KeyLock) {
        let mut locks = self.locks.lock();
        // Map plus our handle: nobody else is waiting.
        if Arc::strong_count(&lock) <= 2 {
            locks.remove(&(ns, fp.clone()));
        }
    }

    fn write_entry<T: Serialize>(&self, ns: Namespace, fp: &Fingerprint, value: &T) -> Result<(), CacheError> {
        let path = self.entry_path(ns, fp);
        if path.exists() {
            return Ok(());
        }
        let json = serde_json::to_vec_pretty(value)?;
        self.write_atomic(&path, &json)?;
        self.touch(ns, fp);
        Ok(())
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
        let dir = path.parent().unwrap_or(&self.root);
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("entry");
        let tmp = dir.join(format!(".{name}.{}.tmp", uuid::Uuid::new_v4()));
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    fn touch(&self, ns: Namespace, fp: &Fingerprint) {
        if self.capacity.is_none() {
            return;
        }
        self.recency
            .lock()
            .entry(ns)
            .or_insert_with(LruCache::unbounded)
            .put(fp.clone(), ());
        self.trim(ns);
    }

    fn trim(&self, ns: Namespace) {
        let Some(cap) = self.capacity else {
            return;
        };
        let mut lists = self.recency.lock();
        let Some(list) = lists.get_mut(&ns) else {
            return;
        };
        let excess = list.len().saturating_sub(cap.get());
        if excess == 0 {
            return;
        }
        // Least recently used first.
        let victims: Vec<Fingerprint> = list
            .iter()
            .rev()
            .map(|(fp, ())| fp)
            .filter(|fp| !self.is_pinned(ns, fp))
            .take(excess)
            .cloned()
            .collect();
        for fp in victims {
            list.pop(&fp);
            for path in [self.entry_path(ns, &fp), self.blob_path(ns, &fp)] {
                if let Err(e) = std::fs::remove_file(&path)
                    && e.kind() != std::io::ErrorKind::NotFound
                {
                    warn!(path = %path.display(), error = %e, "failed to evict cache entry");
                }
            }
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(namespace = ns.dir_name(), key = %fp.short(), "evicted");
        }
    }
}
