//! In-memory cache tier.
//!
//! A bounded, thread-safe LRU map from [`CacheKey`] to [`CacheEntry`]. This
//! is the fast path for every lookup: no I/O, eviction runs synchronously
//! inside the insert call, and the only cost to other callers is the map
//! lock.

use std::sync::Mutex;

use lru::LruCache;
use stryde_core::{CacheConfig, CacheEntry, CacheError, CacheKey, CacheResult};

/// Bounded LRU store for live cache entries.
///
/// Entries are held unbounded in the underlying map and trimmed manually
/// after each insert, so the byte accounting stays exact even when both the
/// item-count and byte budgets are in play.
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
    max_entries: usize,
    max_bytes: usize,
}

struct MemoryInner {
    entries: LruCache<CacheKey, CacheEntry>,
    total_bytes: usize,
    evictions: u64,
}

impl MemoryStore {
    /// Create a store with the budgets from `config`.
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                entries: LruCache::unbounded(),
                total_bytes: 0,
                evictions: 0,
            }),
            max_entries: config.max_memory_entries.max(1),
            max_bytes: config.max_memory_bytes,
        }
    }

    /// Look up an entry, promoting it to most-recently-used.
    pub fn get(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>> {
        let mut inner = self.lock()?;
        Ok(inner.entries.get(key).cloned())
    }

    /// Look up an entry without touching recency. Used by pure inspection
    /// paths that must have no side effects.
    pub fn peek(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>> {
        let inner = self.lock()?;
        Ok(inner.entries.peek(key).cloned())
    }

    /// Insert or overwrite an entry, then trim to budget.
    ///
    /// Returns `false` without writing when the store already holds a
    /// newer entry for the key: `cached_at` is monotonically non-decreasing
    /// per key, so an out-of-order completion can never regress freshness.
    pub fn insert(&self, key: CacheKey, entry: CacheEntry) -> CacheResult<bool> {
        let mut inner = self.lock()?;

        let existing = inner
            .entries
            .peek(&key)
            .map(|e| (e.cached_at, e.size_bytes()));
        if let Some((existing_at, existing_size)) = existing {
            if existing_at > entry.cached_at {
                return Ok(false);
            }
            inner.total_bytes = inner.total_bytes.saturating_sub(existing_size);
        }

        inner.total_bytes += entry.size_bytes();
        inner.entries.put(key, entry);

        while inner.entries.len() > self.max_entries || inner.total_bytes > self.max_bytes {
            match inner.entries.pop_lru() {
                Some((_, evicted)) => {
                    inner.total_bytes = inner.total_bytes.saturating_sub(evicted.size_bytes());
                    inner.evictions += 1;
                }
                None => break,
            }
        }

        Ok(true)
    }

    /// Remove one entry. Returns whether it was present.
    pub fn remove(&self, key: &CacheKey) -> CacheResult<bool> {
        let mut inner = self.lock()?;
        match inner.entries.pop(key) {
            Some(entry) => {
                let size = entry.size_bytes();
                inner.total_bytes = inner.total_bytes.saturating_sub(size);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Remove every entry in a namespace. Returns the count removed.
    pub fn remove_namespace(&self, namespace: &str) -> CacheResult<u64> {
        let mut inner = self.lock()?;
        let doomed: Vec<CacheKey> = inner
            .entries
            .iter()
            .filter(|(key, _)| key.in_namespace(namespace))
            .map(|(key, _)| key.clone())
            .collect();

        let mut removed = 0;
        for key in doomed {
            if let Some(entry) = inner.entries.pop(&key) {
                let size = entry.size_bytes();
                inner.total_bytes = inner.total_bytes.saturating_sub(size);
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Drop all entries.
    pub fn clear(&self) -> CacheResult<()> {
        let mut inner = self.lock()?;
        inner.entries.clear();
        inner.total_bytes = 0;
        Ok(())
    }

    /// Number of live entries.
    pub fn len(&self) -> CacheResult<usize> {
        Ok(self.lock()?.entries.len())
    }

    /// True when the store holds no entries.
    pub fn is_empty(&self) -> CacheResult<bool> {
        Ok(self.lock()?.entries.is_empty())
    }

    /// Total evictions since creation.
    pub fn evictions(&self) -> CacheResult<u64> {
        Ok(self.lock()?.evictions)
    }

    fn lock(&self) -> CacheResult<std::sync::MutexGuard<'_, MemoryInner>> {
        self.inner.lock().map_err(|_| CacheError::LockPoisoned)
    }
}
