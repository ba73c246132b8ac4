//! The cache manager façade.
//!
//! The only object callers interact with. A fetch walks the tiers in cost
//! order: memory first (never waits on disk), then the request coordinator
//! so concurrent callers share one underlying computation, then the disk
//! store, and only then the caller-supplied operation. Successful results
//! are written back to memory and, for persistable namespaces, to disk.
//!
//! Managers are constructed explicitly and handed to collaborators; there
//! is no process-wide instance, so tests get fully isolated caches.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use stryde_core::{
    bootstrap_store_at, verify_markers_at, BootstrapOutcome, CacheConfig, CacheEntry, CacheError,
    CacheKey, CacheResult, Cacheable, TypedPayload, VersionGated,
};

use crate::coordinator::RequestCoordinator;
use crate::disk::DiskStore;
use crate::memory::MemoryStore;

/// Read-only counters for diagnostics surfaces.
///
/// Hits are memory-tier hits; every fetch that has to go through the
/// coordinator counts as a miss, including the ones that are then satisfied
/// from disk or from a coalesced in-flight computation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStatistics {
    /// Fetches answered from the memory store within TTL.
    pub hit_count: u64,
    /// Fetches that fell through the memory store.
    pub miss_count: u64,
    /// Fetches that joined another caller's in-flight computation.
    pub deduped_count: u64,
    /// Envelopes currently persisted on disk.
    pub disk_entry_count: u64,
    /// Entries currently live in memory.
    pub memory_entry_count: u64,
}

impl CacheStatistics {
    /// Memory hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }
}

/// Result of running the startup sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    /// Version-protocol outcome for the disk store, if one is configured.
    pub outcome: Option<BootstrapOutcome>,
    /// Disk entries promoted into memory.
    pub loaded_entries: u64,
    /// Disk entries discarded during load.
    pub discarded_entries: u64,
    /// Stores whose markers still disagree with the registry afterwards.
    pub marker_mismatches: u32,
}

/// Two-tier cache with request coalescing and version-gated persistence.
///
/// # Example
///
/// ```ignore
/// let cache = CacheManager::new(
///     CacheConfig::new()
///         .with_disk_path(data_dir.join("cache"))
///         .with_persistable_namespace("activities"),
/// );
/// cache.bootstrap(&[]).await?;
///
/// let key = CacheKey::new("activities", "strava", &["7d"])?;
/// let rides: RideSummary = cache
///     .fetch(&key, Duration::from_secs(3600), || client.load_rides())
///     .await?;
/// ```
pub struct CacheManager {
    config: CacheConfig,
    memory: Arc<MemoryStore>,
    disk: Option<Arc<DiskStore>>,
    coordinator: RequestCoordinator,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheManager {
    /// Build a manager from `config`.
    ///
    /// A disk store that cannot be opened (even after its internal rebuild
    /// attempt) downgrades the manager to memory-only operation; the cache
    /// stays functional, just not durable.
    pub fn new(config: CacheConfig) -> Self {
        let memory = Arc::new(MemoryStore::new(&config));
        let disk = match &config.disk_path {
            Some(path) => match DiskStore::open(path, &config) {
                Ok(store) => Some(Arc::new(store)),
                Err(e) => {
                    tracing::error!(
                        path = %path.display(),
                        error = %e,
                        "disk store unavailable, running memory-only"
                    );
                    None
                }
            },
            None => None,
        };

        Self {
            config,
            memory,
            disk,
            coordinator: RequestCoordinator::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Run the startup sequence: version protocol on the disk store, then
    /// promotion of surviving entries into memory, then marker
    /// verification across the disk store and any collaborator stores
    /// (e.g. the aggregate store).
    pub async fn bootstrap(
        &self,
        collaborators: &[&dyn VersionGated],
    ) -> CacheResult<BootstrapReport> {
        let mut report = BootstrapReport::default();

        if let Some(disk) = &self.disk {
            report.outcome = Some(bootstrap_store_at(&**disk, self.config.schema_version)?);
            let load = disk.load_into(&self.memory)?;
            report.loaded_entries = load.loaded;
            report.discarded_entries = load.discarded;

            let mut stores: Vec<&dyn VersionGated> = vec![&**disk];
            stores.extend_from_slice(collaborators);
            report.marker_mismatches =
                verify_markers_at(&stores, self.config.schema_version);
        } else {
            report.marker_mismatches =
                verify_markers_at(collaborators, self.config.schema_version);
        }

        tracing::info!(
            loaded = report.loaded_entries,
            discarded = report.discarded_entries,
            mismatches = report.marker_mismatches,
            "cache bootstrap complete"
        );
        Ok(report)
    }

    /// Fetch the value for `key`, recomputing via `operation` on a miss.
    ///
    /// Memory hits within `ttl` return immediately. Otherwise the call is
    /// coalesced per key: one concurrent caller runs the disk re-check and,
    /// if needed, `operation`; everyone else awaits the same result.
    /// Operation failures propagate to every waiter and nothing is cached.
    pub async fn fetch<T, F, Fut, E>(
        &self,
        key: &CacheKey,
        ttl: Duration,
        operation: F,
    ) -> CacheResult<T>
    where
        T: Cacheable,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        match self.memory.get(key) {
            Ok(Some(entry)) if entry.is_fresh(ttl) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return entry.payload.decode(key);
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "memory read failed, treating as miss");
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let fetch_key = key.clone();
        let memory = Arc::clone(&self.memory);
        let disk = self.disk.clone();
        let persistable = self.config.is_persistable(key.namespace());

        let entry = self
            .coordinator
            .coalesce(key, move || {
                Self::refill(fetch_key, ttl, memory, disk, persistable, operation)
            })
            .await?;
        entry.payload.decode(key)
    }

    /// The coalesced slow path: re-check memory, then disk, then run the
    /// operation and write back.
    async fn refill<T, F, Fut, E>(
        key: CacheKey,
        ttl: Duration,
        memory: Arc<MemoryStore>,
        disk: Option<Arc<DiskStore>>,
        persistable: bool,
        operation: F,
    ) -> CacheResult<CacheEntry>
    where
        T: Cacheable,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        // A previous leader may have landed a fresh entry between our
        // memory miss and this future starting.
        match memory.get(&key) {
            Ok(Some(existing)) if existing.is_fresh(ttl) => return Ok(existing),
            Ok(_) => {}
            Err(e) => tracing::warn!(key = %key, error = %e, "memory re-check failed"),
        }

        if let Some(disk) = &disk {
            match disk.get(&key) {
                Ok(Some(stored)) if stored.is_fresh(ttl) => {
                    tracing::debug!(key = %key, "disk hit, promoting to memory");
                    if let Err(e) = memory.insert(key.clone(), stored.clone()) {
                        tracing::warn!(key = %key, error = %e, "memory promotion failed");
                    }
                    return Ok(stored);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "disk read failed, treating as miss");
                }
            }
        }

        let value = operation().await.map_err(CacheError::operation)?;
        let entry = CacheEntry::new(TypedPayload::encode(&key, &value)?);

        match memory.insert(key.clone(), entry.clone()) {
            Ok(true) => {
                if persistable {
                    if let Some(disk) = &disk {
                        if let Err(e) = disk.save(&key, &entry) {
                            tracing::warn!(
                                key = %key,
                                error = %e,
                                "disk persist failed; memory entry retained"
                            );
                        }
                    }
                }
            }
            Ok(false) => {
                tracing::debug!(key = %key, "fetch result superseded by a newer write");
            }
            Err(e) => tracing::warn!(key = %key, error = %e, "memory write failed"),
        }

        Ok(entry)
    }

    /// True when a fresh entry for `key` exists in memory under `ttl`.
    ///
    /// Pure inspection: no recency promotion, no I/O, no operation.
    pub fn is_valid(&self, key: &CacheKey, ttl: Duration) -> bool {
        matches!(self.memory.peek(key), Ok(Some(entry)) if entry.is_fresh(ttl))
    }

    /// Remove `key` from both tiers. Invalidating an absent key is a no-op.
    pub async fn invalidate(&self, key: &CacheKey) -> CacheResult<()> {
        self.memory.remove(key)?;
        if let Some(disk) = &self.disk {
            disk.remove(key)?;
        }
        Ok(())
    }

    /// Remove every entry in `namespace` from both tiers. Returns the
    /// total number of entries removed across the tiers.
    pub async fn invalidate_namespace(&self, namespace: &str) -> CacheResult<u64> {
        let mut removed = self.memory.remove_namespace(namespace)?;
        if let Some(disk) = &self.disk {
            removed += disk.remove_namespace(namespace)?;
        }
        Ok(removed)
    }

    /// Empty both tiers unconditionally.
    pub async fn clear_all(&self) -> CacheResult<()> {
        self.memory.clear()?;
        if let Some(disk) = &self.disk {
            disk.clear()?;
        }
        tracing::info!("cache cleared");
        Ok(())
    }

    /// Current counters.
    pub fn statistics(&self) -> CacheStatistics {
        CacheStatistics {
            hit_count: self.hits.load(Ordering::Relaxed),
            miss_count: self.misses.load(Ordering::Relaxed),
            deduped_count: self.coordinator.deduped_count(),
            disk_entry_count: self
                .disk
                .as_ref()
                .and_then(|disk| disk.entry_count().ok())
                .unwrap_or(0),
            memory_entry_count: self.memory.len().unwrap_or(0) as u64,
        }
    }
}
