//! Secondary persistence for computed daily aggregates.
//!
//! Structurally independent from the LMDB tier: a flat serde_json file plus
//! a sidecar version marker file. What it must share with the disk store is
//! the schema version registry. Both stores bootstrap against the same
//! constant, so bumping that one number invalidates every persisted byte in
//! the system at once; independent per-store counters cannot drift apart.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use stryde_core::{
    bootstrap_store_at, CacheEntry, CacheError, CacheKey, CacheResult, Cacheable, TypedPayload,
    VersionGated, VersionedEnvelope,
};

const STORE_NAME: &str = "aggregates";
const DATA_FILE: &str = "aggregates.json";
const VERSION_FILE: &str = "VERSION";

/// Durable store for derived daily aggregates (training load, recovery
/// trends, sleep debt). Keys follow the same `namespace:qualifier:params`
/// scheme as the rest of the cache.
pub struct AggregateStore {
    dir: PathBuf,
    schema_version: u32,
    state: RwLock<HashMap<String, VersionedEnvelope>>,
}

impl AggregateStore {
    /// Open the store at `dir` and run the version protocol against
    /// `schema_version` (production callers pass
    /// [`stryde_core::SCHEMA_VERSION`] via their config).
    ///
    /// A data file that cannot be parsed degrades to an empty store.
    pub fn open<P: AsRef<Path>>(dir: P, schema_version: u32) -> CacheResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(Self::err)?;

        let state = match std::fs::read(dir.join(DATA_FILE)) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(map) => map,
                Err(e) => {
                    tracing::warn!(error = %e, "aggregate file unreadable, starting empty");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };

        let store = Self {
            dir,
            schema_version,
            state: RwLock::new(state),
        };
        bootstrap_store_at(&store, schema_version)?;
        Ok(store)
    }

    /// Store one aggregate under `key`, stamped now.
    pub fn put<T: Cacheable>(&self, key: &CacheKey, value: &T) -> CacheResult<()> {
        let payload = TypedPayload::encode(key, value)?;
        let envelope = VersionedEnvelope::seal(&CacheEntry::new(payload), self.schema_version);

        {
            let mut state = self.write_lock()?;
            state.insert(key.as_str().to_string(), envelope);
        }
        self.persist()
    }

    /// Read one aggregate back as its concrete type.
    ///
    /// A version-mismatched or undecodable record reads as absent; a
    /// type-tag mismatch is a loud error, same as the main cache.
    pub fn get<T: Cacheable>(&self, key: &CacheKey) -> CacheResult<Option<T>> {
        let envelope = {
            let state = self.read_lock()?;
            state.get(key.as_str()).cloned()
        };

        let Some(envelope) = envelope else {
            return Ok(None);
        };
        let Some(entry) = envelope.open(self.schema_version) else {
            tracing::warn!(key = %key, "stale schema version on aggregate, discarding");
            self.remove(key)?;
            return Ok(None);
        };

        match entry.payload.decode::<T>(key) {
            Ok(value) => Ok(Some(value)),
            Err(e @ CacheError::TypeMismatch { .. }) => Err(e),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "undecodable aggregate, discarding");
                self.remove(key)?;
                Ok(None)
            }
        }
    }

    /// Delete one aggregate. Returns whether it was present.
    pub fn remove(&self, key: &CacheKey) -> CacheResult<bool> {
        let removed = {
            let mut state = self.write_lock()?;
            state.remove(key.as_str()).is_some()
        };
        if removed {
            self.persist()?;
        }
        Ok(removed)
    }

    /// Drop every aggregate.
    pub fn clear(&self) -> CacheResult<()> {
        {
            let mut state = self.write_lock()?;
            state.clear();
        }
        self.persist()
    }

    /// Number of stored aggregates.
    pub fn len(&self) -> CacheResult<usize> {
        Ok(self.read_lock()?.len())
    }

    /// True when the store holds no aggregates.
    pub fn is_empty(&self) -> CacheResult<bool> {
        Ok(self.read_lock()?.is_empty())
    }

    /// Write the data file atomically: temp file, then rename.
    fn persist(&self) -> CacheResult<()> {
        let bytes = {
            let state = self.read_lock()?;
            serde_json::to_vec(&*state).map_err(Self::err)?
        };
        let tmp = self.dir.join(format!("{DATA_FILE}.tmp"));
        std::fs::write(&tmp, bytes).map_err(Self::err)?;
        std::fs::rename(&tmp, self.dir.join(DATA_FILE)).map_err(Self::err)
    }

    fn read_lock(
        &self,
    ) -> CacheResult<std::sync::RwLockReadGuard<'_, HashMap<String, VersionedEnvelope>>> {
        self.state.read().map_err(|_| CacheError::LockPoisoned)
    }

    fn write_lock(
        &self,
    ) -> CacheResult<std::sync::RwLockWriteGuard<'_, HashMap<String, VersionedEnvelope>>> {
        self.state.write().map_err(|_| CacheError::LockPoisoned)
    }

    fn err(e: impl ToString) -> CacheError {
        CacheError::store(STORE_NAME, e.to_string())
    }
}

impl VersionGated for AggregateStore {
    fn store_name(&self) -> &'static str {
        STORE_NAME
    }

    fn read_marker(&self) -> CacheResult<Option<u32>> {
        match std::fs::read_to_string(self.dir.join(VERSION_FILE)) {
            Ok(text) => match text.trim().parse::<u32>() {
                Ok(version) => Ok(Some(version)),
                Err(_) => {
                    tracing::warn!(store = STORE_NAME, "unparseable version marker");
                    Ok(None)
                }
            },
            Err(_) => Ok(None),
        }
    }

    fn write_marker(&self, version: u32) -> CacheResult<()> {
        std::fs::write(self.dir.join(VERSION_FILE), version.to_string()).map_err(Self::err)
    }

    fn purge(&self) -> CacheResult<()> {
        {
            let mut state = self.write_lock()?;
            state.clear();
        }
        let data = self.dir.join(DATA_FILE);
        if data.exists() {
            std::fs::remove_file(&data).map_err(Self::err)?;
        }
        Ok(())
    }
}
