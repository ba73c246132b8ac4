//! LMDB-backed durable cache tier.
//!
//! Uses the heed crate (Rust bindings for LMDB) to mirror a caller-designated
//! subset of cache entries across process restarts.
//!
//! # Layout
//!
//! Three named databases inside one environment:
//! - `envelopes`: rendered key bytes -> serialized [`VersionedEnvelope`]
//! - `meta`: rendered key bytes -> `cached_at` millis (little-endian i64),
//!   a side-table so eviction-order scans never deserialize payloads
//! - `registry`: a single scalar holding the store's last-applied schema
//!   version
//!
//! # Corruption
//!
//! A store that cannot be opened or parsed is rebuilt from empty rather
//! than surfacing an error; individual corrupt envelopes are discarded on
//! read. Both paths are logged and degrade to cache misses. A broken disk
//! tier can make the cache slow, never wrong.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};

use stryde_core::{
    CacheConfig, CacheEntry, CacheError, CacheKey, CacheResult, VersionGated, VersionedEnvelope,
};

use crate::memory::MemoryStore;

const STORE_NAME: &str = "disk";
const VERSION_KEY: &[u8] = b"schema_version";

/// Result of loading persisted entries at bootstrap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Entries promoted into the memory store.
    pub loaded: u64,
    /// Entries discarded: corrupt, unparseable keys, or past retention.
    pub discarded: u64,
}

/// Durable mirror of persistable cache entries.
pub struct DiskStore {
    env: Env,
    envelopes: Database<Bytes, Bytes>,
    meta: Database<Bytes, Bytes>,
    registry: Database<Bytes, Bytes>,
    /// Sum of stored envelope byte lengths; kept in step with commits.
    total_bytes: AtomicU64,
    max_bytes: u64,
    retention: Duration,
    schema_version: u32,
}

impl DiskStore {
    /// Open (or create) the store at `path`.
    ///
    /// An environment that cannot be opened is wiped and rebuilt from
    /// empty: persisted cache data is always recomputable, so losing it is
    /// preferable to failing the caller.
    pub fn open<P: AsRef<Path>>(path: P, config: &CacheConfig) -> CacheResult<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path).map_err(Self::err)?;

        let env = match Self::open_env(path, config) {
            Ok(env) => env,
            Err(first) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %first,
                    "disk store unreadable, rebuilding from empty"
                );
                std::fs::remove_dir_all(path).map_err(Self::err)?;
                std::fs::create_dir_all(path).map_err(Self::err)?;
                Self::open_env(path, config).map_err(|e| CacheError::store(STORE_NAME, e))?
            }
        };

        let mut wtxn = env.write_txn().map_err(Self::err)?;
        let envelopes = env
            .create_database(&mut wtxn, Some("envelopes"))
            .map_err(Self::err)?;
        let meta = env
            .create_database(&mut wtxn, Some("meta"))
            .map_err(Self::err)?;
        let registry = env
            .create_database(&mut wtxn, Some("registry"))
            .map_err(Self::err)?;
        wtxn.commit().map_err(Self::err)?;

        let store = Self {
            env,
            envelopes,
            meta,
            registry,
            total_bytes: AtomicU64::new(0),
            max_bytes: config.max_disk_bytes as u64,
            retention: config.max_disk_retention,
            schema_version: config.schema_version,
        };
        store.recompute_total_bytes()?;
        Ok(store)
    }

    fn open_env(path: &Path, config: &CacheConfig) -> Result<Env, heed::Error> {
        // The LMDB map bounds the file; logical eviction keeps usage under
        // max_disk_bytes well before the map fills.
        let map_size = config.max_disk_bytes.saturating_mul(2).max(8 * 1024 * 1024);
        unsafe { EnvOpenOptions::new().map_size(map_size).max_dbs(3).open(path) }
    }

    /// Read one entry. Corrupt or version-mismatched envelopes are
    /// discarded and reported as absent.
    pub fn get(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>> {
        let parsed = {
            let rtxn = self.env.read_txn().map_err(Self::err)?;
            self.envelopes
                .get(&rtxn, key.encode())
                .map_err(Self::err)?
                .map(VersionedEnvelope::from_bytes)
        };

        match parsed {
            None => Ok(None),
            Some(Ok(envelope)) => match envelope.open(self.schema_version) {
                Some(entry) => Ok(Some(entry)),
                None => {
                    tracing::warn!(key = %key, "stale schema version on disk entry, discarding");
                    self.remove(key)?;
                    Ok(None)
                }
            },
            Some(Err(e)) => {
                tracing::warn!(key = %key, error = %e, "corrupt disk envelope, discarding");
                self.remove(key)?;
                Ok(None)
            }
        }
    }

    /// Persist one entry, replacing any prior envelope for the key.
    ///
    /// Writes that would regress the key's `cached_at` are dropped. When
    /// the byte budget would be exceeded, the oldest envelopes (by
    /// `cached_at`, ties broken by lexical key order) are evicted first.
    pub fn save(&self, key: &CacheKey, entry: &CacheEntry) -> CacheResult<()> {
        let envelope = VersionedEnvelope::seal(entry, self.schema_version);
        let bytes = envelope.to_bytes().map_err(|e| match e {
            CacheError::Serialization { reason, .. } => CacheError::Serialization {
                key: key.as_str().to_string(),
                reason,
            },
            other => other,
        })?;
        let new_len = bytes.len() as u64;
        if new_len > self.max_bytes {
            return Err(CacheError::store(
                STORE_NAME,
                format!("envelope for {key} exceeds the disk byte budget"),
            ));
        }

        let new_ts = entry.cached_at.timestamp_millis();
        let (replaced_len, victims) = {
            let rtxn = self.env.read_txn().map_err(Self::err)?;

            if let Some(prev) = self.meta.get(&rtxn, key.encode()).map_err(Self::err)? {
                if decode_ts(prev).is_some_and(|prev_ts| prev_ts > new_ts) {
                    // A newer completion already landed; keep it.
                    return Ok(());
                }
            }

            let replaced_len = self
                .envelopes
                .get(&rtxn, key.encode())
                .map_err(Self::err)?
                .map(|v| v.len() as u64)
                .unwrap_or(0);

            let budget_after = self
                .total_bytes
                .load(Ordering::Relaxed)
                .saturating_sub(replaced_len)
                .saturating_add(new_len);
            let victims = if budget_after > self.max_bytes {
                self.select_victims(&rtxn, key, budget_after - self.max_bytes)?
            } else {
                Vec::new()
            };
            (replaced_len, victims)
        };

        let mut freed = 0u64;
        let mut wtxn = self.env.write_txn().map_err(Self::err)?;
        for (victim, len) in &victims {
            self.envelopes.delete(&mut wtxn, victim).map_err(Self::err)?;
            self.meta.delete(&mut wtxn, victim).map_err(Self::err)?;
            freed += len;
        }
        self.envelopes
            .put(&mut wtxn, key.encode(), &bytes)
            .map_err(Self::err)?;
        self.meta
            .put(&mut wtxn, key.encode(), &new_ts.to_le_bytes())
            .map_err(Self::err)?;
        wtxn.commit().map_err(Self::err)?;

        if !victims.is_empty() {
            tracing::debug!(evicted = victims.len(), "disk store evicted oldest envelopes");
        }

        let total = self.total_bytes.load(Ordering::Relaxed);
        self.total_bytes.store(
            total
                .saturating_sub(replaced_len)
                .saturating_sub(freed)
                .saturating_add(new_len),
            Ordering::Relaxed,
        );
        Ok(())
    }

    /// Pick eviction victims, oldest `cached_at` first, ascending lexical
    /// key order on ties, until at least `needed` bytes are freed.
    fn select_victims(
        &self,
        rtxn: &heed::RoTxn<'_>,
        incoming: &CacheKey,
        needed: u64,
    ) -> CacheResult<Vec<(Vec<u8>, u64)>> {
        let mut candidates: Vec<(i64, Vec<u8>)> = Vec::new();
        for item in self.meta.iter(rtxn).map_err(Self::err)? {
            let (kb, vb) = item.map_err(Self::err)?;
            if kb == incoming.encode() {
                continue;
            }
            if let Some(ts) = decode_ts(vb) {
                candidates.push((ts, kb.to_vec()));
            }
        }
        candidates.sort();

        let mut victims = Vec::new();
        let mut freed = 0u64;
        for (_, kb) in candidates {
            if freed >= needed {
                break;
            }
            let len = self
                .envelopes
                .get(rtxn, &kb)
                .map_err(Self::err)?
                .map(|v| v.len() as u64)
                .unwrap_or(0);
            freed += len;
            victims.push((kb, len));
        }
        Ok(victims)
    }

    /// Load every valid persisted entry into the memory store.
    ///
    /// Runs after the version protocol. Entries that fail to parse or have
    /// outlived the retention window are deleted; an envelope carrying a
    /// foreign schema version purges the entire store, since the marker and
    /// the data can only disagree if a previous bootstrap was interrupted.
    pub fn load_into(&self, memory: &MemoryStore) -> CacheResult<LoadReport> {
        let mut report = LoadReport::default();
        let mut doomed: Vec<Vec<u8>> = Vec::new();

        let collected: Result<Vec<(Vec<u8>, Vec<u8>)>, heed::Error> = (|| {
            let rtxn = self.env.read_txn()?;
            let mut rows = Vec::new();
            for item in self.envelopes.iter(&rtxn)? {
                let (kb, vb) = item?;
                rows.push((kb.to_vec(), vb.to_vec()));
            }
            Ok(rows)
        })();

        let rows = match collected {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(error = %e, "disk store scan failed, treating store as empty");
                self.clear()?;
                return Ok(report);
            }
        };

        for (kb, vb) in rows {
            let key = match CacheKey::decode(&kb) {
                Ok(key) => key,
                Err(e) => {
                    tracing::warn!(error = %e, "unreadable key in disk store, discarding");
                    doomed.push(kb);
                    report.discarded += 1;
                    continue;
                }
            };

            let envelope = match VersionedEnvelope::from_bytes(&vb) {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "corrupt disk envelope, discarding");
                    doomed.push(kb);
                    report.discarded += 1;
                    continue;
                }
            };

            if envelope.schema_version != self.schema_version {
                tracing::warn!(
                    key = %key,
                    stored = envelope.schema_version,
                    current = self.schema_version,
                    "schema version drift inside disk store, purging"
                );
                self.clear()?;
                return Ok(LoadReport {
                    loaded: 0,
                    discarded: report.discarded + report.loaded + 1,
                });
            }

            let entry = match envelope.open(self.schema_version) {
                Some(entry) => entry,
                None => continue,
            };

            if entry.age() > self.retention {
                tracing::debug!(key = %key, "disk entry past retention window, discarding");
                doomed.push(kb);
                report.discarded += 1;
                continue;
            }

            if memory.insert(key, entry)? {
                report.loaded += 1;
            }
        }

        if !doomed.is_empty() {
            let mut wtxn = self.env.write_txn().map_err(Self::err)?;
            for kb in &doomed {
                self.envelopes.delete(&mut wtxn, kb).map_err(Self::err)?;
                self.meta.delete(&mut wtxn, kb).map_err(Self::err)?;
            }
            wtxn.commit().map_err(Self::err)?;
            self.recompute_total_bytes()?;
        }

        Ok(report)
    }

    /// Delete one entry. Returns whether it was present.
    pub fn remove(&self, key: &CacheKey) -> CacheResult<bool> {
        let freed = {
            let rtxn = self.env.read_txn().map_err(Self::err)?;
            self.envelopes
                .get(&rtxn, key.encode())
                .map_err(Self::err)?
                .map(|v| v.len() as u64)
        };

        let mut wtxn = self.env.write_txn().map_err(Self::err)?;
        let deleted = self
            .envelopes
            .delete(&mut wtxn, key.encode())
            .map_err(Self::err)?;
        self.meta.delete(&mut wtxn, key.encode()).map_err(Self::err)?;
        wtxn.commit().map_err(Self::err)?;

        if let Some(freed) = freed {
            let total = self.total_bytes.load(Ordering::Relaxed);
            self.total_bytes
                .store(total.saturating_sub(freed), Ordering::Relaxed);
        }
        Ok(deleted)
    }

    /// Delete every entry in a namespace. Returns the count removed.
    pub fn remove_namespace(&self, namespace: &str) -> CacheResult<u64> {
        let prefix = CacheKey::namespace_prefix(namespace);
        let doomed: Vec<Vec<u8>> = {
            let rtxn = self.env.read_txn().map_err(Self::err)?;
            let mut keys = Vec::new();
            for item in self.envelopes.iter(&rtxn).map_err(Self::err)? {
                let (kb, _) = item.map_err(Self::err)?;
                if kb.starts_with(&prefix) {
                    keys.push(kb.to_vec());
                }
            }
            keys
        };

        let mut wtxn = self.env.write_txn().map_err(Self::err)?;
        let mut removed = 0u64;
        for kb in &doomed {
            if self.envelopes.delete(&mut wtxn, kb).map_err(Self::err)? {
                removed += 1;
            }
            self.meta.delete(&mut wtxn, kb).map_err(Self::err)?;
        }
        wtxn.commit().map_err(Self::err)?;

        if removed > 0 {
            self.recompute_total_bytes()?;
        }
        Ok(removed)
    }

    /// Drop every persisted entry, leaving the version marker in place.
    pub fn clear(&self) -> CacheResult<()> {
        let mut wtxn = self.env.write_txn().map_err(Self::err)?;
        self.envelopes.clear(&mut wtxn).map_err(Self::err)?;
        self.meta.clear(&mut wtxn).map_err(Self::err)?;
        wtxn.commit().map_err(Self::err)?;
        self.total_bytes.store(0, Ordering::Relaxed);
        Ok(())
    }

    /// Number of persisted envelopes.
    pub fn entry_count(&self) -> CacheResult<u64> {
        let rtxn = self.env.read_txn().map_err(Self::err)?;
        self.envelopes.len(&rtxn).map_err(Self::err)
    }

    /// Aggregate size of persisted envelopes in bytes.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }

    fn recompute_total_bytes(&self) -> CacheResult<()> {
        let summed: Result<u64, heed::Error> = (|| {
            let rtxn = self.env.read_txn()?;
            let mut total = 0u64;
            for item in self.envelopes.iter(&rtxn)? {
                let (_, vb) = item?;
                total += vb.len() as u64;
            }
            Ok(total)
        })();

        match summed {
            Ok(total) => {
                self.total_bytes.store(total, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "disk store size scan failed, clearing store");
                self.clear()
            }
        }
    }

    fn err(e: impl ToString) -> CacheError {
        CacheError::store(STORE_NAME, e.to_string())
    }
}

impl VersionGated for DiskStore {
    fn store_name(&self) -> &'static str {
        STORE_NAME
    }

    fn read_marker(&self) -> CacheResult<Option<u32>> {
        let rtxn = self.env.read_txn().map_err(Self::err)?;
        let marker = self
            .registry
            .get(&rtxn, VERSION_KEY)
            .map_err(Self::err)?
            .and_then(|bytes| bytes.try_into().ok())
            .map(u32::from_le_bytes);
        Ok(marker)
    }

    fn write_marker(&self, version: u32) -> CacheResult<()> {
        let mut wtxn = self.env.write_txn().map_err(Self::err)?;
        self.registry
            .put(&mut wtxn, VERSION_KEY, &version.to_le_bytes())
            .map_err(Self::err)?;
        wtxn.commit().map_err(Self::err)
    }

    fn purge(&self) -> CacheResult<()> {
        self.clear()
    }
}

fn decode_ts(bytes: &[u8]) -> Option<i64> {
    bytes.try_into().ok().map(i64::from_le_bytes)
}
