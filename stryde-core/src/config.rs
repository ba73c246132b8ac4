//! Cache configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::version::SCHEMA_VERSION;

/// Configuration for the cache manager and its stores.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries held in memory.
    pub max_memory_entries: usize,
    /// Aggregate byte budget for the memory store.
    pub max_memory_bytes: usize,
    /// Aggregate byte budget for persisted envelopes on disk.
    pub max_disk_bytes: usize,
    /// Maximum retention for disk entries, independent of any serving TTL.
    pub max_disk_retention: Duration,
    /// Namespaces whose entries are mirrored to the disk store.
    pub persistable_namespaces: Vec<String>,
    /// Directory for the disk store; `None` runs memory-only.
    pub disk_path: Option<PathBuf>,
    /// Schema version applied to persisted envelopes. Defaults to
    /// [`SCHEMA_VERSION`]; only upgrade-simulation tests override it.
    pub schema_version: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_memory_entries: 512,
            max_memory_bytes: 8 * 1024 * 1024,
            max_disk_bytes: 64 * 1024 * 1024,
            max_disk_retention: Duration::from_secs(30 * 24 * 60 * 60),
            persistable_namespaces: Vec::new(),
            disk_path: None,
            schema_version: SCHEMA_VERSION,
        }
    }
}

impl CacheConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the memory entry budget.
    pub fn with_max_memory_entries(mut self, max: usize) -> Self {
        self.max_memory_entries = max;
        self
    }

    /// Set the memory byte budget.
    pub fn with_max_memory_bytes(mut self, bytes: usize) -> Self {
        self.max_memory_bytes = bytes;
        self
    }

    /// Set the disk byte budget.
    pub fn with_max_disk_bytes(mut self, bytes: usize) -> Self {
        self.max_disk_bytes = bytes;
        self
    }

    /// Set the disk retention window.
    pub fn with_max_disk_retention(mut self, retention: Duration) -> Self {
        self.max_disk_retention = retention;
        self
    }

    /// Mark a namespace as persistable to disk.
    pub fn with_persistable_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.persistable_namespaces.push(namespace.into());
        self
    }

    /// Enable the disk store at the given directory.
    pub fn with_disk_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.disk_path = Some(path.into());
        self
    }

    /// Override the schema version. For upgrade-simulation tests only;
    /// production code leaves this at [`SCHEMA_VERSION`].
    pub fn with_schema_version(mut self, version: u32) -> Self {
        self.schema_version = version;
        self
    }

    /// True when entries in the namespace should be mirrored to disk.
    pub fn is_persistable(&self, namespace: &str) -> bool {
        self.persistable_namespaces.iter().any(|n| n == namespace)
    }
}
