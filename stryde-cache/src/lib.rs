//! STRYDE Cache - Two-Tier Caching Engine
//!
//! Memoizes expensive, rate-limited, or slow operations behind a uniform
//! `fetch(key, ttl, operation)` contract: a bounded in-memory LRU tier, a
//! version-gated LMDB tier that survives restarts, per-key coalescing of
//! concurrent fetches, and a corruption-recovery bootstrap driven by the
//! single schema version registry in `stryde-core`.

pub mod aggregates;
pub mod coordinator;
pub mod disk;
pub mod manager;
pub mod memory;

pub use aggregates::AggregateStore;
pub use coordinator::RequestCoordinator;
pub use disk::{DiskStore, LoadReport};
pub use manager::{BootstrapReport, CacheManager, CacheStatistics};
pub use memory::MemoryStore;

// Re-export the core contracts so most callers only import this crate.
pub use stryde_core::{
    BootstrapOutcome, CacheConfig, CacheEntry, CacheError, CacheKey, CacheResult, Cacheable,
    TypedPayload, VersionGated, VersionedEnvelope, SCHEMA_VERSION,
};
