//! Error types for cache operations.
//!
//! The taxonomy separates the one failure callers must handle (the supplied
//! operation failing) from cache-internal failures, which degrade to
//! "treat as miss" and never prevent a fetch from completing.

use std::error::Error;
use std::sync::Arc;
use thiserror::Error;

/// Result alias used across the STRYDE caching crates.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors produced by the caching layer.
///
/// Only [`CacheError::Operation`] and [`CacheError::TypeMismatch`] are ever
/// returned from `fetch`: the former because the caller's fallback failed,
/// the latter because the caller asked for a type that does not match what
/// was stored under the key. Every other variant is internal plumbing that
/// the manager absorbs into miss-and-recompute behavior.
///
/// The enum is `Clone` so a single failure can be delivered to every
/// coalesced waiter of an in-flight fetch.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// The caller-supplied operation failed. The original error is
    /// preserved behind an `Arc` so it can be cloned to all waiters.
    #[error("cached operation failed: {0}")]
    Operation(Arc<dyn Error + Send + Sync + 'static>),

    /// A typed read found a payload stored under a different type tag.
    #[error("type tag mismatch for {key}: expected {expected}, found {found}")]
    TypeMismatch {
        key: String,
        expected: String,
        found: String,
    },

    /// A value could not be encoded for storage.
    #[error("failed to encode value for {key}: {reason}")]
    Serialization { key: String, reason: String },

    /// A stored payload or envelope could not be decoded.
    #[error("failed to decode cached value: {reason}")]
    Deserialization { reason: String },

    /// A cache key could not be constructed or parsed.
    #[error("invalid cache key: {reason}")]
    InvalidKey { reason: String },

    /// A persistent store failed at the storage-engine level.
    #[error("store failure in {store}: {reason}")]
    Store { store: String, reason: String },

    /// An internal lock was poisoned by a panicking thread.
    #[error("cache lock poisoned")]
    LockPoisoned,
}

impl CacheError {
    /// Wrap a caller-supplied operation error.
    pub fn operation<E>(source: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self::Operation(Arc::new(source))
    }

    /// Build a store-level error for the named store.
    pub fn store(store: impl Into<String>, reason: impl ToString) -> Self {
        Self::Store {
            store: store.into(),
            reason: reason.to_string(),
        }
    }

    /// True for failures the manager absorbs as a cache miss rather than
    /// surfacing to the caller.
    pub fn is_internal(&self) -> bool {
        !matches!(
            self,
            Self::Operation { .. } | Self::TypeMismatch { .. } | Self::InvalidKey { .. }
        )
    }
}
