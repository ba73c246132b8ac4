//! Versioned envelopes for persisted entries.
//!
//! Everything that reaches a durable store is wrapped in a
//! [`VersionedEnvelope`] tagging the payload with the schema version it was
//! written under. An envelope whose version differs from the current
//! registry value is never opened into a payload; the owning store purges
//! itself and rebuilds under the current version.

use serde::{Deserialize, Serialize};

use crate::entry::{CacheEntry, Timestamp, TypedPayload};
use crate::error::CacheError;

/// A persisted cache record: schema version, payload, write timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedEnvelope {
    /// Schema version the payload was serialized under.
    pub schema_version: u32,
    /// The type-erased value.
    pub payload: TypedPayload,
    /// When the value was produced.
    pub cached_at: Timestamp,
}

impl VersionedEnvelope {
    /// Seal an entry under the given schema version.
    pub fn seal(entry: &CacheEntry, schema_version: u32) -> Self {
        Self {
            schema_version,
            payload: entry.payload.clone(),
            cached_at: entry.cached_at,
        }
    }

    /// Open the envelope back into a live entry.
    ///
    /// Returns `None` when the envelope was written under a different
    /// schema version; the payload is not deserialized in that case.
    pub fn open(self, current_version: u32) -> Option<CacheEntry> {
        if self.schema_version != current_version {
            return None;
        }
        Some(CacheEntry::with_timestamp(self.payload, self.cached_at))
    }

    /// Serialize for storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CacheError> {
        serde_json::to_vec(self).map_err(|e| CacheError::Serialization {
            key: String::new(),
            reason: e.to_string(),
        })
    }

    /// Deserialize from storage. Corrupt bytes are a decode error, which
    /// callers treat as an absent entry.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CacheError> {
        serde_json::from_slice(bytes).map_err(|e| CacheError::Deserialization {
            reason: e.to_string(),
        })
    }
}
