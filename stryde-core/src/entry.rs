//! Cache entries and type-erased payloads.
//!
//! Heterogeneous values share one store, so values are erased at the
//! storage boundary into a [`TypedPayload`]: a type tag plus serialized
//! bytes. Typed reads go back through [`TypedPayload::decode`], which fails
//! with [`CacheError::TypeMismatch`] when the stored tag differs from the
//! requested type's tag. There is no runtime downcasting anywhere.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::CacheError;
use crate::key::CacheKey;

/// Timestamp type used across the caching layer.
pub type Timestamp = DateTime<Utc>;

/// Marker trait for values that can be cached.
///
/// # Implementation Requirements
///
/// - `type_tag()` must return a stable, unique tag for the type. The tag is
///   persisted inside payloads, so renaming a Rust type must not change it.
/// - Implementations must be `Clone`, `Serialize`, and `DeserializeOwned`
///   for storage, and `Send + Sync + 'static` for async compatibility.
pub trait Cacheable: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable tag identifying this payload type in storage.
    fn type_tag() -> &'static str;
}

/// A type-erased cache value: type tag plus serde_json bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedPayload {
    type_tag: String,
    bytes: Vec<u8>,
}

impl TypedPayload {
    /// Erase a value into a tagged payload.
    pub fn encode<T: Cacheable>(key: &CacheKey, value: &T) -> Result<Self, CacheError> {
        let bytes = serde_json::to_vec(value).map_err(|e| CacheError::Serialization {
            key: key.as_str().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            type_tag: T::type_tag().to_string(),
            bytes,
        })
    }

    /// Restore the concrete value, failing loudly on a tag mismatch.
    pub fn decode<T: Cacheable>(&self, key: &CacheKey) -> Result<T, CacheError> {
        if self.type_tag != T::type_tag() {
            return Err(CacheError::TypeMismatch {
                key: key.as_str().to_string(),
                expected: T::type_tag().to_string(),
                found: self.type_tag.clone(),
            });
        }
        serde_json::from_slice(&self.bytes).map_err(|e| CacheError::Deserialization {
            reason: e.to_string(),
        })
    }

    /// The stored type tag.
    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    /// Approximate in-memory size of this payload in bytes.
    pub fn size_bytes(&self) -> usize {
        self.type_tag.len() + self.bytes.len()
    }
}

/// One cached value with its write timestamp.
///
/// `cached_at` is the freshness anchor: a stored entry is fresh under a
/// caller's TTL when `now - cached_at < ttl`. The TTL itself is never
/// stored, so one entry can be fresh for one caller and stale for another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The type-erased value.
    pub payload: TypedPayload,
    /// When the value was produced.
    pub cached_at: Timestamp,
}

impl CacheEntry {
    /// Create an entry stamped with the current time.
    pub fn new(payload: TypedPayload) -> Self {
        Self {
            payload,
            cached_at: Utc::now(),
        }
    }

    /// Create an entry with an explicit timestamp.
    pub fn with_timestamp(payload: TypedPayload, cached_at: Timestamp) -> Self {
        Self { payload, cached_at }
    }

    /// How long ago this entry was written. Clock skew clamps to zero.
    pub fn age(&self) -> Duration {
        Utc::now()
            .signed_duration_since(self.cached_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// True when the entry is fresh under the caller's TTL.
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.age() < ttl
    }

    /// Approximate in-memory size of this entry in bytes.
    pub fn size_bytes(&self) -> usize {
        // Timestamp is a fixed-width field; payload dominates.
        self.payload.size_bytes() + std::mem::size_of::<Timestamp>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct ActivitySummary {
        distance_m: f64,
        sessions: u32,
    }

    impl Cacheable for ActivitySummary {
        fn type_tag() -> &'static str {
            "activity_summary"
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct RecoveryScore {
        score: u8,
    }

    impl Cacheable for RecoveryScore {
        fn type_tag() -> &'static str {
            "recovery_score"
        }
    }

    fn test_key() -> CacheKey {
        CacheKey::new("activities", "strava", &["7d"]).unwrap()
    }

    #[test]
    fn test_payload_roundtrip() {
        let value = ActivitySummary {
            distance_m: 42_195.0,
            sessions: 4,
        };
        let key = test_key();
        let payload = TypedPayload::encode(&key, &value).expect("encode should succeed");
        assert_eq!(payload.type_tag(), "activity_summary");

        let decoded: ActivitySummary = payload.decode(&key).expect("decode should succeed");
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_decode_wrong_type_is_loud() {
        let key = test_key();
        let payload =
            TypedPayload::encode(&key, &RecoveryScore { score: 87 }).expect("encode should succeed");

        let err = payload
            .decode::<ActivitySummary>(&key)
            .expect_err("tag mismatch must error");
        match err {
            CacheError::TypeMismatch { expected, found, .. } => {
                assert_eq!(expected, "activity_summary");
                assert_eq!(found, "recovery_score");
            }
            other => panic!("expected TypeMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_entry_freshness_per_caller_ttl() {
        let key = test_key();
        let payload = TypedPayload::encode(&key, &RecoveryScore { score: 60 }).unwrap();
        let entry = CacheEntry::with_timestamp(payload, Utc::now() - ChronoDuration::seconds(30));

        assert!(entry.is_fresh(Duration::from_secs(60)));
        assert!(!entry.is_fresh(Duration::from_secs(10)));
    }

    #[test]
    fn test_entry_age_clamps_future_timestamps() {
        let key = test_key();
        let payload = TypedPayload::encode(&key, &RecoveryScore { score: 60 }).unwrap();
        let entry = CacheEntry::with_timestamp(payload, Utc::now() + ChronoDuration::seconds(30));
        assert_eq!(entry.age(), Duration::ZERO);
    }
}
