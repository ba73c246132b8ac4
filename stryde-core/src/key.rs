//! Structured cache keys.
//!
//! A [`CacheKey`] names one logical resource as `namespace:qualifier` plus
//! optional parameter segments, rendered as a single human-readable string
//! such as `"activities:strava:7d"`. The rendered form is the identity:
//! equality is byte-exact and no normalization is applied anywhere.
//!
//! # Design
//!
//! Keys can only be built through [`CacheKey::new`] or [`CacheKey::parse`],
//! both of which validate the segments. This keeps every store working with
//! the same well-formed identifiers, and lets the namespace prefix drive
//! both disk persistability and bulk invalidation.
//!
//! # Stability
//!
//! Keys must stay stable across app versions. When a resource's semantics
//! change, the namespace segment changes; the schema version registry
//! covers payload-shape changes only.

use std::fmt;
use std::str::FromStr;

use crate::error::CacheError;

/// Separator between key segments in the rendered form.
const SEPARATOR: char = ':';

/// Identifier for one cached logical resource.
///
/// # Example
///
/// ```
/// use stryde_core::CacheKey;
///
/// let key = CacheKey::new("activities", "strava", &["7d"]).unwrap();
/// assert_eq!(key.as_str(), "activities:strava:7d");
/// assert_eq!(key.namespace(), "activities");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    /// The full rendered key. Byte-exact identity.
    rendered: String,
    /// Length of the namespace prefix within `rendered`.
    namespace_len: usize,
}

impl CacheKey {
    /// Build a key from a namespace, a qualifier, and parameter segments.
    ///
    /// Every segment must be non-empty and must not contain the `:`
    /// separator.
    pub fn new(
        namespace: &str,
        qualifier: &str,
        params: &[&str],
    ) -> Result<Self, CacheError> {
        validate_segment(namespace)?;
        validate_segment(qualifier)?;
        for param in params {
            validate_segment(param)?;
        }

        let mut rendered = String::with_capacity(
            namespace.len() + qualifier.len() + params.iter().map(|p| p.len() + 1).sum::<usize>() + 1,
        );
        rendered.push_str(namespace);
        rendered.push(SEPARATOR);
        rendered.push_str(qualifier);
        for param in params {
            rendered.push(SEPARATOR);
            rendered.push_str(param);
        }

        Ok(Self {
            rendered,
            namespace_len: namespace.len(),
        })
    }

    /// Parse a key from its rendered form.
    ///
    /// Requires at least a namespace and a qualifier segment.
    pub fn parse(rendered: &str) -> Result<Self, CacheError> {
        let mut segments = rendered.split(SEPARATOR);
        let namespace = segments.next().unwrap_or("");
        let qualifier = segments.next().ok_or_else(|| CacheError::InvalidKey {
            reason: format!("expected at least namespace:qualifier, got {rendered:?}"),
        })?;

        validate_segment(namespace)?;
        validate_segment(qualifier)?;
        for param in segments {
            validate_segment(param)?;
        }

        Ok(Self {
            rendered: rendered.to_string(),
            namespace_len: namespace.len(),
        })
    }

    /// The full rendered key.
    pub fn as_str(&self) -> &str {
        &self.rendered
    }

    /// The namespace segment.
    pub fn namespace(&self) -> &str {
        &self.rendered[..self.namespace_len]
    }

    /// Encode the key for use as a storage-engine key.
    pub fn encode(&self) -> &[u8] {
        self.rendered.as_bytes()
    }

    /// Decode a key previously written by [`CacheKey::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self, CacheError> {
        let rendered = std::str::from_utf8(bytes).map_err(|_| CacheError::InvalidKey {
            reason: "stored key is not valid UTF-8".to_string(),
        })?;
        Self::parse(rendered)
    }

    /// True when this key belongs to the given namespace.
    pub fn in_namespace(&self, namespace: &str) -> bool {
        self.namespace() == namespace
    }

    /// Byte prefix matching every key in a namespace, for store scans.
    pub fn namespace_prefix(namespace: &str) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(namespace.len() + 1);
        prefix.extend_from_slice(namespace.as_bytes());
        prefix.push(SEPARATOR as u8);
        prefix
    }
}

fn validate_segment(segment: &str) -> Result<(), CacheError> {
    if segment.is_empty() {
        return Err(CacheError::InvalidKey {
            reason: "empty key segment".to_string(),
        });
    }
    if segment.contains(SEPARATOR) {
        return Err(CacheError::InvalidKey {
            reason: format!("segment {segment:?} contains separator"),
        });
    }
    Ok(())
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendered)
    }
}

impl FromStr for CacheKey {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_and_accessors() {
        let key = CacheKey::new("activities", "strava", &["7d"]).expect("key should build");
        assert_eq!(key.as_str(), "activities:strava:7d");
        assert_eq!(key.namespace(), "activities");
        assert!(key.in_namespace("activities"));
        assert!(!key.in_namespace("scores"));
    }

    #[test]
    fn test_no_params() {
        let key = CacheKey::new("scores", "recovery", &[]).expect("key should build");
        assert_eq!(key.as_str(), "scores:recovery");
        assert_eq!(key.namespace(), "scores");
    }

    #[test]
    fn test_parse_roundtrip() {
        let key = CacheKey::parse("sleep:summary:2026-08-07").expect("parse should succeed");
        assert_eq!(key.namespace(), "sleep");
        assert_eq!(key, CacheKey::new("sleep", "summary", &["2026-08-07"]).unwrap());
    }

    #[test]
    fn test_parse_rejects_single_segment() {
        assert!(CacheKey::parse("activities").is_err());
    }

    #[test]
    fn test_rejects_empty_segments() {
        assert!(CacheKey::new("", "strava", &[]).is_err());
        assert!(CacheKey::new("activities", "", &[]).is_err());
        assert!(CacheKey::new("activities", "strava", &[""]).is_err());
        assert!(CacheKey::parse("activities::7d").is_err());
        assert!(CacheKey::parse("activities:strava:").is_err());
    }

    #[test]
    fn test_rejects_separator_in_segment() {
        assert!(CacheKey::new("activ:ities", "strava", &[]).is_err());
    }

    #[test]
    fn test_equality_is_byte_exact() {
        let a = CacheKey::parse("activities:strava:7d").unwrap();
        let b = CacheKey::parse("activities:strava:7D").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let key = CacheKey::new("readiness", "daily", &["2026-08-07"]).unwrap();
        let decoded = CacheKey::decode(key.encode()).expect("decode should succeed");
        assert_eq!(key, decoded);
    }

    #[test]
    fn test_namespace_prefix_matches_encoded_keys() {
        let key = CacheKey::new("activities", "strava", &["7d"]).unwrap();
        let prefix = CacheKey::namespace_prefix("activities");
        assert!(key.encode().starts_with(&prefix));

        let other = CacheKey::new("act", "strava", &["7d"]).unwrap();
        assert!(!other.encode().starts_with(&prefix));
    }
}
