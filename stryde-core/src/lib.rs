//! STRYDE Core - Cache Types and Contracts
//!
//! Pure data structures with no I/O. The caching engine in `stryde-cache`
//! depends on this; so does any app code that implements [`Cacheable`] for
//! its own payload types.

pub mod config;
pub mod entry;
pub mod envelope;
pub mod error;
pub mod key;
pub mod version;

pub use config::CacheConfig;
pub use entry::{CacheEntry, Cacheable, Timestamp, TypedPayload};
pub use envelope::VersionedEnvelope;
pub use error::{CacheError, CacheResult};
pub use key::CacheKey;
pub use version::{
    bootstrap_store, bootstrap_store_at, verify_markers, verify_markers_at, BootstrapOutcome,
    VersionGated, SCHEMA_VERSION,
};
