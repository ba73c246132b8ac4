//! The schema version registry and the corruption-recovery protocol.
//!
//! Every persistent store compares its last-written version marker against
//! one shared constant at startup. There is exactly one number to increment
//! anywhere in the system to force a global cache invalidation; two stores
//! bumping their own local counters cannot drift.
//!
//! # Protocol
//!
//! Run once per store at process start:
//! 1. Read the stored marker; absence means version 0.
//! 2. If `stored != current`, purge the store's entire persisted collection
//!    and write `current` as the new marker.
//! 3. If `stored == current`, proceed normally.
//!
//! A mismatch is an expected upgrade event, logged informationally. A
//! marker that still disagrees *after* the purge-and-rewrite step is a bug
//! in that store's bootstrap logic and is logged as a warning by
//! [`verify_markers`], never silently swallowed.

use crate::error::CacheError;

/// Current schema version for all persisted cache payloads.
///
/// Increment this, and only this, when the serialized shape of any cached
/// payload changes between releases. Every versioned store purges and
/// rebuilds on the next startup.
pub const SCHEMA_VERSION: u32 = 4;

/// A persistent store that participates in the version protocol.
pub trait VersionGated {
    /// Human-readable store name, used in log events.
    fn store_name(&self) -> &'static str;

    /// Read the last-applied version marker, `None` if never written.
    fn read_marker(&self) -> Result<Option<u32>, CacheError>;

    /// Persist the version marker.
    fn write_marker(&self, version: u32) -> Result<(), CacheError>;

    /// Drop the store's entire persisted collection (markers excluded).
    fn purge(&self) -> Result<(), CacheError>;
}

/// Outcome of running the version protocol against one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// Marker matched; persisted data was kept.
    UpToDate,
    /// Marker mismatched; the store was purged and re-marked.
    Purged {
        /// The stale marker found in the store (0 when absent).
        previous: u32,
    },
}

/// Run the version protocol for one store against the given current version.
///
/// Production code passes [`SCHEMA_VERSION`]; tests pass explicit values to
/// simulate an upgrade across two bootstrap cycles.
pub fn bootstrap_store_at<S: VersionGated + ?Sized>(
    store: &S,
    current: u32,
) -> Result<BootstrapOutcome, CacheError> {
    let stored = store.read_marker()?.unwrap_or(0);
    if stored == current {
        tracing::debug!(store = store.store_name(), version = current, "version marker up to date");
        return Ok(BootstrapOutcome::UpToDate);
    }

    tracing::info!(
        store = store.store_name(),
        stored,
        current,
        "schema version changed, purging persisted cache"
    );
    store.purge()?;
    store.write_marker(current)?;
    Ok(BootstrapOutcome::Purged { previous: stored })
}

/// Run the version protocol for one store against [`SCHEMA_VERSION`].
pub fn bootstrap_store<S: VersionGated + ?Sized>(
    store: &S,
) -> Result<BootstrapOutcome, CacheError> {
    bootstrap_store_at(store, SCHEMA_VERSION)
}

/// Verify that every store's marker equals the given version.
///
/// Returns the number of stores whose markers disagree. Each disagreement
/// is logged as a warning: after [`bootstrap_store_at`] has run, a stale
/// marker indicates a bug in that store's own bootstrap logic, not a data
/// problem.
pub fn verify_markers_at(stores: &[&dyn VersionGated], current: u32) -> u32 {
    let mut mismatches = 0;
    for store in stores {
        match store.read_marker() {
            Ok(Some(marker)) if marker == current => {}
            Ok(marker) => {
                mismatches += 1;
                tracing::warn!(
                    store = store.store_name(),
                    marker = ?marker,
                    expected = current,
                    "version marker disagrees with registry after bootstrap"
                );
            }
            Err(e) => {
                mismatches += 1;
                tracing::warn!(
                    store = store.store_name(),
                    error = %e,
                    "failed to read version marker during verification"
                );
            }
        }
    }
    mismatches
}

/// Verify markers against [`SCHEMA_VERSION`].
pub fn verify_markers(stores: &[&dyn VersionGated]) -> u32 {
    verify_markers_at(stores, SCHEMA_VERSION)
}
