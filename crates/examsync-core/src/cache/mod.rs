//! Local snapshot cache for offline data access.
//!
//! This module provides the `CacheManager` for storing and retrieving full
//! dataset snapshots and smaller per-exam question blobs. An entry is
//! served only while it is younger than the TTL (24 hours by default) and
//! was written under the current cache epoch; bumping the epoch voids every
//! entry at once without waiting out the TTL.

pub mod manager;

pub use manager::{CacheDescription, CacheEntry, CacheError, CacheManager, SnapshotKind};
