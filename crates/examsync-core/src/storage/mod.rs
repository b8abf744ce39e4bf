//! Key-value storage with automatic backend fallback.
//!
//! Every persisted record in the crate (cache entries, progress, ledgers)
//! goes through [`Storage`], which tries a structured preferences document
//! first and transparently retries on a simple one-file-per-key store when
//! the primary fails. Components only share the store through disjoint key
//! namespaces, listed in [`keys`].

pub mod adapter;
pub mod backend;
pub mod file;
pub mod memory;

pub use adapter::Storage;
pub use backend::{KeyValueBackend, StorageFault, UnavailableBackend};
pub use file::{FileBackend, PreferencesBackend};
pub use memory::MemoryBackend;

/// Persisted key namespace. Each key holds a JSON string.
pub mod keys {
    pub const DATA_STRUCTURE_CACHE: &str = "data_structure_cache";
    pub const QUESTIONS_CACHE_PREFIX: &str = "questions_cache";
    pub const CACHE_VERSION: &str = "cache_version";
    pub const CACHE_KEYS: &str = "cache_keys";
    pub const LAST_SYNC: &str = "last_sync";
    pub const EXAM_PROGRESS: &str = "examProgress";
    pub const WRONG_ANSWERS: &str = "wrongAnswers";
    pub const BOOKMARKS: &str = "bookmarks";
    pub const LAST_SCORES: &str = "lastScores";
}
