//! Offline-first data layer for exam content.
//!
//! This crate decides which full snapshot of the exam dataset to serve
//! (fresh remote data, a valid local cache, or the bundled baseline) and
//! persists small per-session state blobs so an exam can be resumed.
//!
//! - `storage`: key-value adapter with automatic backend fallback
//! - `cache`: TTL + epoch validated snapshots
//! - `sync`: background synchronization scheduler
//! - `progress`: per-exam progress records
//! - `ledger`: wrong-answer, bookmark and score ledgers
//! - `resolve`: the read-time data resolution policy

pub mod api;
pub mod baseline;
pub mod cache;
pub mod clock;
pub mod config;
pub mod ledger;
pub mod models;
pub mod progress;
pub mod resolve;
pub mod storage;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ApiClient, ApiError, RemoteSource};
pub use cache::{CacheDescription, CacheManager, SnapshotKind};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use ledger::{BookmarkLedger, LedgerStore, ScoreBook, ScoreRecord, WrongAnswerLedger};
pub use models::{DataStructure, ExamInstance, ExamKey, OptionKey, Question};
pub use progress::{ProgressRecord, ProgressStore, SessionState};
pub use resolve::{DataOrigin, DataResolver, LiveData, QuestionSet, Resolution, SessionGuard};
pub use storage::Storage;
pub use sync::{Connectivity, ConnectivityMonitor, SyncEvent, SyncOutcome, SyncScheduler, SyncTrigger};
