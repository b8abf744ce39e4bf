use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::models::ExamKey;
use crate::storage::{keys, Storage, StorageFault};

/// Snapshots older than this are stale.
pub const DEFAULT_TTL_HOURS: i64 = 24;

/// How far in the future a stored timestamp may sit and still be trusted.
pub const MAX_CLOCK_SKEW_MS: i64 = 5 * 60 * 1000;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Snapshot is {bytes} bytes, over the {limit} byte limit")]
    TooLarge { bytes: usize, limit: usize },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Storage(#[from] StorageFault),
}

/// What a cache entry holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotKind {
    /// The full dataset structure.
    DataStructure,
    /// Questions of a single exam.
    Questions(ExamKey),
}

impl SnapshotKind {
    pub fn storage_key(&self) -> String {
        match self {
            SnapshotKind::DataStructure => keys::DATA_STRUCTURE_CACHE.to_string(),
            SnapshotKind::Questions(key) => format!("{}:{}", keys::QUESTIONS_CACHE_PREFIX, key),
        }
    }
}

/// A stored snapshot. Payload, timestamp and epoch live in one value so a
/// write can never leave them out of step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T> {
    pub payload: T,
    pub stored_at_epoch_ms: i64,
    pub cache_epoch: u64,
}

/// Entry metadata without the payload.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntryHeader {
    stored_at_epoch_ms: i64,
    cache_epoch: u64,
}

/// Read-only view of a cache slot for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheDescription {
    pub present: bool,
    pub age_ms: Option<i64>,
    pub is_valid: bool,
    /// Current cache epoch.
    pub epoch: u64,
    /// Epoch the entry was written under.
    pub stored_epoch: Option<u64>,
    pub expires_in_ms: Option<i64>,
}

impl CacheDescription {
    pub fn age_display(&self) -> String {
        match self.age_ms {
            Some(ms) => format_age(ms / 60_000),
            None => "never".to_string(),
        }
    }
}

/// Human-readable age, rounded to the nearest coarse unit.
pub fn format_age(minutes: i64) -> String {
    if minutes < 1 {
        // Negative ages come from clock skew
        "just now".to_string()
    } else if minutes < 60 {
        format!("{}m ago", minutes)
    } else if minutes < 1440 {
        let hours = minutes / 60;
        if minutes % 60 >= 30 {
            format!("{}h ago", hours + 1)
        } else {
            format!("{}h ago", hours)
        }
    } else {
        let days = minutes / 1440;
        if (minutes % 1440) / 60 >= 12 {
            format!("{}d ago", days + 1)
        } else {
            format!("{}d ago", days)
        }
    }
}

pub struct CacheManager {
    storage: Arc<Storage>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    max_payload_bytes: Option<usize>,
}

impl CacheManager {
    pub fn new(storage: Arc<Storage>, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage,
            clock,
            ttl: Duration::hours(DEFAULT_TTL_HOURS),
            max_payload_bytes: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Refuse to store snapshots whose serialized entry exceeds `limit` bytes.
    pub fn with_max_payload_bytes(mut self, limit: usize) -> Self {
        self.max_payload_bytes = Some(limit);
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn current_epoch(&self) -> u64 {
        match self.storage.get(keys::CACHE_VERSION).await {
            Some(raw) => raw.trim().parse().unwrap_or_else(|e| {
                warn!(value = %raw, error = %e, "Unreadable cache epoch, treating as 0");
                0
            }),
            None => 0,
        }
    }

    fn now_ms(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }

    fn is_live(&self, header: EntryHeader, epoch: u64, now_ms: i64) -> bool {
        let age_ms = now_ms - header.stored_at_epoch_ms;
        age_ms > -MAX_CLOCK_SKEW_MS && age_ms < self.ttl.num_milliseconds() && header.cache_epoch == epoch
    }

    async fn header(&self, key: &str) -> Option<EntryHeader> {
        let raw = self.storage.get(key).await?;
        match serde_json::from_str(&raw) {
            Ok(header) => Some(header),
            Err(e) => {
                warn!(key = key, error = %e, "Unreadable cache entry");
                None
            }
        }
    }

    /// Write a snapshot under the current epoch.
    ///
    /// The stored timestamp never moves backwards for a key, even if the
    /// clock does.
    pub async fn save_snapshot<T: Serialize + ?Sized>(
        &self,
        kind: &SnapshotKind,
        payload: &T,
    ) -> Result<(), CacheError> {
        let key = kind.storage_key();
        let epoch = self.current_epoch().await;
        let now_ms = self.now_ms();
        let stored_at_epoch_ms = match self.header(&key).await {
            Some(previous) if previous.stored_at_epoch_ms - now_ms > MAX_CLOCK_SKEW_MS => {
                warn!(
                    key = %key,
                    ahead_ms = previous.stored_at_epoch_ms - now_ms,
                    "Stored timestamp is ahead of the clock, resetting"
                );
                now_ms
            }
            Some(previous) => now_ms.max(previous.stored_at_epoch_ms),
            None => now_ms,
        };

        let entry = CacheEntry {
            payload,
            stored_at_epoch_ms,
            cache_epoch: epoch,
        };
        let raw = serde_json::to_string(&entry)?;
        if let Some(limit) = self.max_payload_bytes {
            if raw.len() > limit {
                return Err(CacheError::TooLarge {
                    bytes: raw.len(),
                    limit,
                });
            }
        }

        self.storage.try_set(&key, &raw).await?;
        self.track(&key).await?;
        debug!(key = %key, bytes = raw.len(), epoch = epoch, "Snapshot cached");
        Ok(())
    }

    /// The cached payload, or `None` when missing, expired, written under an
    /// older epoch, or unreadable.
    pub async fn load_snapshot<T: DeserializeOwned>(&self, kind: &SnapshotKind) -> Option<T> {
        self.load_entry(kind).await.map(|entry| entry.payload)
    }

    /// Like `load_snapshot` but keeps the entry metadata.
    pub async fn load_entry<T: DeserializeOwned>(&self, kind: &SnapshotKind) -> Option<CacheEntry<T>> {
        let key = kind.storage_key();
        let raw = self.storage.get(&key).await?;
        let entry: CacheEntry<T> = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to parse cache entry");
                return None;
            }
        };

        let epoch = self.current_epoch().await;
        let header = EntryHeader {
            stored_at_epoch_ms: entry.stored_at_epoch_ms,
            cache_epoch: entry.cache_epoch,
        };
        if !self.is_live(header, epoch, self.now_ms()) {
            debug!(
                key = %key,
                stored_epoch = entry.cache_epoch,
                epoch = epoch,
                "Cache entry stale"
            );
            return None;
        }
        debug!(key = %key, "Cache hit");
        Some(entry)
    }

    /// Bump the cache epoch and drop every tracked entry. Returns the new
    /// epoch.
    ///
    /// The epoch is written first, so even if a removal fails the old
    /// entries are already unloadable.
    pub async fn invalidate(&self) -> u64 {
        let epoch = self.current_epoch().await + 1;
        self.storage.set(keys::CACHE_VERSION, &epoch.to_string()).await;

        let mut tracked = self.tracked_keys().await;
        let structure_key = SnapshotKind::DataStructure.storage_key();
        if !tracked.contains(&structure_key) {
            tracked.push(structure_key);
        }
        for key in &tracked {
            self.storage.remove(key).await;
        }
        self.storage.remove(keys::CACHE_KEYS).await;
        self.storage.remove(keys::LAST_SYNC).await;

        info!(epoch = epoch, cleared = tracked.len(), "Cache invalidated");
        epoch
    }

    /// Remember when the dataset was last fetched by a sync.
    pub async fn record_sync(&self, at: DateTime<Utc>) -> Result<(), CacheError> {
        self.storage
            .try_set(keys::LAST_SYNC, &at.timestamp_millis().to_string())
            .await?;
        Ok(())
    }

    /// Time of the last recorded sync, across restarts. Cleared by
    /// `invalidate`.
    pub async fn last_synced(&self) -> Option<DateTime<Utc>> {
        let raw = self.storage.get(keys::LAST_SYNC).await?;
        match raw.trim().parse::<i64>() {
            Ok(ms) => DateTime::from_timestamp_millis(ms),
            Err(e) => {
                warn!(value = %raw, error = %e, "Unreadable last sync time");
                None
            }
        }
    }

    pub async fn describe(&self, kind: &SnapshotKind) -> CacheDescription {
        let epoch = self.current_epoch().await;
        let Some(header) = self.header(&kind.storage_key()).await else {
            return CacheDescription {
                present: false,
                age_ms: None,
                is_valid: false,
                epoch,
                stored_epoch: None,
                expires_in_ms: None,
            };
        };

        let now_ms = self.now_ms();
        let age_ms = now_ms - header.stored_at_epoch_ms;
        let is_valid = self.is_live(header, epoch, now_ms);
        CacheDescription {
            present: true,
            age_ms: Some(age_ms),
            is_valid,
            epoch,
            stored_epoch: Some(header.cache_epoch),
            expires_in_ms: Some(if is_valid {
                self.ttl.num_milliseconds() - age_ms
            } else {
                0
            }),
        }
    }

    async fn tracked_keys(&self) -> Vec<String> {
        match self.storage.try_get_json::<Vec<String>>(keys::CACHE_KEYS).await {
            Ok(tracked) => tracked.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Unreadable cache key index");
                Vec::new()
            }
        }
    }

    async fn track(&self, key: &str) -> Result<(), StorageFault> {
        let mut tracked = self.tracked_keys().await;
        if tracked.iter().any(|k| k == key) {
            return Ok(());
        }
        tracked.push(key.to_string());
        self.storage.try_set_json(keys::CACHE_KEYS, &tracked).await
    }
}

// ============================================================================
// Tests
// ============================================================================
