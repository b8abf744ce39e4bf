use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{BookmarkLedger, ScoreBook, ScoreRecord, WrongAnswerLedger};
use crate::clock::Clock;
use crate::models::ExamKey;
use crate::storage::{keys, Storage};

/// Reads and writes the three ledgers.
///
/// Read-modify-write cycles are serialized within one store so two updates
/// to the same ledger can't drop each other.
pub struct LedgerStore {
    storage: Arc<Storage>,
    clock: Arc<dyn Clock>,
    write_lock: Mutex<()>,
}

impl LedgerStore {
    pub fn new(storage: Arc<Storage>, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage,
            clock,
            write_lock: Mutex::new(()),
        }
    }

    async fn read<T: DeserializeOwned + Default>(&self, key: &str) -> Result<T> {
        let raw = self
            .storage
            .try_get(key)
            .await
            .with_context(|| format!("Failed to read {}", key))?;
        let Some(raw) = raw else {
            return Ok(T::default());
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!(key = key, error = %e, "Ledger is unreadable, starting from empty");
                Ok(T::default())
            }
        }
    }

    async fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.storage
            .try_set_json(key, value)
            .await
            .with_context(|| format!("Failed to write {}", key))
    }

    async fn update<T, F>(&self, key: &str, apply: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Default,
        F: FnOnce(&T) -> T,
    {
        let _guard = self.write_lock.lock().await;
        let current: T = self.read(key).await?;
        let next = apply(&current);
        self.write(key, &next).await?;
        Ok(next)
    }

    pub async fn wrong_answers(&self) -> Result<WrongAnswerLedger> {
        self.read(keys::WRONG_ANSWERS).await
    }

    pub async fn bookmarks(&self) -> Result<BookmarkLedger> {
        self.read(keys::BOOKMARKS).await
    }

    pub async fn scores(&self) -> Result<ScoreBook> {
        self.read(keys::LAST_SCORES).await
    }

    /// Bump the wrong count of question `index`. Returns the new count.
    pub async fn record_wrong(&self, exam: &ExamKey, index: usize) -> Result<u32> {
        let ledger: WrongAnswerLedger = self
            .update(keys::WRONG_ANSWERS, |l: &WrongAnswerLedger| l.with_increment(exam, index))
            .await?;
        let count = ledger.count_for(exam, index);
        debug!(exam = %exam, index, count, "Wrong answer recorded");
        Ok(count)
    }

    /// A correct answer while reviewing mistakes lowers the count by one.
    pub async fn record_corrected(&self, exam: &ExamKey, index: usize) -> Result<u32> {
        let ledger: WrongAnswerLedger = self
            .update(keys::WRONG_ANSWERS, |l: &WrongAnswerLedger| l.with_decrement(exam, index))
            .await?;
        Ok(ledger.count_for(exam, index))
    }

    pub async fn clear_wrong(&self, exam: &ExamKey, index: usize) -> Result<()> {
        self.update(keys::WRONG_ANSWERS, |l: &WrongAnswerLedger| l.with_removed(exam, index))
            .await?;
        Ok(())
    }

    /// Flip the bookmark on question `index`. Returns whether it is now set.
    pub async fn toggle_bookmark(&self, exam: &ExamKey, index: usize) -> Result<bool> {
        let ledger: BookmarkLedger = self
            .update(keys::BOOKMARKS, |l: &BookmarkLedger| l.with_toggled(exam, index))
            .await?;
        Ok(ledger.contains(exam, index))
    }

    pub async fn record_score(&self, exam: &ExamKey, grade: u32, total: u32) -> Result<ScoreRecord> {
        let record = ScoreRecord {
            grade,
            total,
            recorded_at: self.clock.now(),
        };
        self.update(keys::LAST_SCORES, |book: &ScoreBook| book.with_score(exam, record.clone()))
            .await?;
        debug!(exam = %exam, grade, total, "Score recorded");
        Ok(record)
    }

    pub async fn last_score(&self, exam: &ExamKey) -> Result<Option<ScoreRecord>> {
        Ok(self.scores().await?.get(exam).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::ExamInstance;
    use crate::storage::UnavailableBackend;

    fn store() -> (LedgerStore, Arc<Storage>) {
        let storage = Arc::new(Storage::in_memory());
        (
            LedgerStore::new(storage.clone(), Arc::new(ManualClock::default())),
            storage,
        )
    }

    fn exam() -> ExamKey {
        ExamKey::new("nTeoria", "private", ExamInstance::Ordinal(1))
    }

    #[tokio::test]
    async fn test_wrong_answers_persist_and_prune() {
        let (store, storage) = store();
        assert_eq!(store.record_wrong(&exam(), 2).await.unwrap(), 1);
        assert_eq!(store.record_wrong(&exam(), 2).await.unwrap(), 2);
        assert_eq!(store.wrong_answers().await.unwrap().count_all_wrong_answers(), 1);

        assert_eq!(store.record_corrected(&exam(), 2).await.unwrap(), 1);
        assert_eq!(store.record_corrected(&exam(), 2).await.unwrap(), 0);
        assert_eq!(storage.get(keys::WRONG_ANSWERS).await.as_deref(), Some("{}"));
    }

    #[tokio::test]
    async fn test_bookmarks_toggle() {
        let (store, _) = store();
        assert!(store.toggle_bookmark(&exam(), 5).await.unwrap());
        assert!(store.bookmarks().await.unwrap().contains(&exam(), 5));
        assert!(!store.toggle_bookmark(&exam(), 5).await.unwrap());
        assert_eq!(store.bookmarks().await.unwrap().count_all(), 0);
    }

    #[tokio::test]
    async fn test_scores_replace_previous() {
        let (store, _) = store();
        store.record_score(&exam(), 12, 30).await.unwrap();
        let latest = store.record_score(&exam(), 28, 30).await.unwrap();
        assert_eq!(store.last_score(&exam()).await.unwrap(), Some(latest));

        let other = ExamKey::new("nTeoria", "private", ExamInstance::Ordinal(2));
        assert_eq!(store.last_score(&other).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ledgers_use_separate_keys() {
        let (store, storage) = store();
        store.record_wrong(&exam(), 0).await.unwrap();
        store.toggle_bookmark(&exam(), 0).await.unwrap();
        store.record_score(&exam(), 1, 1).await.unwrap();

        for key in [keys::WRONG_ANSWERS, keys::BOOKMARKS, keys::LAST_SCORES] {
            assert!(storage.get(key).await.is_some(), "{} missing", key);
        }
    }

    #[tokio::test]
    async fn test_corrupt_ledger_reads_as_empty() {
        let (store, storage) = store();
        storage.set(keys::BOOKMARKS, "not json").await;
        assert_eq!(store.bookmarks().await.unwrap(), BookmarkLedger::new());
        assert!(store.toggle_bookmark(&exam(), 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_storage_faults_propagate() {
        let storage = Arc::new(Storage::new(
            Box::new(UnavailableBackend::new("primary")),
            Box::new(UnavailableBackend::new("fallback")),
        ));
        let store = LedgerStore::new(storage, Arc::new(ManualClock::default()));
        assert!(store.record_wrong(&exam(), 0).await.is_err());
        assert!(store.scores().await.is_err());
    }
}
