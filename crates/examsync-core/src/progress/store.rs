use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{ProgressRecord, SessionState};
use crate::clock::Clock;
use crate::models::ExamKey;
use crate::storage::{keys, Storage};

type ProgressMap = BTreeMap<String, Value>;

/// Keyed store of in-progress exam sessions.
///
/// All records live in one map under `examProgress`, keyed by the
/// composite exam key. Storage faults propagate to the caller; a record
/// that doesn't parse is reported as absent. Writes to the map are
/// serialized so saves for different exams can't drop each other.
pub struct ProgressStore {
    storage: Arc<Storage>,
    clock: Arc<dyn Clock>,
    write_lock: Mutex<()>,
}

impl ProgressStore {
    pub fn new(storage: Arc<Storage>, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage,
            clock,
            write_lock: Mutex::new(()),
        }
    }

    async fn read_map(&self) -> Result<ProgressMap> {
        let raw = self
            .storage
            .try_get(keys::EXAM_PROGRESS)
            .await
            .context("Failed to read progress map")?;
        let Some(raw) = raw else {
            return Ok(ProgressMap::new());
        };
        match serde_json::from_str(&raw) {
            Ok(map) => Ok(map),
            Err(e) => {
                warn!(error = %e, "Progress map is unreadable, starting from empty");
                Ok(ProgressMap::new())
            }
        }
    }

    async fn write_map(&self, map: &ProgressMap) -> Result<()> {
        self.storage
            .try_set_json(keys::EXAM_PROGRESS, map)
            .await
            .context("Failed to write progress map")
    }

    /// Replace the record for `key` with `state`, stamped now.
    pub async fn save(&self, key: &ExamKey, state: SessionState) -> Result<ProgressRecord> {
        if key.is_random() && state.embedded_questions.is_none() {
            warn!(exam = %key, "Saving randomized session without its questions; it won't be resumable");
        }
        let record = ProgressRecord::from_state(state, self.clock.now());
        let value = serde_json::to_value(&record).context("Failed to serialize progress record")?;

        let _guard = self.write_lock.lock().await;
        let mut map = self.read_map().await?;
        map.insert(key.composite(), value);
        self.write_map(&map).await?;
        debug!(exam = %key, index = record.current_index, "Progress saved");
        Ok(record)
    }

    pub async fn load(&self, key: &ExamKey) -> Result<Option<ProgressRecord>> {
        let mut map = self.read_map().await?;
        let Some(value) = map.remove(&key.composite()) else {
            return Ok(None);
        };
        match serde_json::from_value(value) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(exam = %key, error = %e, "Malformed progress record ignored");
                Ok(None)
            }
        }
    }

    pub async fn exists(&self, key: &ExamKey) -> Result<bool> {
        Ok(self.load(key).await?.is_some())
    }

    /// Remove the record for `key`. Clearing a missing record is fine.
    pub async fn clear(&self, key: &ExamKey) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.read_map().await?;
        if map.remove(&key.composite()).is_none() {
            return Ok(());
        }
        self.write_map(&map).await?;
        info!(exam = %key, "Progress cleared");
        Ok(())
    }

    pub fn validate(record: &ProgressRecord, expected_questions: usize, is_random: bool) -> bool {
        record.validate(expected_questions, is_random)
    }

    pub fn is_recent(&self, record: &ProgressRecord) -> bool {
        record.is_recent_at(self.clock.now())
    }

    /// The record for `key` if it is valid for an exam of
    /// `expected_questions` and recent enough to resume.
    ///
    /// For randomized sessions pass the embedded question count, since the
    /// record itself is the only source of truth for its questions.
    pub async fn load_resumable(&self, key: &ExamKey, expected_questions: usize) -> Result<Option<ProgressRecord>> {
        let Some(record) = self.load(key).await? else {
            return Ok(None);
        };
        if let Err(defect) = record.check(expected_questions, key.is_random()) {
            debug!(exam = %key, %defect, "Progress not resumable");
            return Ok(None);
        }
        if !self.is_recent(&record) {
            debug!(exam = %key, saved_at = %record.saved_at, "Progress too old to resume");
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// Every stored record that parses, keyed by composite exam key.
    pub async fn list(&self) -> Result<Vec<(String, ProgressRecord)>> {
        let map = self.read_map().await?;
        Ok(map
            .into_iter()
            .filter_map(|(key, value)| match serde_json::from_value(value) {
                Ok(record) => Some((key, record)),
                Err(e) => {
                    debug!(key = %key, error = %e, "Skipping malformed progress record");
                    None
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::{ExamInstance, OptionKey};
    use crate::progress::Answer;
    use crate::storage::file::tests::scratch_dir;
    use crate::storage::{MemoryBackend, PreferencesBackend, UnavailableBackend};
    use crate::testing::questions;
    use chrono::Duration;

    fn store() -> (ProgressStore, Arc<ManualClock>, Arc<Storage>) {
        let storage = Arc::new(Storage::in_memory());
        let clock = Arc::new(ManualClock::default());
        (ProgressStore::new(storage.clone(), clock.clone()), clock, storage)
    }

    fn key() -> ExamKey {
        ExamKey::new("nTeoria", "private", ExamInstance::Ordinal(3))
    }

    fn five_answered_of_thirty() -> SessionState {
        let qs = questions(30);
        let mut state = SessionState::new(30, 1200);
        for (i, q) in qs.iter().take(5).enumerate() {
            state.go_to(i);
            state.answer(i, Answer::for_question(q, OptionKey::A));
        }
        state.go_to(5);
        state
    }

    #[tokio::test]
    async fn test_scenario_save_validate_clear() {
        let (store, _, _) = store();
        store.save(&key(), five_answered_of_thirty()).await.unwrap();

        let loaded = store.load(&key()).await.unwrap().unwrap();
        assert_eq!(loaded.current_index, 5);
        assert_eq!(loaded.time_remaining_seconds, 1200);
        assert_eq!(loaded.user_answers.iter().filter(|a| a.is_some()).count(), 5);
        assert!(ProgressStore::validate(&loaded, 30, false));
        assert!(store.exists(&key()).await.unwrap());

        store.clear(&key()).await.unwrap();
        assert!(!store.exists(&key()).await.unwrap());
    }

    #[tokio::test]
    async fn test_round_trip_preserves_fields() {
        let (store, clock, _) = store();
        let state = five_answered_of_thirty();
        let saved = store.save(&key(), state.clone()).await.unwrap();
        assert_eq!(saved.saved_at, clock.now());

        let loaded = store.load(&key()).await.unwrap().unwrap();
        assert_eq!(loaded, saved);
        assert_eq!(loaded.into_state(), state);
    }

    #[tokio::test]
    async fn test_save_replaces_whole_record() {
        let (store, _, _) = store();
        let mut random_state = SessionState::new_random(questions(4), 60);
        random_state.go_to(3);
        store.save(&key(), random_state).await.unwrap();
        store.save(&key(), SessionState::new(2, 30)).await.unwrap();

        let loaded = store.load(&key()).await.unwrap().unwrap();
        assert_eq!(loaded.current_index, 0);
        assert_eq!(loaded.user_answers.len(), 2);
        assert_eq!(loaded.embedded_questions, None);
    }

    #[tokio::test]
    async fn test_keys_do_not_collide() {
        let (store, _, _) = store();
        let other = ExamKey::random("nTeoria", "private");
        store.save(&key(), SessionState::new(30, 1)).await.unwrap();
        store
            .save(&other, SessionState::new_random(questions(10), 2))
            .await
            .unwrap();

        store.clear(&key()).await.unwrap();
        assert!(!store.exists(&key()).await.unwrap());
        let random = store.load(&other).await.unwrap().unwrap();
        assert!(random.validate(10, true));
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_saves_keep_every_exam() {
        let store = Arc::new(ProgressStore::new(
            Arc::new(Storage::new(
                Box::new(PreferencesBackend::new(&scratch_dir("progress-concurrent"))),
                Box::new(MemoryBackend::new()),
            )),
            Arc::new(ManualClock::default()),
        ));

        let saves = (1..=8).map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                let key = ExamKey::new("nTeoria", "private", ExamInstance::Ordinal(i));
                store.save(&key, SessionState::new(5, 60)).await.unwrap();
            })
        });
        for save in saves.collect::<Vec<_>>() {
            save.await.unwrap();
        }

        assert_eq!(store.list().await.unwrap().len(), 8);
        for i in 1..=8 {
            let key = ExamKey::new("nTeoria", "private", ExamInstance::Ordinal(i));
            assert!(store.exists(&key).await.unwrap(), "{} lost", key);
        }
    }

    #[tokio::test]
    async fn test_random_record_without_questions_is_not_resumable() {
        let (store, _, _) = store();
        let random = ExamKey::random("nTeoria", "private");
        store.save(&random, SessionState::new(10, 60)).await.unwrap();

        assert!(store.exists(&random).await.unwrap());
        assert_eq!(store.load_resumable(&random, 10).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_stale_record_is_kept_but_not_resumable() {
        let (store, clock, _) = store();
        store.save(&key(), SessionState::new(30, 1)).await.unwrap();
        assert!(store.load_resumable(&key(), 30).await.unwrap().is_some());

        clock.advance(Duration::hours(25));
        let record = store.load(&key()).await.unwrap().unwrap();
        assert!(!store.is_recent(&record));
        assert_eq!(store.load_resumable(&key(), 30).await.unwrap(), None);
        assert!(store.exists(&key()).await.unwrap());
    }

    #[tokio::test]
    async fn test_malformed_entry_reads_as_absent() {
        let (store, _, storage) = store();
        storage
            .set(keys::EXAM_PROGRESS, r#"{"nTeoria_private_3": {"currentIndex": "five"}}"#)
            .await;
        assert_eq!(store.load(&key()).await.unwrap(), None);
        assert!(!store.exists(&key()).await.unwrap());

        storage.set(keys::EXAM_PROGRESS, "[1, 2").await;
        assert_eq!(store.load(&key()).await.unwrap(), None);
        store.save(&key(), SessionState::new(3, 1)).await.unwrap();
        assert!(store.exists(&key()).await.unwrap());
    }

    #[tokio::test]
    async fn test_storage_faults_propagate() {
        let storage = Arc::new(Storage::new(
            Box::new(UnavailableBackend::new("primary")),
            Box::new(UnavailableBackend::new("fallback")),
        ));
        let store = ProgressStore::new(storage, Arc::new(ManualClock::default()));
        assert!(store.save(&key(), SessionState::new(3, 1)).await.is_err());
        assert!(store.load(&key()).await.is_err());
    }

    #[tokio::test]
    async fn test_primary_fault_is_absorbed_by_fallback() {
        let storage = Arc::new(Storage::new(
            Box::new(UnavailableBackend::new("primary")),
            Box::new(MemoryBackend::new()),
        ));
        let store = ProgressStore::new(storage, Arc::new(ManualClock::default()));
        store.save(&key(), SessionState::new(3, 1)).await.unwrap();
        assert!(store.exists(&key()).await.unwrap());
    }
}
