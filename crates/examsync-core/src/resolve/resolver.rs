use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::api::RemoteSource;
use crate::baseline::baseline;
use crate::cache::{CacheError, CacheManager, SnapshotKind};
use crate::models::{DataStructure, ExamKey, Question};
use crate::sync::Connectivity;

/// Where a resolved payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataOrigin {
    Remote,
    Cache,
    Baseline,
}

impl fmt::Display for DataOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Remote => "remote",
            Self::Cache => "cache",
            Self::Baseline => "baseline",
        };
        f.write_str(label)
    }
}

/// The full dataset picked for a read.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub data: Arc<DataStructure>,
    pub origin: DataOrigin,
}

impl Resolution {
    /// True when the data did not come straight from the remote. Views use
    /// this for their "working offline" indicator.
    pub fn from_cache(&self) -> bool {
        self.origin != DataOrigin::Remote
    }
}

/// Questions of a single exam picked for a read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionSet {
    pub questions: Vec<Question>,
    pub origin: DataOrigin,
}

pub struct DataResolver {
    source: Arc<dyn RemoteSource>,
    cache: Arc<CacheManager>,
    connectivity: Arc<dyn Connectivity>,
    baseline: Arc<DataStructure>,
}

impl DataResolver {
    pub fn new(
        source: Arc<dyn RemoteSource>,
        cache: Arc<CacheManager>,
        connectivity: Arc<dyn Connectivity>,
    ) -> Self {
        Self::with_baseline(source, cache, connectivity, baseline())
    }

    pub fn with_baseline(
        source: Arc<dyn RemoteSource>,
        cache: Arc<CacheManager>,
        connectivity: Arc<dyn Connectivity>,
        baseline: Arc<DataStructure>,
    ) -> Self {
        Self {
            source,
            cache,
            connectivity,
            baseline,
        }
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    /// Write-through that never fails the read.
    async fn store<T: serde::Serialize + ?Sized>(&self, kind: &SnapshotKind, payload: &T) {
        match self.cache.save_snapshot(kind, payload).await {
            Ok(()) => {}
            Err(CacheError::TooLarge { bytes, limit }) => {
                debug!(key = %kind.storage_key(), bytes, limit, "Payload too large to cache");
            }
            Err(e) => {
                warn!(key = %kind.storage_key(), error = %e, "Failed to cache payload");
            }
        }
    }

    /// Pick the dataset to serve: remote when online and reachable, else a
    /// valid cache, else the baseline (which then seeds the cache).
    pub async fn resolve(&self) -> Resolution {
        let kind = SnapshotKind::DataStructure;

        if self.connectivity.is_online() {
            match self.source.fetch_structure().await {
                Ok(data) => {
                    self.store(&kind, &data).await;
                    debug!(exams = data.exam_count(), "Resolved from remote");
                    return Resolution {
                        data: Arc::new(data),
                        origin: DataOrigin::Remote,
                    };
                }
                Err(e) => {
                    warn!(error = %format!("{:#}", e), "Remote fetch failed, trying cache");
                }
            }
        }

        if let Some(data) = self.cache.load_snapshot::<DataStructure>(&kind).await {
            debug!(exams = data.exam_count(), "Resolved from cache");
            return Resolution {
                data: Arc::new(data),
                origin: DataOrigin::Cache,
            };
        }

        info!("No remote data or valid cache, serving baseline");
        self.store(&kind, self.baseline.as_ref()).await;
        Resolution {
            data: self.baseline.clone(),
            origin: DataOrigin::Baseline,
        }
    }

    /// Same chain for one exam's questions. `None` when no source knows the
    /// exam; randomized exams are never resolved here since they are drawn
    /// from the full dataset.
    pub async fn resolve_questions(&self, key: &ExamKey) -> Option<QuestionSet> {
        if key.is_random() {
            return None;
        }
        let kind = SnapshotKind::Questions(key.clone());

        if self.connectivity.is_online() {
            match self.source.fetch_questions(key).await {
                Ok(questions) => {
                    self.store(&kind, &questions).await;
                    return Some(QuestionSet {
                        questions,
                        origin: DataOrigin::Remote,
                    });
                }
                Err(e) => {
                    warn!(exam = %key, error = %format!("{:#}", e), "Question fetch failed, trying cache");
                }
            }
        }

        if let Some(questions) = self.cache.load_snapshot::<Vec<Question>>(&kind).await {
            return Some(QuestionSet {
                questions,
                origin: DataOrigin::Cache,
            });
        }

        let questions = self.baseline.questions(key)?.to_vec();
        self.store(&kind, &questions).await;
        Some(QuestionSet {
            questions,
            origin: DataOrigin::Baseline,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::ExamInstance;
    use crate::storage::Storage;
    use crate::sync::ConnectivityMonitor;
    use crate::testing::{questions, remote_data, ScriptedSource};
    use chrono::Duration;

    struct Harness {
        resolver: DataResolver,
        source: Arc<ScriptedSource>,
        cache: Arc<CacheManager>,
        clock: Arc<ManualClock>,
    }

    fn small_baseline() -> Arc<DataStructure> {
        let mut data = DataStructure::new();
        data.insert(&"base/line/1".parse().unwrap(), questions(2));
        Arc::new(data)
    }

    fn harness(source: ScriptedSource, online: bool) -> Harness {
        let clock = Arc::new(ManualClock::default());
        let cache = Arc::new(CacheManager::new(Arc::new(Storage::in_memory()), clock.clone()));
        let source = Arc::new(source);
        let resolver = DataResolver::with_baseline(
            source.clone(),
            cache.clone(),
            Arc::new(ConnectivityMonitor::new(online)),
            small_baseline(),
        );
        Harness {
            resolver,
            source,
            cache,
            clock,
        }
    }

    #[tokio::test]
    async fn test_offline_without_cache_serves_and_seeds_baseline() {
        let h = harness(ScriptedSource::new(), false);
        let resolution = h.resolver.resolve().await;
        assert_eq!(resolution.origin, DataOrigin::Baseline);
        assert!(resolution.from_cache());
        assert_eq!(*resolution.data, *small_baseline());
        assert_eq!(h.source.calls(), 0);

        let second = h.resolver.resolve().await;
        assert_eq!(second.origin, DataOrigin::Cache);
        assert_eq!(*second.data, *small_baseline());
    }

    #[tokio::test]
    async fn test_offline_with_valid_cache_serves_cache() {
        let h = harness(ScriptedSource::new(), false);
        h.cache.save_snapshot(&SnapshotKind::DataStructure, &remote_data()).await.unwrap();

        let resolution = h.resolver.resolve().await;
        assert_eq!(resolution.origin, DataOrigin::Cache);
        assert_eq!(*resolution.data, remote_data());
    }

    #[tokio::test]
    async fn test_online_success_warms_cache() {
        let h = harness(ScriptedSource::new(), true);
        let resolution = h.resolver.resolve().await;
        assert_eq!(resolution.origin, DataOrigin::Remote);
        assert!(!resolution.from_cache());

        let cached: Option<DataStructure> = h.cache.load_snapshot(&SnapshotKind::DataStructure).await;
        assert_eq!(cached, Some(remote_data()));
    }

    #[tokio::test]
    async fn test_remote_failure_falls_back_to_cache_then_baseline() {
        let h = harness(ScriptedSource::failing(), true);
        assert_eq!(h.resolver.resolve().await.origin, DataOrigin::Baseline);
        assert_eq!(h.resolver.resolve().await.origin, DataOrigin::Cache);
        assert_eq!(h.source.calls(), 2);
    }

    #[tokio::test]
    async fn test_expired_cache_is_skipped() {
        let h = harness(ScriptedSource::new(), false);
        h.cache.save_snapshot(&SnapshotKind::DataStructure, &remote_data()).await.unwrap();
        h.clock.advance(Duration::hours(25));

        assert_eq!(h.resolver.resolve().await.origin, DataOrigin::Baseline);
    }

    #[tokio::test]
    async fn test_oversized_payload_is_returned_uncached() {
        let clock = Arc::new(ManualClock::default());
        let cache = Arc::new(
            CacheManager::new(Arc::new(Storage::in_memory()), clock).with_max_payload_bytes(16),
        );
        let resolver = DataResolver::with_baseline(
            Arc::new(ScriptedSource::new()),
            cache.clone(),
            Arc::new(ConnectivityMonitor::new(true)),
            small_baseline(),
        );

        let resolution = resolver.resolve().await;
        assert_eq!(resolution.origin, DataOrigin::Remote);
        assert_eq!(*resolution.data, remote_data());
        assert!(!cache.describe(&SnapshotKind::DataStructure).await.present);
    }

    #[tokio::test]
    async fn test_questions_follow_the_same_chain() {
        let online = harness(ScriptedSource::new(), true);
        let live = ExamKey::new("remote", "live", ExamInstance::Ordinal(1));
        let set = online.resolver.resolve_questions(&live).await.unwrap();
        assert_eq!(set.origin, DataOrigin::Remote);
        assert_eq!(set.questions.len(), 3);

        let offline = harness(ScriptedSource::new(), false);
        let base: ExamKey = "base/line/1".parse().unwrap();
        let set = offline.resolver.resolve_questions(&base).await.unwrap();
        assert_eq!(set.origin, DataOrigin::Baseline);
        let set = offline.resolver.resolve_questions(&base).await.unwrap();
        assert_eq!(set.origin, DataOrigin::Cache);
        assert_eq!(set.questions, questions(2));

        assert_eq!(offline.resolver.resolve_questions(&live).await, None);
        assert_eq!(
            offline.resolver.resolve_questions(&ExamKey::random("base", "line")).await,
            None
        );
    }
}
