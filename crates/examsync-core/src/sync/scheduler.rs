use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::Connectivity;
use crate::api::RemoteSource;
use crate::cache::{CacheManager, SnapshotKind};
use crate::clock::Clock;
use crate::config::Config;
use crate::models::DataStructure;

// ============================================================================
// Constants
// ============================================================================

/// Default tick of the background timer.
pub const DEFAULT_SYNC_INTERVAL: StdDuration = StdDuration::from_secs(5 * 60);

/// Default minimum age of a valid cache before it is worth re-syncing.
pub const DEFAULT_MIN_SYNC_INTERVAL_SECS: i64 = 5 * 60;

/// Buffer of the event channel. Slow listeners lag rather than block syncs.
const EVENT_BUFFER_SIZE: usize = 16;

/// Why a sync was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// Timer tick. Requires connectivity and respects the skip condition.
    Interval,
    /// Offline → online transition. Respects the skip condition.
    Reconnected,
    /// Explicit request. Always fetches.
    Forced,
}

/// What a sync request ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed { timestamp: DateTime<Utc> },
    Failed { message: String },
    /// The last sync is recent and its cache still valid; no remote call made.
    Skipped,
    /// Another sync was in flight; this request was a no-op.
    AlreadyRunning,
    /// Connectivity probe reported offline; no remote call made.
    Offline,
    /// The scheduler was stopped while the fetch was in flight; the result
    /// was dropped.
    Discarded,
}

/// Broadcast to every subscriber when a sync finishes.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    Completed {
        payload: Arc<DataStructure>,
        timestamp: DateTime<Utc>,
    },
    Failed {
        message: String,
    },
}

/// Clears the in-flight flag when dropped, whatever path the sync took.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Inner {
    source: Arc<dyn RemoteSource>,
    cache: Arc<CacheManager>,
    connectivity: Arc<dyn Connectivity>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<SyncEvent>,
    interval: StdDuration,
    min_interval: Duration,
    syncing: AtomicBool,
    // Bumped by `stop`; a sync that sees a different value on completion
    // drops its result.
    generation: AtomicU64,
    task: Mutex<Option<JoinHandle<()>>>,
    last_sync: Mutex<Option<DateTime<Utc>>>,
}

/// Background sync service.
///
/// Cheap to clone; clones share one scheduler. Lifecycle is explicit:
/// `start` arms the timer and connectivity listener, `stop` disarms them.
#[derive(Clone)]
pub struct SyncScheduler {
    inner: Arc<Inner>,
}

impl SyncScheduler {
    pub fn new(
        source: Arc<dyn RemoteSource>,
        cache: Arc<CacheManager>,
        connectivity: Arc<dyn Connectivity>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_intervals(
            source,
            cache,
            connectivity,
            clock,
            DEFAULT_SYNC_INTERVAL,
            Duration::seconds(DEFAULT_MIN_SYNC_INTERVAL_SECS),
        )
    }

    pub fn from_config(
        config: &Config,
        source: Arc<dyn RemoteSource>,
        cache: Arc<CacheManager>,
        connectivity: Arc<dyn Connectivity>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_intervals(
            source,
            cache,
            connectivity,
            clock,
            config.sync_interval(),
            config.min_sync_interval(),
        )
    }

    fn with_intervals(
        source: Arc<dyn RemoteSource>,
        cache: Arc<CacheManager>,
        connectivity: Arc<dyn Connectivity>,
        clock: Arc<dyn Clock>,
        interval: StdDuration,
        min_interval: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        Self {
            inner: Arc::new(Inner {
                source,
                cache,
                connectivity,
                clock,
                events,
                interval,
                min_interval,
                syncing: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                task: Mutex::new(None),
                last_sync: Mutex::new(None),
            }),
        }
    }

    fn task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.inner.task.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.task().is_some()
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.syncing.load(Ordering::Acquire)
    }

    /// Time of the last successful sync in this process.
    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        *self.inner.last_sync.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Arm the interval timer and the connectivity listener. Calling it
    /// again while running does nothing. Must be called inside a Tokio
    /// runtime.
    pub fn start(&self) {
        let mut task = self.task();
        if task.is_some() {
            debug!("Sync scheduler already running");
            return;
        }
        let online_rx = self.inner.connectivity.subscribe();
        let scheduler = self.clone();
        *task = Some(tokio::spawn(async move {
            scheduler.run(online_rx).await;
        }));
        info!(interval_secs = self.inner.interval.as_secs(), "Sync scheduler started");
    }

    /// Disarm the timer and drop the connectivity listener. A fetch already
    /// in flight is left to finish, but its result is discarded.
    pub fn stop(&self) {
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        if let Some(handle) = self.task().take() {
            handle.abort();
            info!("Sync scheduler stopped");
        }
    }

    async fn run(&self, mut online_rx: watch::Receiver<bool>) {
        let period = self.inner.interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut was_online = *online_rx.borrow_and_update();
        let mut listening = true;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.spawn_sync(SyncTrigger::Interval);
                }
                changed = online_rx.changed(), if listening => {
                    if changed.is_err() {
                        warn!("Connectivity source dropped, continuing on timer only");
                        listening = false;
                        continue;
                    }
                    let online = *online_rx.borrow_and_update();
                    if online && !was_online {
                        self.spawn_sync(SyncTrigger::Reconnected);
                    }
                    was_online = online;
                }
            }
        }
    }

    /// Syncs run as their own task so that stopping the loop never aborts a
    /// fetch midway.
    fn spawn_sync(&self, trigger: SyncTrigger) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let outcome = scheduler.sync_now(trigger).await;
            debug!(?trigger, ?outcome, "Scheduled sync finished");
        });
    }

    /// A valid cache written by a sync less than `min_interval` ago. A cache
    /// seeded from anything but a sync never counts.
    async fn synced_recently(&self) -> bool {
        let inner = &self.inner;
        let Some(last) = inner.cache.last_synced().await else {
            return false;
        };
        let since = inner.clock.now() - last;
        if since < Duration::zero() || since >= inner.min_interval {
            return false;
        }
        let description = inner.cache.describe(&SnapshotKind::DataStructure).await;
        description.present && description.is_valid
    }

    /// Run one sync now. At most one sync is ever in flight; a request that
    /// arrives while another runs returns `AlreadyRunning` without touching
    /// the network.
    pub async fn sync_now(&self, trigger: SyncTrigger) -> SyncOutcome {
        let inner = &self.inner;
        if trigger != SyncTrigger::Forced && !inner.connectivity.is_online() {
            debug!(?trigger, "Offline, sync not attempted");
            return SyncOutcome::Offline;
        }

        let Some(_in_flight) = InFlight::acquire(&inner.syncing) else {
            debug!(?trigger, "Sync already in flight");
            return SyncOutcome::AlreadyRunning;
        };
        let generation = inner.generation.load(Ordering::Acquire);

        if trigger != SyncTrigger::Forced && self.synced_recently().await {
            debug!(?trigger, "Cache is fresh, sync skipped");
            return SyncOutcome::Skipped;
        }

        info!(?trigger, "Sync started");
        let fetched = inner.source.fetch_structure().await;

        if inner.generation.load(Ordering::Acquire) != generation {
            debug!("Scheduler stopped during fetch, result discarded");
            return SyncOutcome::Discarded;
        }

        match fetched {
            Ok(data) => {
                if let Err(e) = inner.cache.save_snapshot(&SnapshotKind::DataStructure, &data).await {
                    warn!(error = %e, "Synced data not cached");
                }
                let timestamp = inner.clock.now();
                if let Err(e) = inner.cache.record_sync(timestamp).await {
                    warn!(error = %e, "Sync time not recorded");
                }
                *inner.last_sync.lock().unwrap_or_else(|e| e.into_inner()) = Some(timestamp);
                info!(exams = data.exam_count(), "Sync complete");

                // Nobody listening is fine.
                let _ = inner.events.send(SyncEvent::Completed {
                    payload: Arc::new(data),
                    timestamp,
                });
                SyncOutcome::Completed { timestamp }
            }
            Err(e) => {
                let message = format!("{:#}", e);
                warn!(error = %message, "Sync failed, keeping last good cache");
                let _ = inner.events.send(SyncEvent::Failed {
                    message: message.clone(),
                });
                SyncOutcome::Failed { message }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
