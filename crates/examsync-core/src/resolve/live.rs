use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::{DataResolver, Resolution};

struct Inner {
    resolver: Arc<DataResolver>,
    tx: watch::Sender<Option<Resolution>>,
    period: Duration,
    sessions: AtomicUsize,
    // Bumped on every `enter_session`; a refresh that sees a different value
    // once resolved drops its result.
    session_generation: AtomicU64,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Keeps the latest [`Resolution`] published for views.
///
/// Re-resolves on a short timer and whenever the app comes back to the
/// foreground. Both are paused while an exam session is open so the
/// questions under an exam never shift.
#[derive(Clone)]
pub struct LiveData {
    inner: Arc<Inner>,
}

/// Marks an exam session as open. Refreshes resume once every guard is
/// dropped.
#[must_use = "the session ends when the guard is dropped"]
pub struct SessionGuard {
    inner: Arc<Inner>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.inner.sessions.fetch_sub(1, Ordering::AcqRel) == 1 {
            debug!("Exam session closed, live refresh resumed");
        }
    }
}

impl LiveData {
    pub fn new(resolver: Arc<DataResolver>, period: Duration) -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                resolver,
                tx,
                period,
                sessions: AtomicUsize::new(0),
                session_generation: AtomicU64::new(0),
                task: Mutex::new(None),
            }),
        }
    }

    fn task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.inner.task.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Resolution>> {
        self.inner.tx.subscribe()
    }

    pub fn current(&self) -> Option<Resolution> {
        self.inner.tx.borrow().clone()
    }

    pub fn in_session(&self) -> bool {
        self.inner.sessions.load(Ordering::Acquire) > 0
    }

    pub fn enter_session(&self) -> SessionGuard {
        self.inner.session_generation.fetch_add(1, Ordering::AcqRel);
        if self.inner.sessions.fetch_add(1, Ordering::AcqRel) == 0 {
            debug!("Exam session open, live refresh paused");
        }
        SessionGuard {
            inner: self.inner.clone(),
        }
    }

    fn publish(&self, resolution: &Resolution) {
        debug!(origin = %resolution.origin, "Live data updated");
        self.inner.tx.send_replace(Some(resolution.clone()));
    }

    /// Resolve and publish unconditionally. Used for the initial load.
    pub async fn load(&self) -> Resolution {
        let resolution = self.inner.resolver.resolve().await;
        self.publish(&resolution);
        resolution
    }

    /// Resolve and publish unless a session is open, or one was opened
    /// while resolving. Returns `None` when suppressed.
    pub async fn refresh(&self) -> Option<Resolution> {
        if self.in_session() {
            debug!("Refresh suppressed during exam session");
            return None;
        }
        let generation = self.inner.session_generation.load(Ordering::Acquire);
        let resolution = self.inner.resolver.resolve().await;

        if self.in_session() || self.inner.session_generation.load(Ordering::Acquire) != generation {
            debug!("Exam session opened during refresh, result dropped");
            return None;
        }
        self.publish(&resolution);
        Some(resolution)
    }

    /// Foreground transitions re-run resolution; going to the background
    /// does nothing.
    pub async fn on_visibility_change(&self, visible: bool) -> Option<Resolution> {
        if !visible {
            return None;
        }
        self.refresh().await
    }

    /// Arm the periodic refresh. Calling it again while running does
    /// nothing.
    pub fn start(&self) {
        let mut task = self.task();
        if task.is_some() {
            return;
        }
        let live = self.clone();
        let period = self.inner.period;
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                live.refresh().await;
            }
        }));
        info!(period_secs = period.as_secs(), "Live refresh started");
    }

    pub fn stop(&self) {
        if let Some(handle) = self.task().take() {
            handle.abort();
            info!("Live refresh stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheManager;
    use crate::clock::ManualClock;
    use crate::resolve::DataOrigin;
    use crate::storage::Storage;
    use crate::sync::ConnectivityMonitor;
    use crate::testing::{settle, ScriptedSource};
    use tokio::sync::Notify;

    const PERIOD: Duration = Duration::from_secs(30);

    fn live(source: Arc<ScriptedSource>) -> LiveData {
        let cache = Arc::new(CacheManager::new(
            Arc::new(Storage::in_memory()),
            Arc::new(ManualClock::default()),
        ));
        let resolver = DataResolver::new(source, cache, Arc::new(ConnectivityMonitor::new(true)));
        LiveData::new(Arc::new(resolver), PERIOD)
    }

    #[tokio::test]
    async fn test_load_publishes() {
        let live = live(Arc::new(ScriptedSource::new()));
        let mut rx = live.subscribe();
        assert!(live.current().is_none());

        live.load().await;
        assert!(rx.has_changed().unwrap());
        let published = rx.borrow_and_update().clone().unwrap();
        assert_eq!(published.origin, DataOrigin::Remote);
    }

    #[tokio::test]
    async fn test_session_suppresses_refresh_and_visibility() {
        let source = Arc::new(ScriptedSource::new());
        let live = live(source.clone());

        let guard = live.enter_session();
        assert!(live.refresh().await.is_none());
        assert!(live.on_visibility_change(true).await.is_none());
        assert_eq!(source.calls(), 0);

        drop(guard);
        assert!(!live.in_session());
        assert!(live.on_visibility_change(true).await.is_some());
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_session_opened_mid_refresh_drops_result() {
        let gate = Arc::new(Notify::new());
        let live = live(Arc::new(ScriptedSource::gated(gate.clone())));
        let mut rx = live.subscribe();

        let refreshing = live.clone();
        let pending = tokio::spawn(async move { refreshing.refresh().await });
        settle().await;

        let guard = live.enter_session();
        gate.notify_one();

        assert!(pending.await.unwrap().is_none());
        assert!(live.current().is_none());
        assert!(!rx.has_changed().unwrap());
        drop(guard);
    }

    #[tokio::test]
    async fn test_session_opened_and_closed_mid_refresh_drops_result() {
        let gate = Arc::new(Notify::new());
        let live = live(Arc::new(ScriptedSource::gated(gate.clone())));

        let refreshing = live.clone();
        let pending = tokio::spawn(async move { refreshing.refresh().await });
        settle().await;

        drop(live.enter_session());
        gate.notify_one();

        assert!(pending.await.unwrap().is_none());
        assert!(live.current().is_none());
    }

    #[tokio::test]
    async fn test_going_to_background_does_nothing() {
        let source = Arc::new(ScriptedSource::new());
        let live = live(source.clone());
        assert!(live.on_visibility_change(false).await.is_none());
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn test_nested_sessions() {
        let live = live(Arc::new(ScriptedSource::new()));
        let outer = live.enter_session();
        let inner = live.enter_session();
        drop(outer);
        assert!(live.in_session());
        drop(inner);
        assert!(!live.in_session());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_refreshes_outside_sessions() {
        let source = Arc::new(ScriptedSource::new());
        let live = live(source.clone());
        live.start();
        settle().await;
        assert_eq!(source.calls(), 0);

        tokio::time::advance(PERIOD).await;
        settle().await;
        assert_eq!(source.calls(), 1);
        assert!(live.current().is_some());

        let guard = live.enter_session();
        tokio::time::advance(PERIOD).await;
        settle().await;
        assert_eq!(source.calls(), 1);

        drop(guard);
        tokio::time::advance(PERIOD).await;
        settle().await;
        assert_eq!(source.calls(), 2);
        live.stop();
    }
}
