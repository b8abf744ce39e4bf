//! examsync - keep an offline copy of the exam dataset warm.
//!
//! A thin command-line front end over `examsync-core`: inspect the local
//! cache and saved progress, run syncs by hand, or keep the background
//! scheduler running until interrupted.

use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use futures::stream::{self, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use examsync_core::{
    ApiClient, CacheManager, Clock, Config, ConnectivityMonitor, DataOrigin, DataResolver,
    LedgerStore, LiveData, ProgressStore, RemoteSource, SnapshotKind, Storage, SyncEvent,
    SyncOutcome, SyncScheduler, SyncTrigger, SystemClock,
};

// ============================================================================
// Constants
// ============================================================================

/// Maximum concurrent question fetches during `prefetch`
const MAX_CONCURRENT_PREFETCH: usize = 4;

/// File name prefix of the rolling log in `log_dir`
const LOG_FILE_PREFIX: &str = "examsync.log";

const USAGE: &str = "\
Usage: examsync <command> [--json]

Commands:
  status       Show cache state, saved progress and ledger totals
  sync         Run one forced sync against the remote
  resolve      Resolve the dataset once and report where it came from
  prefetch     Cache the questions of every known exam
  invalidate   Drop every cached snapshot
  watch        Run the background scheduler until Ctrl-C

Environment:
  EXAMSYNC_API_URL   Remote base URL (overrides config.json)
  RUST_LOG           Log filter (default: warn)";

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr, and additionally to a daily rolling file when
/// `log_dir` is configured. The returned guard flushes the file on drop.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
    guard
}

/// Everything a command may need, wired from one config.
struct Services {
    config: Config,
    storage: Arc<Storage>,
    clock: Arc<dyn Clock>,
    client: Arc<ApiClient>,
    monitor: Arc<ConnectivityMonitor>,
    cache: Arc<CacheManager>,
}

impl Services {
    fn open(config: Config) -> Result<Self> {
        let storage = Arc::new(Storage::open(&config.storage_dir()?));
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let client = Arc::new(ApiClient::new(config.api_base_url.clone())?);
        let cache = Arc::new(
            CacheManager::new(storage.clone(), clock.clone())
                .with_ttl(config.cache_ttl())
                .with_max_payload_bytes(config.max_cache_payload_bytes),
        );
        Ok(Self {
            config,
            storage,
            clock,
            client,
            // Offline until the first probe says otherwise
            monitor: Arc::new(ConnectivityMonitor::new(false)),
            cache,
        })
    }

    fn source(&self) -> Arc<dyn RemoteSource> {
        self.client.clone()
    }

    async fn probe(&self) -> bool {
        if self.client.base_url().is_none() {
            return false;
        }
        self.monitor.probe(&self.client).await
    }

    fn resolver(&self) -> DataResolver {
        DataResolver::new(self.source(), self.cache.clone(), self.monitor.clone())
    }

    fn scheduler(&self) -> SyncScheduler {
        SyncScheduler::from_config(
            &self.config,
            self.source(),
            self.cache.clone(),
            self.monitor.clone(),
            self.clock.clone(),
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let config = Config::load()
        .context("Failed to load config")?
        .with_env_overrides();
    let _log_guard = init_tracing(config.log_dir.as_deref());

    let args: Vec<String> = std::env::args().skip(1).collect();
    let json = args.iter().any(|a| a == "--json");
    let Some(command) = args.iter().find(|a| !a.starts_with("--")) else {
        eprintln!("{}", USAGE);
        return Ok(());
    };

    let services = Services::open(config)?;
    info!(command = %command, "examsync starting");

    match command.as_str() {
        "status" => status(&services, json).await,
        "sync" => sync(&services).await,
        "resolve" => resolve(&services, json).await,
        "prefetch" => prefetch(&services).await,
        "invalidate" => invalidate(&services).await,
        "watch" => watch(&services).await,
        "help" => {
            println!("{}", USAGE);
            Ok(())
        }
        other => bail!("Unknown command '{}'\n\n{}", other, USAGE),
    }
}

async fn status(services: &Services, json: bool) -> Result<()> {
    let description = services.cache.describe(&SnapshotKind::DataStructure).await;
    let progress = ProgressStore::new(services.storage.clone(), services.clock.clone());
    let ledgers = LedgerStore::new(services.storage.clone(), services.clock.clone());

    let saved = progress.list().await?;
    let wrong = ledgers.wrong_answers().await?.count_all_wrong_answers();
    let bookmarks = ledgers.bookmarks().await?.count_all();

    if json {
        let sessions: Vec<_> = saved
            .iter()
            .map(|(key, record)| {
                serde_json::json!({
                    "exam": key,
                    "currentIndex": record.current_index,
                    "answered": record.user_answers.iter().filter(|a| a.is_some()).count(),
                    "questions": record.user_answers.len(),
                    "savedAt": record.saved_at,
                    "resumable": progress.is_recent(record),
                })
            })
            .collect();
        let report = serde_json::json!({
            "apiBaseUrl": services.client.base_url(),
            "cache": description,
            "storageFault": services.storage.last_fault(),
            "progress": sessions,
            "wrongAnswers": wrong,
            "bookmarks": bookmarks,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Remote:      {}", services.client.base_url().unwrap_or("(not configured)"));
    if description.present {
        println!(
            "Cache:       updated {} ({}, epoch {})",
            description.age_display(),
            if description.is_valid { "valid" } else { "stale" },
            description.epoch
        );
    } else {
        println!("Cache:       empty (epoch {})", description.epoch);
    }
    if let Some(fault) = services.storage.last_fault() {
        println!("Storage:     degraded ({})", fault);
    }
    println!("Progress:    {} saved session(s)", saved.len());
    for (key, record) in &saved {
        let answered = record.user_answers.iter().filter(|a| a.is_some()).count();
        println!(
            "  {:<28} question {}/{}, {} answered, {}s left{}",
            key,
            record.current_index + 1,
            record.user_answers.len(),
            answered,
            record.time_remaining_seconds,
            if progress.is_recent(record) { "" } else { " (expired)" }
        );
    }
    println!("Mistakes:    {} question(s)", wrong);
    println!("Bookmarks:   {}", bookmarks);
    Ok(())
}

fn describe_outcome(outcome: &SyncOutcome) -> String {
    match outcome {
        SyncOutcome::Completed { timestamp } => format!("synced at {}", timestamp.to_rfc3339()),
        SyncOutcome::Failed { message } => format!("sync failed: {}", message),
        SyncOutcome::Skipped => "cache is fresh, nothing to do".to_string(),
        SyncOutcome::AlreadyRunning => "a sync is already running".to_string(),
        SyncOutcome::Offline => "offline".to_string(),
        SyncOutcome::Discarded => "sync result discarded".to_string(),
    }
}

async fn sync(services: &Services) -> Result<()> {
    if services.client.base_url().is_none() {
        bail!("No remote configured. Set api_base_url in config.json or EXAMSYNC_API_URL.");
    }
    services.probe().await;
    let outcome = services.scheduler().sync_now(SyncTrigger::Forced).await;
    if let SyncOutcome::Failed { message } = outcome {
        bail!("Sync failed: {}", message);
    }
    println!("{}", describe_outcome(&outcome));
    Ok(())
}

async fn resolve(services: &Services, json: bool) -> Result<()> {
    services.probe().await;
    let resolution = services.resolver().resolve().await;
    let data = &resolution.data;

    if json {
        let report = serde_json::json!({
            "origin": resolution.origin.to_string(),
            "fromCache": resolution.from_cache(),
            "exams": data.exam_count(),
            "questions": data.question_count(),
            "domains": data.domains().collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "Served from {}: {} exam(s), {} question(s)",
        resolution.origin,
        data.exam_count(),
        data.question_count()
    );
    for domain in data.domains() {
        let subtypes: Vec<&str> = data.subtypes(domain).collect();
        println!("  {}: {}", domain, subtypes.join(", "));
    }
    if resolution.from_cache() {
        println!("Working offline - data may be out of date.");
    }
    Ok(())
}

async fn prefetch(services: &Services) -> Result<()> {
    if !services.probe().await {
        bail!("Remote is unreachable, nothing to prefetch");
    }
    let resolver = Arc::new(services.resolver());
    let structure = resolver.resolve().await;
    let keys = structure.data.exam_keys();
    info!(exams = keys.len(), "Prefetching questions");

    let results: Vec<_> = stream::iter(keys)
        .map(|key| {
            let resolver = Arc::clone(&resolver);
            async move {
                let set = resolver.resolve_questions(&key).await;
                (key, set)
            }
        })
        .buffer_unordered(MAX_CONCURRENT_PREFETCH)
        .collect()
        .await;

    let mut remote = 0;
    let mut fallback = 0;
    for (key, set) in &results {
        match set {
            Some(set) if set.origin == DataOrigin::Remote => remote += 1,
            Some(set) => {
                warn!(exam = %key, origin = %set.origin, "Served without remote");
                fallback += 1;
            }
            None => warn!(exam = %key, "No questions available"),
        }
    }
    println!(
        "Prefetched {} of {} exam(s) from remote ({} from local copies)",
        remote,
        results.len(),
        fallback
    );
    Ok(())
}

async fn invalidate(services: &Services) -> Result<()> {
    let epoch = services.cache.invalidate().await;
    println!("Cache cleared (epoch {})", epoch);
    Ok(())
}

async fn watch(services: &Services) -> Result<()> {
    services.probe().await;

    let scheduler = services.scheduler();
    let mut events = scheduler.subscribe();
    scheduler.start();

    let live = LiveData::new(Arc::new(services.resolver()), services.config.foreground_refresh());
    let initial = live.load().await;
    println!("Serving {} data ({} exams)", initial.origin, initial.data.exam_count());
    live.start();

    // Re-probe on the foreground tick so reconnects reach the scheduler
    let mut probe = tokio::time::interval(services.config.foreground_refresh());
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    println!("Watching for updates, Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = probe.tick() => {
                services.probe().await;
            }
            event = events.recv() => match event {
                Ok(SyncEvent::Completed { payload, timestamp }) => {
                    println!(
                        "[{}] synced {} exam(s)",
                        timestamp.format("%H:%M:%S"),
                        payload.exam_count()
                    );
                }
                Ok(SyncEvent::Failed { message }) => {
                    println!("sync failed: {}", message);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped = skipped, "Missed sync events");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    live.stop();
    scheduler.stop();
    info!("examsync shutting down");
    Ok(())
}
