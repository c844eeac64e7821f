// Bootstrap utilities for binary initialization
//
// Builds the stores, adapters and pipeline components from `Settings`.
// The scheduler binary and the integration tests assemble the pipeline
// through the same `build_pipeline` call.

use crate::channel::{MessageChannel, TelegramChannel};
use crate::civil::CivilCalendar;
use crate::clock::Clock;
use crate::config::Settings;
use crate::db::{
    DbPool, MemoryStore, MenuSnapshotStore, PgMenuSnapshotStore, PgPreferenceStore,
    PreferenceStore,
};
use crate::feed::{MenuFeed, SpeiseplanFeed};
use crate::notifier::{MenuDispatcher, NotifierService};
use crate::schedule::CronCadence;
use crate::scheduler::{ScrapeEngine, WindowCursor, WindowOpenScheduler};
use crate::scraper::ScrapeOrchestrator;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Snapshot and preference stores, plus the pool backing them if any
pub struct Stores {
    pub menus: Arc<dyn MenuSnapshotStore>,
    pub preferences: Arc<dyn PreferenceStore>,
    pub pool: Option<DbPool>,
}

impl Stores {
    /// Both stores backed by one in-process `MemoryStore`
    pub fn in_memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            menus: store.clone(),
            preferences: store,
            pool: None,
        }
    }
}

/// Initialize database pool
///
/// # Errors
/// Returns error if the pool cannot connect or migrations fail
#[tracing::instrument(skip(settings))]
pub async fn init_database_pool(settings: &Settings) -> Result<DbPool> {
    info!("Initializing database pool");

    let db_pool = DbPool::new(&settings.database)
        .await
        .context("Failed to initialize database pool")?;
    db_pool
        .migrate()
        .await
        .context("Failed to run database migrations")?;

    info!("Database pool initialized");
    Ok(db_pool)
}

/// PostgreSQL stores when a database URL is configured, in-process stores otherwise
pub async fn init_stores(settings: &Settings) -> Result<Stores> {
    if settings.database.url.is_empty() {
        info!("No database URL configured, keeping state in memory");
        return Ok(Stores::in_memory());
    }

    let pool = init_database_pool(settings).await?;
    Ok(Stores {
        menus: Arc::new(PgMenuSnapshotStore::new(pool.clone())),
        preferences: Arc::new(PgPreferenceStore::new(pool.clone())),
        pool: Some(pool),
    })
}

/// HTTP client for the configured menu feed
pub fn init_feed(settings: &Settings) -> Result<Arc<dyn MenuFeed>> {
    let feed = SpeiseplanFeed::new(&settings.feed).context("Failed to create menu feed client")?;
    Ok(Arc::new(feed))
}

/// Telegram channel for outbound menu messages
pub fn init_channel(settings: &Settings) -> Result<Arc<dyn MessageChannel>> {
    if settings.telegram.bot_token.is_empty() {
        anyhow::bail!("Telegram bot_token is not configured");
    }
    let channel =
        TelegramChannel::new(&settings.telegram).context("Failed to create Telegram channel")?;
    Ok(Arc::new(channel))
}

/// The wired pipeline; nothing runs until `spawn_window_scheduler` and `engine.start()`
pub struct Pipeline {
    pub engine: Arc<ScrapeEngine>,
    pub window_scheduler: WindowOpenScheduler,
    pub service: Arc<NotifierService>,
}

impl Pipeline {
    /// Start the window-open scheduler on the scrape engine's shutdown channel,
    /// so `engine.stop()` ends both loops
    pub fn spawn_window_scheduler(
        self,
    ) -> (Arc<ScrapeEngine>, Arc<NotifierService>, JoinHandle<()>) {
        let shutdown_rx = self.engine.shutdown_receiver();
        let window_task = self.window_scheduler.spawn(shutdown_rx);
        (self.engine, self.service, window_task)
    }
}

/// Wire dispatcher, window-open scheduler, orchestrator, scrape engine and service
pub fn build_pipeline(
    settings: &Settings,
    stores: &Stores,
    feed: Arc<dyn MenuFeed>,
    channel: Arc<dyn MessageChannel>,
    clock: Arc<dyn Clock>,
) -> Result<Pipeline> {
    let calendar = CivilCalendar::from_name(&settings.notifier.timezone)?;
    let cadence = CronCadence::new(&settings.scraper.cron_expression, calendar.timezone())?;

    let dispatcher = Arc::new(MenuDispatcher::new(
        stores.menus.clone(),
        stores.preferences.clone(),
        channel,
        calendar,
        clock.clone(),
        settings.notifier.location_name.clone(),
    ));

    let cursor = WindowCursor::new(
        stores.preferences.clone(),
        calendar,
        settings.notifier.reschedule_margin_minutes,
        clock.now(),
    );

    let (window_scheduler, handle) =
        WindowOpenScheduler::new(cursor, dispatcher.clone(), clock.clone());

    let orchestrator = Arc::new(
        ScrapeOrchestrator::new(
            feed,
            stores.menus.clone(),
            dispatcher.clone(),
            calendar,
            clock.clone(),
        )
        .with_window_scheduler(handle.clone()),
    );

    let engine = Arc::new(ScrapeEngine::new(cadence, orchestrator.clone(), clock.clone()));

    let service = Arc::new(NotifierService::new(
        orchestrator,
        dispatcher,
        stores.preferences.clone(),
        handle,
        calendar,
        clock,
    ));

    info!(
        timezone = %settings.notifier.timezone,
        cron = %settings.scraper.cron_expression,
        "Notification pipeline assembled"
    );

    Ok(Pipeline {
        engine,
        window_scheduler,
        service,
    })
}
