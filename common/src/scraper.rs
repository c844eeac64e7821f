// Scrape orchestrator
//
// One tick: fetch the feed, keep today's dishes, compare them with the
// latest stored snapshot and, on change, store a new version and push it to
// everyone currently listening.

use crate::civil::CivilCalendar;
use crate::clock::Clock;
use crate::db::MenuSnapshotStore;
use crate::feed::{items_for_date, MenuFeed};
use crate::freshness::menu_has_changed;
use crate::models::{MenuEntry, MenuItem};
use crate::notifier::MenuDispatcher;
use crate::scheduler::WindowSchedulerHandle;
use crate::telemetry;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

/// What a single scrape tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScrapeOutcome {
    /// The feed could not be fetched or decoded
    FetchFailed,
    /// The feed has nothing for today
    NoItemsForToday,
    /// Today's menu matches the stored snapshot
    Unchanged,
    /// A new snapshot version was stored
    Changed { version: i64, items: usize },
    /// The snapshot store failed; nothing was written
    StoreFailed,
}

impl ScrapeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScrapeOutcome::FetchFailed => "fetch_failed",
            ScrapeOutcome::NoItemsForToday => "no_items",
            ScrapeOutcome::Unchanged => "unchanged",
            ScrapeOutcome::Changed { .. } => "changed",
            ScrapeOutcome::StoreFailed => "store_failed",
        }
    }
}

pub struct ScrapeOrchestrator {
    feed: Arc<dyn MenuFeed>,
    menus: Arc<dyn MenuSnapshotStore>,
    dispatcher: Arc<MenuDispatcher>,
    window_scheduler: Option<WindowSchedulerHandle>,
    calendar: CivilCalendar,
    clock: Arc<dyn Clock>,
    tick_lock: Mutex<()>,
}

impl ScrapeOrchestrator {
    pub fn new(
        feed: Arc<dyn MenuFeed>,
        menus: Arc<dyn MenuSnapshotStore>,
        dispatcher: Arc<MenuDispatcher>,
        calendar: CivilCalendar,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            feed,
            menus,
            dispatcher,
            window_scheduler: None,
            calendar,
            clock,
            tick_lock: Mutex::new(()),
        }
    }

    /// Re-arm the window-open scheduler on every tick if it went idle
    pub fn with_window_scheduler(mut self, handle: WindowSchedulerHandle) -> Self {
        self.window_scheduler = Some(handle);
        self
    }

    /// Run one tick. Concurrent calls are serialized.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> ScrapeOutcome {
        let _tick = self.tick_lock.lock().await;

        if let Some(handle) = &self.window_scheduler {
            if let Err(e) = handle.ensure_armed() {
                warn!(error = %e, "Window-open scheduler unreachable");
            }
        }

        let outcome = self.scrape_and_store().await;

        if let ScrapeOutcome::Changed { version, items } = outcome {
            info!(version, items, "Menu changed, notifying listening users");
            if let Err(e) = self.dispatcher.dispatch_listening().await {
                error!(error = %e, "Failed to dispatch changed menu");
            }
        }

        telemetry::record_scrape(outcome.as_str());
        outcome
    }

    async fn scrape_and_store(&self) -> ScrapeOutcome {
        let scraped_at = self.clock.now();
        let today = self.calendar.civil_date(scraped_at);

        let items = match self.feed.fetch_menu().await {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "Failed to fetch menu feed");
                return ScrapeOutcome::FetchFailed;
            }
        };

        let todays = items_for_date(&items, today);
        if todays.is_empty() {
            debug!(%today, "Feed has no dishes for today");
            return ScrapeOutcome::NoItemsForToday;
        }

        let stored = match self.menus.latest_version_entries(today).await {
            Ok(stored) => stored,
            Err(e) => {
                error!(error = %e, "Failed to read stored menu, skipping tick");
                return ScrapeOutcome::StoreFailed;
            }
        };

        if !menu_has_changed(&todays, &stored) {
            debug!(%today, items = todays.len(), "Menu unchanged");
            return ScrapeOutcome::Unchanged;
        }

        self.store_snapshot(&todays, scraped_at).await
    }

    async fn store_snapshot(
        &self,
        items: &[MenuItem],
        scraped_at: chrono::DateTime<chrono::Utc>,
    ) -> ScrapeOutcome {
        let version = match self.menus.max_version().await {
            Ok(max) => max.map_or(0, |v| v + 1),
            Err(e) => {
                error!(error = %e, "Failed to read current menu version");
                return ScrapeOutcome::StoreFailed;
            }
        };

        let entries: Vec<MenuEntry> = items
            .iter()
            .map(|item| MenuEntry::from_item(version, item, scraped_at))
            .collect();

        match self.menus.insert_entries(version, &entries).await {
            Ok(()) => {
                telemetry::record_menu_version_inserted();
                ScrapeOutcome::Changed {
                    version,
                    items: entries.len(),
                }
            }
            Err(e) => {
                error!(error = %e, version, "Failed to store menu snapshot");
                ScrapeOutcome::StoreFailed
            }
        }
    }
}
