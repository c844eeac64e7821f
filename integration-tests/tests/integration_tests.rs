// End-to-end tests of the notification pipeline
//
// The pipeline runs against the in-process store, a scripted feed, a
// recording message channel and either a manually driven clock or one that
// follows paused tokio time.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use common::bootstrap::{build_pipeline, Stores};
use common::channel::MessageChannel;
use common::civil::CivilCalendar;
use common::clock::{Clock, ManualClock};
use common::config::Settings;
use common::db::{MemoryStore, MenuSnapshotStore, PreferenceStore};
use common::errors::{ChannelError, FeedError};
use common::feed::MenuFeed;
use common::models::{MenuEntry, MenuItem, NotificationPreference, UserId};
use common::notifier::{DispatchTrigger, MenuDispatcher, NotifierService};
use common::scheduler::{ScrapeEngine, WindowCursor, WindowTimerState};
use common::scraper::ScrapeOutcome;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Feed whose menu the test replaces between scrapes
#[derive(Default)]
struct ScriptedFeed {
    items: Mutex<Vec<MenuItem>>,
}

impl ScriptedFeed {
    async fn serve(&self, items: Vec<MenuItem>) {
        *self.items.lock().await = items;
    }
}

#[async_trait]
impl MenuFeed for ScriptedFeed {
    async fn fetch_menu(&self) -> Result<Vec<MenuItem>, FeedError> {
        Ok(self.items.lock().await.clone())
    }
}

/// Channel that keeps every message instead of sending it
#[derive(Default)]
struct RecordingChannel {
    sent: Mutex<Vec<(UserId, String)>>,
}

impl RecordingChannel {
    async fn recipients(&self) -> Vec<UserId> {
        self.sent.lock().await.iter().map(|(user, _)| *user).collect()
    }
}

#[async_trait]
impl MessageChannel for RecordingChannel {
    async fn send_menu(&self, user_id: UserId, text: &str) -> Result<(), ChannelError> {
        self.sent.lock().await.push((user_id, text.to_string()));
        Ok(())
    }
}

fn calendar() -> CivilCalendar {
    CivilCalendar::new(chrono_tz::Europe::Berlin)
}

fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()
}

fn monday_at(minute: u16) -> DateTime<Utc> {
    calendar().instant_at(monday(), minute)
}

fn dish(description: &str) -> MenuItem {
    MenuItem {
        title: "Angebot 1".to_string(),
        description: description.to_string(),
        source_date: monday(),
    }
}

/// Clock that follows tokio's (possibly paused) time from a fixed civil start
struct TokioClock {
    origin: tokio::time::Instant,
    start: DateTime<Utc>,
}

impl TokioClock {
    fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            origin: tokio::time::Instant::now(),
            start,
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        self.start + chrono::Duration::from_std(self.origin.elapsed()).unwrap()
    }
}

struct Harness<C> {
    clock: Arc<C>,
    feed: Arc<ScriptedFeed>,
    channel: Arc<RecordingChannel>,
    store: Arc<MemoryStore>,
    engine: Arc<ScrapeEngine>,
    service: Arc<NotifierService>,
    window_task: Option<JoinHandle<()>>,
}

impl Harness<ManualClock> {
    async fn start(now: DateTime<Utc>) -> Self {
        Self::with_clock(Arc::new(ManualClock::new(now))).await
    }
}

impl<C: Clock + 'static> Harness<C> {
    async fn with_clock(clock: Arc<C>) -> Self {
        let feed = Arc::new(ScriptedFeed::default());
        let channel = Arc::new(RecordingChannel::default());
        let store = Arc::new(MemoryStore::new());
        let stores = Stores {
            menus: store.clone(),
            preferences: store.clone(),
            pool: None,
        };

        let pipeline = build_pipeline(
            &Settings::default(),
            &stores,
            feed.clone(),
            channel.clone(),
            clock.clone(),
        )
        .unwrap();
        let (engine, service, window_task) = pipeline.spawn_window_scheduler();

        Self {
            clock,
            feed,
            channel,
            store,
            engine,
            service,
            window_task: Some(window_task),
        }
    }
}

impl<C> Drop for Harness<C> {
    fn drop(&mut self) {
        self.engine.stop();
    }
}

fn window_at(user_id: UserId, start: u16) -> NotificationPreference {
    let mut preference = NotificationPreference::default_for(user_id);
    preference.window_start_minute = start;
    preference
}

#[tokio::test]
async fn changed_menu_reaches_listening_user() {
    let harness = Harness::start(monday_at(650)).await;
    harness
        .service
        .update_preferences(&NotificationPreference::default_for(1))
        .await
        .unwrap();

    harness.feed.serve(vec![dish("Linseneintopf")]).await;
    let outcome = harness.service.trigger_scrape_now().await;

    assert_eq!(
        outcome,
        ScrapeOutcome::Changed {
            version: 0,
            items: 1
        }
    );
    assert_eq!(harness.channel.recipients().await, vec![1]);
}

#[tokio::test]
async fn suppressed_user_is_skipped_for_the_day() {
    let harness = Harness::start(monday_at(650)).await;
    harness
        .service
        .update_preferences(&NotificationPreference::default_for(1))
        .await
        .unwrap();
    harness.feed.serve(vec![dish("Linseneintopf")]).await;
    harness.service.trigger_scrape_now().await;

    harness.service.mark_intends_to_report(1).await.unwrap();
    harness.clock.set(monday_at(700));
    harness.feed.serve(vec![dish("Linseneintopf"), dish("Pasta")]).await;
    let outcome = harness.service.trigger_scrape_now().await;

    assert!(matches!(outcome, ScrapeOutcome::Changed { version: 1, .. }));
    assert_eq!(harness.channel.recipients().await, vec![1]);

    // An explicit request still gets through
    harness.service.dispatch_current_menu_to(1).await.unwrap();
    assert_eq!(harness.channel.recipients().await, vec![1, 1]);
}

#[tokio::test]
async fn unchanged_menu_sends_nothing() {
    let harness = Harness::start(monday_at(650)).await;
    harness
        .service
        .update_preferences(&NotificationPreference::default_for(1))
        .await
        .unwrap();
    harness.feed.serve(vec![dish("Linseneintopf")]).await;

    harness.service.trigger_scrape_now().await;
    harness.clock.set(monday_at(660));
    assert_eq!(
        harness.service.trigger_scrape_now().await,
        ScrapeOutcome::Unchanged
    );
    assert_eq!(harness.channel.recipients().await.len(), 1);
}

#[tokio::test]
async fn window_open_notifies_each_user_once() {
    let store = Arc::new(MemoryStore::new());
    let mut preference = NotificationPreference::default_for(1);
    preference.window_start_minute = 540;
    store.upsert_preference(&preference).await.unwrap();

    let clock = Arc::new(ManualClock::new(monday_at(480)));
    let channel = Arc::new(RecordingChannel::default());
    let dispatcher = MenuDispatcher::new(
        store.clone(),
        store.clone(),
        channel.clone(),
        calendar(),
        clock.clone(),
        "Griebnitzsee",
    );
    store
        .insert_entries(0, &[MenuEntry::from_item(0, &dish("Linseneintopf"), clock.now())])
        .await
        .unwrap();

    let mut cursor = WindowCursor::new(store.clone(), calendar(), 2, monday_at(480));
    for minute in [545, 600] {
        clock.set(monday_at(minute));
        let users = cursor.fire(clock.now()).await.unwrap();
        dispatcher
            .send_latest_menu_to(&users, DispatchTrigger::WindowOpened)
            .await
            .unwrap();
        cursor.arm(clock.now()).await;
    }

    assert_eq!(channel.recipients().await, vec![1]);
    assert_eq!(cursor.last_fire_minute(), 600);
}

#[tokio::test]
async fn earlier_window_start_rearms_the_scheduler() {
    let harness = Harness::start(monday_at(540)).await;
    harness
        .service
        .update_preferences(&NotificationPreference::default_for(1))
        .await
        .unwrap();
    let status = harness.service.scheduler_status().await.unwrap();
    assert_eq!(
        status.state,
        WindowTimerState::Armed {
            fire_at: monday_at(600),
            minute: 600
        }
    );

    let mut earlier = NotificationPreference::default_for(2);
    earlier.window_start_minute = 595;
    harness.service.update_preferences(&earlier).await.unwrap();
    let status = harness.service.scheduler_status().await.unwrap();
    assert_eq!(
        status.state,
        WindowTimerState::Armed {
            fire_at: monday_at(595),
            minute: 595
        }
    );

    // One minute ahead is inside the safety margin
    let mut imminent = NotificationPreference::default_for(3);
    imminent.window_start_minute = 541;
    harness.service.update_preferences(&imminent).await.unwrap();
    let status = harness.service.scheduler_status().await.unwrap();
    assert_eq!(
        status.state,
        WindowTimerState::Armed {
            fire_at: monday_at(595),
            minute: 595
        }
    );
}

#[tokio::test]
async fn invalid_preferences_are_rejected() {
    let harness = Harness::start(monday_at(540)).await;
    let mut inverted = NotificationPreference::default_for(1);
    inverted.window_start_minute = 900;
    inverted.window_end_minute = 600;

    assert!(harness.service.update_preferences(&inverted).await.is_err());
    assert_eq!(harness.store.get_preference(1).await.unwrap(), None);
}

#[tokio::test]
async fn first_access_creates_default_preferences() {
    let harness = Harness::start(monday_at(540)).await;
    let preference = harness.service.get_preferences(9).await.unwrap();
    assert_eq!(preference, NotificationPreference::default_for(9));

    harness.service.delete_preferences(9).await.unwrap();
    assert_eq!(harness.store.get_preference(9).await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn window_scheduler_task_fires_and_rearms() {
    let clock = Arc::new(TokioClock::starting_at(monday_at(480)));
    let harness = Harness::with_clock(clock).await;
    harness.service.update_preferences(&window_at(1, 540)).await.unwrap();
    harness.service.update_preferences(&window_at(2, 600)).await.unwrap();
    harness.feed.serve(vec![dish("Linseneintopf")]).await;
    harness.service.trigger_scrape_now().await;

    let status = harness.service.scheduler_status().await.unwrap();
    assert_eq!(
        status.state,
        WindowTimerState::Armed {
            fire_at: monday_at(540),
            minute: 540
        }
    );
    assert!(harness.channel.recipients().await.is_empty());

    // 09:05
    tokio::time::sleep(Duration::from_secs(65 * 60)).await;
    assert_eq!(harness.clock.now(), monday_at(545));
    assert_eq!(harness.channel.recipients().await, vec![1]);
    let status = harness.service.scheduler_status().await.unwrap();
    assert_eq!(
        status.state,
        WindowTimerState::Armed {
            fire_at: monday_at(600),
            minute: 600
        }
    );

    // 10:05, nothing left today so tomorrow's earliest start is armed
    tokio::time::sleep(Duration::from_secs(60 * 60)).await;
    assert_eq!(harness.channel.recipients().await, vec![1, 2]);
    let tuesday = monday().succ_opt().unwrap();
    let status = harness.service.scheduler_status().await.unwrap();
    assert_eq!(
        status.state,
        WindowTimerState::Armed {
            fire_at: calendar().instant_at(tuesday, 540),
            minute: 540
        }
    );
    assert_eq!(status.last_fire_minute, 600);

    // Tuesday has no stored menu, so the timer fires without sending
    tokio::time::sleep(Duration::from_secs(24 * 60 * 60)).await;
    assert_eq!(harness.channel.recipients().await, vec![1, 2]);
}

#[tokio::test]
async fn idle_scheduler_rearms_on_scrape() {
    let harness = Harness::start(monday_at(480)).await;
    let status = harness.service.scheduler_status().await.unwrap();
    assert_eq!(status.state, WindowTimerState::Idle);

    // Stored behind the service's back, so the scheduler is not told
    harness
        .store
        .upsert_preference(&NotificationPreference::default_for(1))
        .await
        .unwrap();
    assert_eq!(
        harness.service.trigger_scrape_now().await,
        ScrapeOutcome::NoItemsForToday
    );

    let status = harness.service.scheduler_status().await.unwrap();
    assert_eq!(
        status.state,
        WindowTimerState::Armed {
            fire_at: monday_at(600),
            minute: 600
        }
    );
}

#[tokio::test]
async fn preferences_are_saved_when_scheduler_is_stopped() {
    let mut harness = Harness::start(monday_at(480)).await;
    harness.engine.stop();
    harness.window_task.take().unwrap().await.unwrap();

    harness
        .service
        .update_preferences(&window_at(1, 540))
        .await
        .unwrap();

    let stored = harness.store.get_preference(1).await.unwrap().unwrap();
    assert_eq!(stored.window_start_minute, 540);
    assert!(harness.service.scheduler_status().await.is_err());
}

#[tokio::test]
async fn listening_window_is_set_from_clock_times() {
    let harness = Harness::start(monday_at(480)).await;

    let preference = harness
        .service
        .set_listening_window(4, "11:30", "13:15")
        .await
        .unwrap();
    assert_eq!(preference.window_start_minute, 690);
    assert_eq!(preference.window_end_minute, 795);
    assert_eq!(
        harness.store.get_preference(4).await.unwrap(),
        Some(preference)
    );

    assert!(harness
        .service
        .set_listening_window(4, "11h30", "13:15")
        .await
        .is_err());
    assert!(harness
        .service
        .set_listening_window(4, "14:00", "12:00")
        .await
        .is_err());
    let stored = harness.store.get_preference(4).await.unwrap().unwrap();
    assert_eq!(stored.window_start_minute, 690);
}
