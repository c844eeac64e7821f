// Window-open scheduler
//
// Keeps exactly one timer armed for the next civil minute at which some
// user's notification window opens. When it fires, every user whose window
// opened since the previous fire receives the current menu.
//
// All state lives in a single task. Other components talk to it through a
// cloneable `WindowSchedulerHandle`, so preference changes, scrape ticks and
// timer fires are processed one at a time.

use crate::civil::{format_minute, CivilCalendar};
use crate::clock::Clock;
use crate::db::PreferenceStore;
use crate::errors::{DatabaseError, ScheduleError};
use crate::models::UserId;
use crate::notifier::{DispatchTrigger, MenuDispatcher};
use crate::telemetry;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

const COMMAND_BUFFER: usize = 64;

/// Timer state of the window-open scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowTimerState {
    /// No timer armed
    Idle,
    /// Timer set to go off at `fire_at`, the civil `minute` of some window start
    Armed { fire_at: DateTime<Utc>, minute: u16 },
    /// Dispatching for windows that just opened
    Firing,
}

/// Result of one arm attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmOutcome {
    Armed {
        fire_at: DateTime<Utc>,
        minute: u16,
        /// Armed from the earliest start of any day rather than a later start today
        fallback: bool,
    },
    /// No user wants notifications
    Starved,
    /// The preference store failed; the previous timer, if any, was kept
    Failed,
}

/// Snapshot of the scheduler for diagnostics and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSchedulerStatus {
    pub state: WindowTimerState,
    pub last_fire_minute: u16,
}

/// Deterministic core of the window-open scheduler.
///
/// Every method takes the current instant explicitly; the core never reads
/// a clock or sleeps.
pub struct WindowCursor {
    preferences: Arc<dyn PreferenceStore>,
    calendar: CivilCalendar,
    reschedule_margin: Duration,
    last_fire_at: DateTime<Utc>,
    state: WindowTimerState,
}

impl WindowCursor {
    /// Start with `last_fire_at` so windows that opened before startup are not replayed
    pub fn new(
        preferences: Arc<dyn PreferenceStore>,
        calendar: CivilCalendar,
        reschedule_margin_minutes: u16,
        last_fire_at: DateTime<Utc>,
    ) -> Self {
        Self {
            preferences,
            calendar,
            reschedule_margin: Duration::minutes(i64::from(reschedule_margin_minutes)),
            last_fire_at,
            state: WindowTimerState::Idle,
        }
    }

    pub fn state(&self) -> WindowTimerState {
        self.state
    }

    pub fn last_fire_minute(&self) -> u16 {
        self.calendar.minute_of_day(self.last_fire_at)
    }

    pub fn status(&self) -> WindowSchedulerStatus {
        WindowSchedulerStatus {
            state: self.state,
            last_fire_minute: self.last_fire_minute(),
        }
    }

    /// Instant the armed timer should go off, if any
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        match self.state {
            WindowTimerState::Armed { fire_at, .. } => Some(fire_at),
            _ => None,
        }
    }

    /// Arm the timer for the next window start after the last fire.
    ///
    /// Falls back to the earliest window start of any user, at its next
    /// occurrence, when no later start exists today. Store failures leave an
    /// already armed timer in place.
    pub async fn arm(&mut self, now: DateTime<Utc>) -> ArmOutcome {
        let today = self.calendar.civil_date(now);
        let weekday_bit = self.calendar.weekday_bit(now);
        let now_minute = self.calendar.minute_of_day(now);
        let after = if self.fired_on(today) {
            self.last_fire_minute().max(now_minute)
        } else {
            now_minute
        };

        let next = match self
            .preferences
            .next_window_start(after, weekday_bit, today)
            .await
        {
            Ok(Some(minute)) => Some((minute, false)),
            Ok(None) => match self.preferences.global_min_window_start().await {
                Ok(found) => found.map(|minute| (minute, true)),
                Err(e) => return self.arm_failed(e),
            },
            Err(e) => return self.arm_failed(e),
        };

        match next {
            Some((minute, fallback)) => {
                let fire_at = self.calendar.next_occurrence(minute, now);
                self.state = WindowTimerState::Armed { fire_at, minute };
                telemetry::update_armed_minute(Some(minute));
                info!(
                    window_start = %format_minute(minute),
                    %fire_at,
                    fallback,
                    "Window-open timer armed"
                );
                ArmOutcome::Armed {
                    fire_at,
                    minute,
                    fallback,
                }
            }
            None => {
                self.state = WindowTimerState::Idle;
                telemetry::update_armed_minute(None);
                warn!("No user wants notifications, window-open timer left unarmed");
                ArmOutcome::Starved
            }
        }
    }

    fn fired_on(&self, date: chrono::NaiveDate) -> bool {
        self.calendar.civil_date(self.last_fire_at) == date
    }

    fn arm_failed(&mut self, e: DatabaseError) -> ArmOutcome {
        match self.state {
            WindowTimerState::Armed { fire_at, minute } => {
                error!(
                    error = %e,
                    window_start = %format_minute(minute),
                    %fire_at,
                    "Failed to compute next window start, keeping previous timer"
                );
            }
            _ => {
                self.state = WindowTimerState::Idle;
                telemetry::update_armed_minute(None);
                error!(
                    error = %e,
                    "Failed to compute next window start, no window-open timer is armed"
                );
            }
        }
        ArmOutcome::Failed
    }

    /// Range `(after, up_to]` of window starts that opened since the last fire.
    ///
    /// A new civil day, or a clock behind the last fire, restarts the range at
    /// midnight.
    pub fn open_window(&self, now: DateTime<Utc>) -> (u16, u16) {
        let now_minute = self.calendar.minute_of_day(now);
        let last_minute = self.last_fire_minute();

        if !self.fired_on(self.calendar.civil_date(now)) || now_minute < last_minute {
            // The lower bound is exclusive, so a window starting at 00:00 never
            // gets a window-open push. It still receives change notifications.
            (0, now_minute)
        } else {
            (last_minute, now_minute)
        }
    }

    /// Enter the firing state and collect the users whose window just opened.
    ///
    /// The cursor advances to `now` even when the lookup fails, so a broken
    /// store does not replay the same windows forever.
    pub async fn fire(&mut self, now: DateTime<Utc>) -> Result<Vec<UserId>, DatabaseError> {
        self.state = WindowTimerState::Firing;

        let (after, up_to) = self.open_window(now);
        let users = self
            .preferences
            .users_with_window_start_between(
                after,
                up_to,
                self.calendar.weekday_bit(now),
                self.calendar.civil_date(now),
            )
            .await;

        self.last_fire_at = now;
        debug!(
            after = %format_minute(after),
            up_to = %format_minute(up_to),
            "Window-open timer fired"
        );
        users
    }

    /// Whether a user's new window start should replace the armed timer.
    ///
    /// It must open before the armed instant and at least the reschedule
    /// margin from now. An idle scheduler always re-arms.
    pub fn should_rearm_for(&self, window_start_minute: u16, now: DateTime<Utc>) -> bool {
        match self.state {
            WindowTimerState::Idle => true,
            WindowTimerState::Firing => false,
            WindowTimerState::Armed { fire_at, .. } => {
                let candidate = self
                    .calendar
                    .instant_at(self.calendar.civil_date(now), window_start_minute);
                candidate < fire_at && candidate >= now + self.reschedule_margin
            }
        }
    }

    /// React to a user's window start changing; `None` when the timer was kept
    pub async fn preferences_changed(
        &mut self,
        window_start_minute: u16,
        now: DateTime<Utc>,
    ) -> Option<ArmOutcome> {
        if self.should_rearm_for(window_start_minute, now) {
            Some(self.arm(now).await)
        } else {
            None
        }
    }

    /// Arm when idle; an armed timer is left alone
    pub async fn ensure_armed(&mut self, now: DateTime<Utc>) -> Option<ArmOutcome> {
        match self.state {
            WindowTimerState::Idle => Some(self.arm(now).await),
            _ => None,
        }
    }
}

enum WindowCommand {
    PreferencesChanged {
        user_id: UserId,
        window_start_minute: u16,
    },
    EnsureArmed,
    Status(oneshot::Sender<WindowSchedulerStatus>),
}

/// Cloneable entry point into the running window-open scheduler
#[derive(Clone)]
pub struct WindowSchedulerHandle {
    commands: mpsc::Sender<WindowCommand>,
}

impl WindowSchedulerHandle {
    /// Tell the scheduler a user's window start changed
    pub async fn preferences_changed(
        &self,
        user_id: UserId,
        window_start_minute: u16,
    ) -> Result<(), ScheduleError> {
        self.send(WindowCommand::PreferencesChanged {
            user_id,
            window_start_minute,
        })
        .await
    }

    /// Arm the timer if nothing is armed.
    ///
    /// Never waits: when the command queue is full, a queued command will
    /// observe the same state anyway.
    pub fn ensure_armed(&self) -> Result<(), ScheduleError> {
        match self.commands.try_send(WindowCommand::EnsureArmed) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ScheduleError::SchedulerStopped),
        }
    }

    pub async fn status(&self) -> Result<WindowSchedulerStatus, ScheduleError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(WindowCommand::Status(reply_tx)).await?;
        reply_rx.await.map_err(|_| ScheduleError::SchedulerStopped)
    }

    async fn send(&self, command: WindowCommand) -> Result<(), ScheduleError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ScheduleError::SchedulerStopped)
    }
}

/// Task that owns a `WindowCursor` and drives its timer
pub struct WindowOpenScheduler {
    cursor: WindowCursor,
    dispatcher: Arc<MenuDispatcher>,
    clock: Arc<dyn Clock>,
    commands: mpsc::Receiver<WindowCommand>,
}

impl WindowOpenScheduler {
    pub fn new(
        cursor: WindowCursor,
        dispatcher: Arc<MenuDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> (Self, WindowSchedulerHandle) {
        let (commands_tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let scheduler = Self {
            cursor,
            dispatcher,
            clock,
            commands,
        };
        (scheduler, WindowSchedulerHandle { commands: commands_tx })
    }

    pub fn spawn(self, shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown_rx))
    }

    /// Arm once, then serve timer fires and commands until shutdown
    #[instrument(skip_all)]
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("Starting window-open scheduler");
        self.cursor.arm(self.clock.now()).await;

        loop {
            let deadline = self.cursor.deadline();
            let sleep_until = self.sleep_target(deadline);

            tokio::select! {
                _ = tokio::time::sleep_until(sleep_until), if deadline.is_some() => {
                    self.fire().await;
                }
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => {
                        info!("All scheduler handles dropped, stopping window-open scheduler");
                        break;
                    }
                },
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping window-open scheduler");
                    break;
                }
            }
        }

        telemetry::update_armed_minute(None);
        info!("Window-open scheduler stopped");
    }

    fn sleep_target(&self, deadline: Option<DateTime<Utc>>) -> tokio::time::Instant {
        let now = tokio::time::Instant::now();
        match deadline {
            Some(fire_at) => {
                let remaining = (fire_at - self.clock.now()).to_std().unwrap_or_default();
                now + remaining
            }
            None => now,
        }
    }

    async fn fire(&mut self) {
        let now = self.clock.now();
        match self.cursor.fire(now).await {
            Ok(users) if users.is_empty() => {
                debug!("No windows opened since the last fire");
            }
            Ok(users) => {
                if let Err(e) = self
                    .dispatcher
                    .send_latest_menu_to(&users, DispatchTrigger::WindowOpened)
                    .await
                {
                    error!(error = %e, "Failed to dispatch menu to opened windows");
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to look up users whose window opened");
            }
        }

        self.cursor.arm(self.clock.now()).await;
    }

    async fn handle(&mut self, command: WindowCommand) {
        match command {
            WindowCommand::PreferencesChanged {
                user_id,
                window_start_minute,
            } => {
                let outcome = self
                    .cursor
                    .preferences_changed(window_start_minute, self.clock.now())
                    .await;
                debug!(
                    user_id,
                    window_start = %format_minute(window_start_minute),
                    rearmed = outcome.is_some(),
                    "Preferences changed"
                );
            }
            WindowCommand::EnsureArmed => {
                self.cursor.ensure_armed(self.clock.now()).await;
            }
            WindowCommand::Status(reply) => {
                let _ = reply.send(self.cursor.status());
            }
        }
    }
}
