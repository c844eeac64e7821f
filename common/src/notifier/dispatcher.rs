// Listening-window dispatcher
//
// Sends the latest menu snapshot of the civil day to a set of users. Sends
// are best effort: one failing recipient never stops the rest of a batch.

use crate::channel::{format_menu_message, MessageChannel};
use crate::civil::CivilCalendar;
use crate::clock::Clock;
use crate::db::{MenuSnapshotStore, PreferenceStore};
use crate::errors::DatabaseError;
use crate::models::UserId;
use crate::telemetry;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Why a batch of menu messages is being sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchTrigger {
    /// A scrape stored a new snapshot version
    MenuChanged,
    /// Users' notification windows just opened
    WindowOpened,
    /// A user asked for the current menu
    OnDemand,
}

impl DispatchTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchTrigger::MenuChanged => "menu_changed",
            DispatchTrigger::WindowOpened => "window_opened",
            DispatchTrigger::OnDemand => "on_demand",
        }
    }
}

/// Result of one dispatch batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub recipients: usize,
    pub delivered: usize,
    pub failed: Vec<UserId>,
}

pub struct MenuDispatcher {
    menus: Arc<dyn MenuSnapshotStore>,
    preferences: Arc<dyn PreferenceStore>,
    channel: Arc<dyn MessageChannel>,
    calendar: CivilCalendar,
    clock: Arc<dyn Clock>,
    location: String,
}

impl MenuDispatcher {
    pub fn new(
        menus: Arc<dyn MenuSnapshotStore>,
        preferences: Arc<dyn PreferenceStore>,
        channel: Arc<dyn MessageChannel>,
        calendar: CivilCalendar,
        clock: Arc<dyn Clock>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            menus,
            preferences,
            channel,
            calendar,
            clock,
            location: location.into(),
        }
    }

    /// Send the current menu to every user whose window covers the current minute
    #[instrument(skip(self))]
    pub async fn dispatch_listening(&self) -> Result<DispatchReport, DatabaseError> {
        let now = self.clock.now();
        let now_minute = self.calendar.minute_of_day(now);
        let weekday_bit = self.calendar.weekday_bit(now);
        let today = self.calendar.civil_date(now);

        let users = self
            .preferences
            .users_in_window(now_minute, weekday_bit, today)
            .await?;

        self.send_latest_menu_to(&users, DispatchTrigger::MenuChanged)
            .await
    }

    /// Send the current menu to one user regardless of their window
    #[instrument(skip(self))]
    pub async fn dispatch_to(&self, user_id: UserId) -> Result<DispatchReport, DatabaseError> {
        self.send_latest_menu_to(&[user_id], DispatchTrigger::OnDemand)
            .await
    }

    /// Send today's latest snapshot to `users`.
    ///
    /// Automatic triggers skip the batch when no snapshot exists for today;
    /// on-demand requests get the "no menus" message instead.
    pub async fn send_latest_menu_to(
        &self,
        users: &[UserId],
        trigger: DispatchTrigger,
    ) -> Result<DispatchReport, DatabaseError> {
        if users.is_empty() {
            debug!(trigger = trigger.as_str(), "No recipients for menu dispatch");
            return Ok(DispatchReport::default());
        }

        let today = self.calendar.civil_date(self.clock.now());
        let entries = self.menus.latest_version_entries(today).await?;
        if entries.is_empty() && trigger != DispatchTrigger::OnDemand {
            info!(
                trigger = trigger.as_str(),
                %today,
                "No menu stored for today, nothing to dispatch"
            );
            return Ok(DispatchReport::default());
        }

        let message = format_menu_message(&self.location, &entries);
        let mut report = DispatchReport {
            recipients: users.len(),
            ..DispatchReport::default()
        };

        for &user_id in users {
            match self.channel.send_menu(user_id, &message).await {
                Ok(()) => {
                    report.delivered += 1;
                    telemetry::record_message_sent(trigger.as_str());
                }
                Err(e) => {
                    warn!(user_id, error = %e, trigger = trigger.as_str(), "Failed to send menu");
                    report.failed.push(user_id);
                    telemetry::record_message_failed(trigger.as_str());
                }
            }
        }

        info!(
            trigger = trigger.as_str(),
            recipients = report.recipients,
            delivered = report.delivered,
            failed = report.failed.len(),
            "Menu dispatched"
        );
        Ok(report)
    }
}
