// Notifier service: the operations a chat front end calls into

use crate::civil::{parse_minute, CivilCalendar};
use crate::clock::Clock;
use crate::db::PreferenceStore;
use crate::errors::NotifierError;
use crate::models::{NotificationPreference, UserId};
use crate::notifier::{DispatchReport, MenuDispatcher};
use crate::scheduler::{WindowSchedulerHandle, WindowSchedulerStatus};
use crate::scraper::{ScrapeOrchestrator, ScrapeOutcome};
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub struct NotifierService {
    orchestrator: Arc<ScrapeOrchestrator>,
    dispatcher: Arc<MenuDispatcher>,
    preferences: Arc<dyn PreferenceStore>,
    window_scheduler: WindowSchedulerHandle,
    calendar: CivilCalendar,
    clock: Arc<dyn Clock>,
}

impl NotifierService {
    pub fn new(
        orchestrator: Arc<ScrapeOrchestrator>,
        dispatcher: Arc<MenuDispatcher>,
        preferences: Arc<dyn PreferenceStore>,
        window_scheduler: WindowSchedulerHandle,
        calendar: CivilCalendar,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            orchestrator,
            dispatcher,
            preferences,
            window_scheduler,
            calendar,
            clock,
        }
    }

    /// Run a scrape tick now, outside the cadence
    pub async fn trigger_scrape_now(&self) -> ScrapeOutcome {
        self.orchestrator.run_once().await
    }

    /// Let the window-open scheduler react to a changed window start
    pub async fn notify_preferences_changed(
        &self,
        user_id: UserId,
        window_start_minute: u16,
    ) -> Result<(), NotifierError> {
        self.window_scheduler
            .preferences_changed(user_id, window_start_minute)
            .await?;
        Ok(())
    }

    /// Send today's menu to one user, ignoring their window
    pub async fn dispatch_current_menu_to(
        &self,
        user_id: UserId,
    ) -> Result<DispatchReport, NotifierError> {
        Ok(self.dispatcher.dispatch_to(user_id).await?)
    }

    /// Preferences of `user_id`, created with defaults on first access
    pub async fn get_preferences(
        &self,
        user_id: UserId,
    ) -> Result<NotificationPreference, NotifierError> {
        if let Some(preference) = self.preferences.get_preference(user_id).await? {
            return Ok(preference);
        }

        let preference = NotificationPreference::default_for(user_id);
        self.preferences.upsert_preference(&preference).await?;
        info!(user_id, "Created default notification preferences");
        self.reschedule_after_save(&preference).await;
        Ok(preference)
    }

    /// Validate and store preferences, then tell the window-open scheduler.
    ///
    /// Succeeds once the row is stored; an unreachable scheduler is only logged.
    #[instrument(skip(self, preference), fields(user_id = preference.user_id))]
    pub async fn update_preferences(
        &self,
        preference: &NotificationPreference,
    ) -> Result<(), NotifierError> {
        preference.validate()?;
        self.preferences.upsert_preference(preference).await?;
        self.reschedule_after_save(preference).await;
        Ok(())
    }

    /// Set the listening window from `HH:MM` times, keeping the other settings
    pub async fn set_listening_window(
        &self,
        user_id: UserId,
        start: &str,
        end: &str,
    ) -> Result<NotificationPreference, NotifierError> {
        let window_start_minute = parse_minute(start)?;
        let window_end_minute = parse_minute(end)?;

        let mut preference = self.get_preferences(user_id).await?;
        preference.window_start_minute = window_start_minute;
        preference.window_end_minute = window_end_minute;
        self.update_preferences(&preference).await?;
        Ok(preference)
    }

    async fn reschedule_after_save(&self, preference: &NotificationPreference) {
        if let Err(e) = self
            .notify_preferences_changed(preference.user_id, preference.window_start_minute)
            .await
        {
            warn!(
                user_id = preference.user_id,
                error = %e,
                "Preferences saved but the window-open scheduler was not told"
            );
        }
    }

    /// Mute the user's automatic messages for the rest of today
    pub async fn mark_intends_to_report(&self, user_id: UserId) -> Result<(), NotifierError> {
        self.get_preferences(user_id).await?;
        let today = self.calendar.civil_date(self.clock.now());
        self.preferences.suppress_until(user_id, today).await?;
        info!(user_id, %today, "Notifications suppressed for today");
        Ok(())
    }

    pub async fn delete_preferences(&self, user_id: UserId) -> Result<(), NotifierError> {
        self.preferences.delete_preference(user_id).await?;
        info!(user_id, "Notification preferences deleted");
        Ok(())
    }

    pub async fn scheduler_status(&self) -> Result<WindowSchedulerStatus, NotifierError> {
        Ok(self.window_scheduler.status().await?)
    }
}
