use crate::civil::{WEEKDAY_MASK_ALL, MINUTES_PER_DAY};
use crate::errors::ValidationError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Chat identifier of a subscribed user
pub type UserId = i64;

// ============================================================================
// Menu Models
// ============================================================================

/// A dish as published by the upstream feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuItem {
    pub title: String,
    pub description: String,
    pub source_date: NaiveDate,
}

/// One stored dish of a menu snapshot.
///
/// All entries written by the same scrape share a `version`. Entries are
/// append-only: they are never updated or deleted after insertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct MenuEntry {
    pub version: i64,
    pub title: String,
    pub description: String,
    pub scraped_at: DateTime<Utc>,
    pub date_key: NaiveDate,
}

impl MenuEntry {
    pub fn from_item(version: i64, item: &MenuItem, scraped_at: DateTime<Utc>) -> Self {
        Self {
            version,
            title: item.title.clone(),
            description: item.description.clone(),
            scraped_at,
            date_key: item.source_date,
        }
    }
}

// ============================================================================
// Preference Models
// ============================================================================

/// Per-user push notification settings.
///
/// Minutes are civil minutes of day in the operator timezone, never UTC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPreference {
    pub user_id: UserId,
    pub wants_notifications: bool,
    pub window_start_minute: u16,
    pub window_end_minute: u16,
    pub weekday_mask: u8,
    /// Pushes are skipped while this equals the current civil date
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suppress_until: Option<NaiveDate>,
}

impl NotificationPreference {
    pub const DEFAULT_WINDOW_START: u16 = 10 * 60;
    pub const DEFAULT_WINDOW_END: u16 = 14 * 60;

    /// Settings a user gets before changing anything: 10:00 to 14:00, Monday to Friday
    pub fn default_for(user_id: UserId) -> Self {
        Self {
            user_id,
            wants_notifications: true,
            window_start_minute: Self::DEFAULT_WINDOW_START,
            window_end_minute: Self::DEFAULT_WINDOW_END,
            weekday_mask: WEEKDAY_MASK_ALL,
            suppress_until: None,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        for minute in [self.window_start_minute, self.window_end_minute] {
            if minute >= MINUTES_PER_DAY {
                return Err(ValidationError::MinuteOutOfRange(minute));
            }
        }
        if self.window_start_minute > self.window_end_minute {
            return Err(ValidationError::InvertedWindow {
                start: self.window_start_minute,
                end: self.window_end_minute,
            });
        }
        if self.weekday_mask & !WEEKDAY_MASK_ALL != 0 {
            return Err(ValidationError::InvalidWeekdayMask(self.weekday_mask));
        }
        Ok(())
    }

    pub fn is_suppressed_on(&self, date: NaiveDate) -> bool {
        self.suppress_until == Some(date)
    }

    /// Whether automatic pushes may go to this user on `date` with weekday bit `weekday_bit`
    pub fn is_eligible_on(&self, weekday_bit: u8, date: NaiveDate) -> bool {
        self.wants_notifications
            && self.weekday_mask & weekday_bit != 0
            && !self.is_suppressed_on(date)
    }
}
