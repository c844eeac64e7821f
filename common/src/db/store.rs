// Storage interfaces consumed by the notification pipeline

use crate::errors::DatabaseError;
use crate::models::{MenuEntry, NotificationPreference, UserId};
use async_trait::async_trait;
use chrono::NaiveDate;

/// Append-only log of versioned menu snapshots
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MenuSnapshotStore: Send + Sync {
    /// All entries of the highest version recorded for `date`
    async fn latest_version_entries(&self, date: NaiveDate)
        -> Result<Vec<MenuEntry>, DatabaseError>;

    /// Highest version across all dates, `None` when nothing was stored yet
    async fn max_version(&self) -> Result<Option<i64>, DatabaseError>;

    /// Store `entries` under `version`; the entries' own version fields are ignored
    async fn insert_entries(&self, version: i64, entries: &[MenuEntry])
        -> Result<(), DatabaseError>;
}

/// Per-user notification preferences.
///
/// Every "eligible" query filters on `wants_notifications`, the weekday mask
/// and `suppress_until != today`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// Eligible users whose window contains `now_minute`
    async fn users_in_window(
        &self,
        now_minute: u16,
        weekday_bit: u8,
        today: NaiveDate,
    ) -> Result<Vec<UserId>, DatabaseError>;

    /// Eligible users whose window starts in `(after_minute, up_to_minute]`
    async fn users_with_window_start_between(
        &self,
        after_minute: u16,
        up_to_minute: u16,
        weekday_bit: u8,
        today: NaiveDate,
    ) -> Result<Vec<UserId>, DatabaseError>;

    /// Smallest eligible window start strictly after `after_minute`
    async fn next_window_start(
        &self,
        after_minute: u16,
        weekday_bit: u8,
        today: NaiveDate,
    ) -> Result<Option<u16>, DatabaseError>;

    /// Smallest window start among users who want notifications, any weekday
    async fn global_min_window_start(&self) -> Result<Option<u16>, DatabaseError>;

    async fn get_preference(
        &self,
        user_id: UserId,
    ) -> Result<Option<NotificationPreference>, DatabaseError>;

    /// Insert or replace the window, weekday and opt-in settings of a user.
    /// An existing suppression date is kept.
    async fn upsert_preference(&self, preference: &NotificationPreference)
        -> Result<(), DatabaseError>;

    async fn suppress_until(&self, user_id: UserId, date: NaiveDate)
        -> Result<(), DatabaseError>;

    async fn delete_preference(&self, user_id: UserId) -> Result<(), DatabaseError>;
}
