// In-process store used when no database URL is configured, and by tests

use crate::civil::interval_contains;
use crate::db::store::{MenuSnapshotStore, PreferenceStore};
use crate::errors::DatabaseError;
use crate::models::{MenuEntry, NotificationPreference, UserId};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

#[derive(Debug, Default)]
struct Tables {
    menu_entries: Vec<MenuEntry>,
    preferences: BTreeMap<UserId, NotificationPreference>,
}

/// Menu and preference tables behind a single lock
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn eligible<'a>(
        tables: &'a Tables,
        weekday_bit: u8,
        today: NaiveDate,
    ) -> impl Iterator<Item = &'a NotificationPreference> {
        tables
            .preferences
            .values()
            .filter(move |pref| pref.is_eligible_on(weekday_bit, today))
    }
}

#[async_trait]
impl MenuSnapshotStore for MemoryStore {
    async fn latest_version_entries(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<MenuEntry>, DatabaseError> {
        let tables = self.tables.lock().await;
        let latest = tables
            .menu_entries
            .iter()
            .filter(|entry| entry.date_key == date)
            .map(|entry| entry.version)
            .max();

        Ok(match latest {
            Some(version) => tables
                .menu_entries
                .iter()
                .filter(|entry| entry.date_key == date && entry.version == version)
                .cloned()
                .collect(),
            None => Vec::new(),
        })
    }

    async fn max_version(&self) -> Result<Option<i64>, DatabaseError> {
        let tables = self.tables.lock().await;
        Ok(tables.menu_entries.iter().map(|entry| entry.version).max())
    }

    #[instrument(skip(self, entries), fields(count = entries.len()))]
    async fn insert_entries(
        &self,
        version: i64,
        entries: &[MenuEntry],
    ) -> Result<(), DatabaseError> {
        let mut tables = self.tables.lock().await;
        tables
            .menu_entries
            .extend(entries.iter().cloned().map(|entry| MenuEntry { version, ..entry }));
        debug!(version, "Menu entries stored in memory");
        Ok(())
    }
}

#[async_trait]
impl PreferenceStore for MemoryStore {
    async fn users_in_window(
        &self,
        now_minute: u16,
        weekday_bit: u8,
        today: NaiveDate,
    ) -> Result<Vec<UserId>, DatabaseError> {
        let tables = self.tables.lock().await;
        Ok(Self::eligible(&tables, weekday_bit, today)
            .filter(|pref| {
                interval_contains(pref.window_start_minute, pref.window_end_minute, now_minute)
            })
            .map(|pref| pref.user_id)
            .collect())
    }

    async fn users_with_window_start_between(
        &self,
        after_minute: u16,
        up_to_minute: u16,
        weekday_bit: u8,
        today: NaiveDate,
    ) -> Result<Vec<UserId>, DatabaseError> {
        let tables = self.tables.lock().await;
        Ok(Self::eligible(&tables, weekday_bit, today)
            .filter(|pref| {
                pref.window_start_minute > after_minute && pref.window_start_minute <= up_to_minute
            })
            .map(|pref| pref.user_id)
            .collect())
    }

    async fn next_window_start(
        &self,
        after_minute: u16,
        weekday_bit: u8,
        today: NaiveDate,
    ) -> Result<Option<u16>, DatabaseError> {
        let tables = self.tables.lock().await;
        Ok(Self::eligible(&tables, weekday_bit, today)
            .map(|pref| pref.window_start_minute)
            .filter(|start| *start > after_minute)
            .min())
    }

    async fn global_min_window_start(&self) -> Result<Option<u16>, DatabaseError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .preferences
            .values()
            .filter(|pref| pref.wants_notifications)
            .map(|pref| pref.window_start_minute)
            .min())
    }

    async fn get_preference(
        &self,
        user_id: UserId,
    ) -> Result<Option<NotificationPreference>, DatabaseError> {
        let tables = self.tables.lock().await;
        Ok(tables.preferences.get(&user_id).cloned())
    }

    async fn upsert_preference(
        &self,
        preference: &NotificationPreference,
    ) -> Result<(), DatabaseError> {
        let mut tables = self.tables.lock().await;
        let suppress_until = tables
            .preferences
            .get(&preference.user_id)
            .and_then(|existing| existing.suppress_until);
        tables.preferences.insert(
            preference.user_id,
            NotificationPreference {
                suppress_until,
                ..preference.clone()
            },
        );
        Ok(())
    }

    async fn suppress_until(&self, user_id: UserId, date: NaiveDate) -> Result<(), DatabaseError> {
        let mut tables = self.tables.lock().await;
        match tables.preferences.get_mut(&user_id) {
            Some(pref) => {
                pref.suppress_until = Some(date);
                Ok(())
            }
            None => Err(DatabaseError::NotFound(format!(
                "Notification preferences for user {}",
                user_id
            ))),
        }
    }

    async fn delete_preference(&self, user_id: UserId) -> Result<(), DatabaseError> {
        let mut tables = self.tables.lock().await;
        tables.preferences.remove(&user_id);
        Ok(())
    }
}
