// Notification preference repository

use super::queries::preference_queries;
use crate::db::store::PreferenceStore;
use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::{NotificationPreference, UserId};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::PgRow;
use sqlx::Row;
use tracing::instrument;

/// PostgreSQL-backed preference table
pub struct PgPreferenceStore {
    pool: DbPool,
}

impl PgPreferenceStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn preference_from_row(row: &PgRow) -> Result<NotificationPreference, DatabaseError> {
        let start: i32 = row.try_get("window_start_minute")?;
        let end: i32 = row.try_get("window_end_minute")?;
        let mask: i32 = row.try_get("weekday_mask")?;

        Ok(NotificationPreference {
            user_id: row.try_get("user_id")?,
            wants_notifications: row.try_get("wants_notifications")?,
            window_start_minute: to_minute(start)?,
            window_end_minute: to_minute(end)?,
            weekday_mask: u8::try_from(mask).map_err(|_| {
                DatabaseError::QueryFailed(format!("weekday_mask out of range: {}", mask))
            })?,
            suppress_until: row.try_get("suppress_until")?,
        })
    }
}

fn to_minute(value: i32) -> Result<u16, DatabaseError> {
    u16::try_from(value)
        .map_err(|_| DatabaseError::QueryFailed(format!("minute of day out of range: {}", value)))
}

#[async_trait]
impl PreferenceStore for PgPreferenceStore {
    #[instrument(skip(self))]
    async fn users_in_window(
        &self,
        now_minute: u16,
        weekday_bit: u8,
        today: NaiveDate,
    ) -> Result<Vec<UserId>, DatabaseError> {
        let query = format!(
            r#"
            SELECT user_id FROM notification_preferences
            WHERE {}
              AND $3 BETWEEN window_start_minute AND window_end_minute
            ORDER BY user_id
            "#,
            preference_queries::ELIGIBLE_FILTER
        );

        let users: Vec<UserId> = sqlx::query_scalar(&query)
            .bind(i32::from(weekday_bit))
            .bind(today)
            .bind(i32::from(now_minute))
            .fetch_all(self.pool.pool())
            .await?;

        tracing::debug!(count = users.len(), "Found users in notification window");
        Ok(users)
    }

    #[instrument(skip(self))]
    async fn users_with_window_start_between(
        &self,
        after_minute: u16,
        up_to_minute: u16,
        weekday_bit: u8,
        today: NaiveDate,
    ) -> Result<Vec<UserId>, DatabaseError> {
        let query = format!(
            r#"
            SELECT user_id FROM notification_preferences
            WHERE {}
              AND window_start_minute > $3
              AND window_start_minute <= $4
            ORDER BY user_id
            "#,
            preference_queries::ELIGIBLE_FILTER
        );

        let users: Vec<UserId> = sqlx::query_scalar(&query)
            .bind(i32::from(weekday_bit))
            .bind(today)
            .bind(i32::from(after_minute))
            .bind(i32::from(up_to_minute))
            .fetch_all(self.pool.pool())
            .await?;

        if users.is_empty() {
            tracing::info!(
                after_minute,
                up_to_minute,
                weekday_bit,
                %today,
                "No users with a window opening in this range"
            );
        }
        Ok(users)
    }

    #[instrument(skip(self))]
    async fn next_window_start(
        &self,
        after_minute: u16,
        weekday_bit: u8,
        today: NaiveDate,
    ) -> Result<Option<u16>, DatabaseError> {
        let query = format!(
            r#"
            SELECT MIN(window_start_minute) FROM notification_preferences
            WHERE {}
              AND window_start_minute > $3
            "#,
            preference_queries::ELIGIBLE_FILTER
        );

        let next: Option<i32> = sqlx::query_scalar(&query)
            .bind(i32::from(weekday_bit))
            .bind(today)
            .bind(i32::from(after_minute))
            .fetch_one(self.pool.pool())
            .await?;

        next.map(to_minute).transpose()
    }

    #[instrument(skip(self))]
    async fn global_min_window_start(&self) -> Result<Option<u16>, DatabaseError> {
        let first: Option<i32> = sqlx::query_scalar(
            "SELECT MIN(window_start_minute) FROM notification_preferences WHERE wants_notifications",
        )
        .fetch_one(self.pool.pool())
        .await?;

        first.map(to_minute).transpose()
    }

    #[instrument(skip(self))]
    async fn get_preference(
        &self,
        user_id: UserId,
    ) -> Result<Option<NotificationPreference>, DatabaseError> {
        let query = format!(
            "SELECT {} FROM notification_preferences WHERE user_id = $1",
            preference_queries::SELECT_ALL_COLUMNS
        );

        let row = sqlx::query(&query)
            .bind(user_id)
            .fetch_optional(self.pool.pool())
            .await?;

        row.as_ref().map(Self::preference_from_row).transpose()
    }

    #[instrument(skip(self, preference), fields(user_id = preference.user_id))]
    async fn upsert_preference(
        &self,
        preference: &NotificationPreference,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO notification_preferences (
                user_id, wants_notifications, window_start_minute,
                window_end_minute, weekday_mask
            )
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id) DO UPDATE SET
                wants_notifications = EXCLUDED.wants_notifications,
                window_start_minute = EXCLUDED.window_start_minute,
                window_end_minute = EXCLUDED.window_end_minute,
                weekday_mask = EXCLUDED.weekday_mask
            "#,
        )
        .bind(preference.user_id)
        .bind(preference.wants_notifications)
        .bind(i32::from(preference.window_start_minute))
        .bind(i32::from(preference.window_end_minute))
        .bind(i32::from(preference.weekday_mask))
        .execute(self.pool.pool())
        .await?;

        tracing::info!(user_id = preference.user_id, "Notification preferences saved");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn suppress_until(&self, user_id: UserId, date: NaiveDate) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            "UPDATE notification_preferences SET suppress_until = $1 WHERE user_id = $2",
        )
        .bind(date)
        .bind(user_id)
        .execute(self.pool.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!(
                "Notification preferences for user {}",
                user_id
            )));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_preference(&self, user_id: UserId) -> Result<(), DatabaseError> {
        sqlx::query("DELETE FROM notification_preferences WHERE user_id = $1")
            .bind(user_id)
            .execute(self.pool.pool())
            .await?;

        tracing::info!(user_id, "Notification preferences deleted");
        Ok(())
    }
}
