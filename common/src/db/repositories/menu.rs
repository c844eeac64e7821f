// Menu snapshot repository

use super::queries::menu_queries;
use crate::db::store::MenuSnapshotStore;
use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::MenuEntry;
use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::instrument;

/// PostgreSQL-backed append-only menu log
pub struct PgMenuSnapshotStore {
    pool: DbPool,
}

impl PgMenuSnapshotStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MenuSnapshotStore for PgMenuSnapshotStore {
    #[instrument(skip(self))]
    async fn latest_version_entries(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<MenuEntry>, DatabaseError> {
        let query = format!(
            r#"
            SELECT {}
            FROM menu_entries
            WHERE date_key = $1
              AND version = (SELECT MAX(version) FROM menu_entries WHERE date_key = $1)
            ORDER BY id
            "#,
            menu_queries::SELECT_ALL_COLUMNS
        );

        let entries = sqlx::query_as::<_, MenuEntry>(&query)
            .bind(date)
            .fetch_all(self.pool.pool())
            .await?;

        tracing::debug!(count = entries.len(), "Found latest menu entries");
        Ok(entries)
    }

    #[instrument(skip(self))]
    async fn max_version(&self) -> Result<Option<i64>, DatabaseError> {
        let version: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM menu_entries")
            .fetch_one(self.pool.pool())
            .await?;
        Ok(version)
    }

    #[instrument(skip(self, entries), fields(count = entries.len()))]
    async fn insert_entries(
        &self,
        version: i64,
        entries: &[MenuEntry],
    ) -> Result<(), DatabaseError> {
        let mut tx = self
            .pool
            .pool()
            .begin()
            .await
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO menu_entries (version, title, description, scraped_at, date_key)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(version)
            .bind(&entry.title)
            .bind(&entry.description)
            .bind(entry.scraped_at)
            .bind(entry.date_key)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit()
            .await
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        tracing::info!(version, count = entries.len(), "Menu snapshot stored");
        Ok(())
    }
}
