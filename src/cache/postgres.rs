//! Postgres-backed schedule cache
//!
//! One row per fingerprint. Writes are a single upsert, so an entry is
//! either fully replaced or untouched; expiry is evaluated in SQL.

use super::ScheduleCache;
use crate::error::ItineraryError;
use crate::models::ScheduleSlot;
use crate::Result;
use chrono::Utc;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::debug;

pub struct PostgresScheduleCache {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PostgresScheduleCache {
    /// Create a lazily-connecting pool; nothing touches the network yet.
    pub fn connect_lazy(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(3))
            .connect_lazy(database_url)
            .map_err(|e| {
                ItineraryError::DatabaseError(format!("Invalid database URL: {}", e))
            })?;

        Ok(Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        })
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS schedule_frames (
                      fingerprint TEXT PRIMARY KEY,
                      slots TEXT NOT NULL,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                      expires_at TIMESTAMPTZ NOT NULL
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_schedule_frames_expires_at
                    ON schedule_frames (expires_at);
                    "#,
                )
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                ItineraryError::DatabaseError(format!(
                    "Failed to initialize schedule cache schema: {}",
                    e
                ))
            })?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl ScheduleCache for PostgresScheduleCache {

    async fn get(&self, fingerprint: &str) -> Result<Option<Vec<ScheduleSlot>>> {
        self.ensure_schema().await?;

        let row = sqlx::query(
            "SELECT slots FROM schedule_frames WHERE fingerprint = $1 AND expires_at > NOW()",
        )
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            ItineraryError::DatabaseError(format!("Failed to load schedule frame: {}", e))
        })?;

        let Some(row) = row else {
            return Ok(None);
        };

        let raw: String = row.try_get("slots").map_err(|e| {
            ItineraryError::DatabaseError(format!("Corrupt schedule frame row: {}", e))
        })?;

        match serde_json::from_str::<Vec<ScheduleSlot>>(&raw) {
            Ok(slots) => Ok(Some(slots)),
            Err(e) => {
                // Unreadable rows from an older layout behave as a miss
                debug!(fingerprint, error = %e, "Discarding undecodable schedule frame");
                Ok(None)
            }
        }
    }

    async fn put(&self, fingerprint: &str, slots: &[ScheduleSlot], ttl: Duration) -> Result<()> {
        self.ensure_schema().await?;

        let payload = serde_json::to_string(slots)?;
        let created_at = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500));
        let expires_at = created_at.checked_add_signed(ttl).unwrap_or(created_at);

        sqlx::query(
            r#"
            INSERT INTO schedule_frames (fingerprint, slots, created_at, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (fingerprint) DO UPDATE
              SET slots = EXCLUDED.slots,
                  created_at = EXCLUDED.created_at,
                  expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(fingerprint)
        .bind(payload)
        .bind(created_at)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            ItineraryError::DatabaseError(format!("Failed to store schedule frame: {}", e))
        })?;

        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize> {
        self.ensure_schema().await?;

        let result = sqlx::query("DELETE FROM schedule_frames WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                ItineraryError::DatabaseError(format!("Failed to purge schedule frames: {}", e))
            })?;

        Ok(result.rows_affected() as usize)
    }
}
