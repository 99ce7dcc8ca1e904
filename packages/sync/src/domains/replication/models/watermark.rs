use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

/// Delta cursor of one data source: everything modified at or before
/// `last_replicated_at` has been synchronized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Watermark {
    pub source: String,
    pub last_replicated_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl Watermark {
    pub async fn find(source: &str, pool: &PgPool) -> Result<Option<Self>> {
        let watermark = sqlx::query_as::<_, Self>(
            "SELECT source, last_replicated_at, completed_at
             FROM replication_watermarks
             WHERE source = $1",
        )
        .bind(source)
        .fetch_optional(pool)
        .await?;
        Ok(watermark)
    }

    /// Record a completed run. The stored cursor never moves backwards: a
    /// value older than the current one only refreshes `completed_at`.
    pub async fn advance(source: &str, to: DateTime<Utc>, pool: &PgPool) -> Result<Self> {
        let watermark = sqlx::query_as::<_, Self>(
            "INSERT INTO replication_watermarks (source, last_replicated_at, completed_at)
             VALUES ($1, $2, NOW())
             ON CONFLICT (source) DO UPDATE SET
                 last_replicated_at = GREATEST(replication_watermarks.last_replicated_at, EXCLUDED.last_replicated_at),
                 completed_at = NOW()
             RETURNING source, last_replicated_at, completed_at",
        )
        .bind(source)
        .bind(to)
        .fetch_one(pool)
        .await?;
        Ok(watermark)
    }

    pub async fn find_all(pool: &PgPool) -> Result<Vec<Self>> {
        let watermarks = sqlx::query_as::<_, Self>(
            "SELECT source, last_replicated_at, completed_at
             FROM replication_watermarks
             ORDER BY source",
        )
        .fetch_all(pool)
        .await?;
        Ok(watermarks)
    }
}
