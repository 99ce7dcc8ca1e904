//! Postgres-backed listing store.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domains::listings::models::{Category, Listing, Media};
use crate::domains::replication::models::Watermark;
use crate::kernel::{BaseListingStore, PersistedBatch};

#[derive(Clone)]
pub struct PgListingStore {
    pool: PgPool,
}

impl PgListingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl BaseListingStore for PgListingStore {
    async fn watermark(&self, source: &str) -> Result<Option<DateTime<Utc>>> {
        let watermark = Watermark::find(source, &self.pool).await?;
        Ok(watermark.map(|w| w.last_replicated_at))
    }

    async fn advance_watermark(&self, source: &str, to: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let watermark = Watermark::advance(source, to, &self.pool).await?;
        Ok(watermark.last_replicated_at)
    }

    async fn persist_batch(
        &self,
        category: Category,
        listings: &[Listing],
    ) -> Result<PersistedBatch> {
        let mut tx = self.pool.begin().await.context("Failed to open transaction")?;

        // Media is replaced wholesale for every listing carrying a media set;
        // `None` keeps what is stored
        let refreshed: Vec<String> = listings
            .iter()
            .filter(|l| l.media.is_some())
            .map(|l| l.listing_key.clone())
            .collect();
        Media::delete_for_listings(category, &refreshed, &mut *tx).await?;

        let mut written = PersistedBatch::default();
        for listing in listings {
            listing
                .upsert(category, &mut *tx)
                .await
                .with_context(|| format!("Failed to upsert listing {}", listing.listing_key))?;
            written.listings += 1;

            for media in listing.media.iter().flatten() {
                media
                    .upsert(category, &mut *tx)
                    .await
                    .with_context(|| format!("Failed to upsert media {}", media.media_key))?;
                written.media += 1;
            }
        }

        tx.commit().await.context("Failed to commit batch")?;
        Ok(written)
    }

    async fn listing_keys(&self, category: Category) -> Result<Vec<String>> {
        Listing::find_keys(category, &self.pool).await
    }

    async fn delete_listings(&self, category: Category, listing_keys: &[String]) -> Result<u64> {
        if listing_keys.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.context("Failed to open transaction")?;
        let media = Media::delete_for_listings(category, listing_keys, &mut *tx).await?;
        let deleted = Listing::delete_by_keys(category, listing_keys, &mut *tx).await?;
        tx.commit().await.context("Failed to commit delete")?;

        tracing::debug!(
            category = %category,
            listings = deleted,
            media,
            "Deleted stale listings"
        );
        Ok(deleted)
    }
}
