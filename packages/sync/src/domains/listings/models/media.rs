use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::{PgConnection, PgPool};

use super::Category;

/// A photo or document attached to a listing.
///
/// Media rows are never edited in place: every sync of the owning listing
/// deletes its rows and inserts the freshly fetched set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Media {
    #[serde(rename = "MediaKey")]
    pub media_key: String,
    #[serde(rename = "ResourceRecordKey", default, deserialize_with = "null_as_default")]
    pub listing_key: String,
    #[serde(rename = "MediaURL", default)]
    pub media_url: Option<String>,
    #[serde(rename = "MediaCategory", default)]
    pub media_category: Option<String>,
    #[serde(rename = "MediaType", default)]
    pub media_type: Option<String>,
    #[serde(rename = "Order", default, deserialize_with = "null_as_default")]
    pub display_order: i32,
    #[serde(rename = "MediaModificationTimestamp", default)]
    pub media_modification_timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "PreferredPhotoYN", default)]
    pub preferred_photo: Option<bool>,
    #[serde(rename = "ImageSizeDescription", default)]
    pub image_size_description: Option<String>,
}

/// The feed sends explicit nulls for unset fields; read them as the default.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl Media {
    /// A media row must point at the listing it was fetched for.
    pub fn belongs_to(&self, listing_key: &str) -> bool {
        !self.media_key.is_empty() && !self.listing_key.is_empty() && self.listing_key == listing_key
    }

    pub async fn find_for_listing(
        category: Category,
        listing_key: &str,
        pool: &PgPool,
    ) -> Result<Vec<Self>> {
        let sql = format!(
            "SELECT * FROM {} WHERE listing_key = $1 ORDER BY display_order ASC, media_key ASC",
            category.media_table()
        );
        let media = sqlx::query_as::<_, Self>(&sql)
            .bind(listing_key)
            .fetch_all(pool)
            .await?;
        Ok(media)
    }

    pub async fn count(category: Category, pool: &PgPool) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", category.media_table());
        let (count,) = sqlx::query_as::<_, (i64,)>(&sql).fetch_one(pool).await?;
        Ok(count)
    }

    /// Remove every media row owned by the given listings.
    pub async fn delete_for_listings(
        category: Category,
        listing_keys: &[String],
        conn: &mut PgConnection,
    ) -> Result<u64> {
        if listing_keys.is_empty() {
            return Ok(0);
        }

        let sql = format!(
            "DELETE FROM {} WHERE listing_key = ANY($1)",
            category.media_table()
        );
        let result = sqlx::query(&sql)
            .bind(listing_keys)
            .execute(conn)
            .await?;
        Ok(result.rows_affected())
    }

    /// Insert, or overwrite every column of an existing row with the same key.
    pub async fn upsert(&self, category: Category, conn: &mut PgConnection) -> Result<()> {
        let sql = format!(
            r#"
            INSERT INTO {} (
                media_key, listing_key, media_url, media_category, media_type,
                display_order, media_modification_timestamp, preferred_photo,
                image_size_description
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (media_key) DO UPDATE SET
                listing_key = EXCLUDED.listing_key,
                media_url = EXCLUDED.media_url,
                media_category = EXCLUDED.media_category,
                media_type = EXCLUDED.media_type,
                display_order = EXCLUDED.display_order,
                media_modification_timestamp = EXCLUDED.media_modification_timestamp,
                preferred_photo = EXCLUDED.preferred_photo,
                image_size_description = EXCLUDED.image_size_description,
                updated_at = NOW()
            "#,
            category.media_table()
        );

        sqlx::query(&sql)
            .bind(&self.media_key)
            .bind(&self.listing_key)
            .bind(&self.media_url)
            .bind(&self.media_category)
            .bind(&self.media_type)
            .bind(self.display_order)
            .bind(self.media_modification_timestamp)
            .bind(self.preferred_photo)
            .bind(&self.image_size_description)
            .execute(conn)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_feed_media() {
        let body = r#"{
            "MediaKey": "M-1",
            "ResourceRecordKey": "X100",
            "MediaURL": "https://cdn.example.com/x100/1.jpg",
            "MediaCategory": "Photo",
            "Order": 3,
            "ImageSizeDescription": "Medium",
            "PreferredPhotoYN": true
        }"#;
        let media: Media = serde_json::from_str(body).unwrap();

        assert_eq!(media.listing_key, "X100");
        assert_eq!(media.display_order, 3);
        assert_eq!(media.preferred_photo, Some(true));
        assert!(media.belongs_to("X100"));
        assert!(!media.belongs_to("X200"));
    }

    #[test]
    fn null_order_reads_as_zero() {
        let media: Media = serde_json::from_str(
            r#"{"MediaKey":"M-1","ResourceRecordKey":"X1","Order":null}"#,
        )
        .unwrap();
        assert_eq!(media.display_order, 0);
        assert!(media.belongs_to("X1"));
    }

    #[test]
    fn null_owner_is_orphaned() {
        let media: Media =
            serde_json::from_str(r#"{"MediaKey":"M-3","ResourceRecordKey":null,"Order":1}"#).unwrap();
        assert_eq!(media.listing_key, "");
        assert!(!media.belongs_to("X1"));
    }

    #[test]
    fn missing_owner_is_orphaned() {
        let media: Media = serde_json::from_str(r#"{"MediaKey":"M-2"}"#).unwrap();
        assert!(!media.belongs_to(""));
        assert!(!media.belongs_to("X100"));
    }
}
