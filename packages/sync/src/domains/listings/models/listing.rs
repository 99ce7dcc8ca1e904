use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};

use super::{Category, Media};

/// A property listing as delivered by the feed and stored per category.
///
/// Field names follow the RESO data dictionary on the wire (PascalCase) and
/// snake_case in the database.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "PascalCase")]
pub struct Listing {
    pub listing_key: String,
    #[serde(default)]
    pub list_price: Option<f64>,

    // Address
    #[serde(default)]
    pub street_number: Option<String>,
    #[serde(default)]
    pub street_name: Option<String>,
    #[serde(default)]
    pub street_suffix: Option<String>,
    #[serde(default)]
    pub unit_number: Option<String>,
    #[serde(default)]
    pub city_region: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub county_or_parish: Option<String>,
    #[serde(default)]
    pub state_or_province: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,

    // Structure
    #[serde(default)]
    pub bedrooms_total: Option<i32>,
    #[serde(default)]
    pub bathrooms_total_integer: Option<i32>,
    #[serde(default)]
    pub parking_spaces: Option<i32>,
    #[serde(default)]
    pub rooms_above_grade: Option<i32>,
    #[serde(default)]
    pub rooms_below_grade: Option<i32>,

    // Lifecycle
    #[serde(default)]
    pub original_entry_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modification_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub standard_status: Option<String>,
    #[serde(default)]
    pub transaction_type: Option<String>,
    #[serde(default)]
    pub property_type: Option<String>,
    #[serde(default)]
    pub property_sub_type: Option<String>,
    #[serde(default)]
    pub public_remarks: Option<String>,

    // Features
    #[serde(default)]
    pub architectural_style: Option<Vec<String>>,
    #[serde(default)]
    pub basement: Option<Vec<String>>,
    #[serde(default)]
    pub roof: Option<Vec<String>>,
    #[serde(default)]
    pub construction_materials: Option<Vec<String>>,
    #[serde(default)]
    pub foundation_details: Option<Vec<String>>,
    #[serde(default)]
    pub sewer: Option<Vec<String>>,
    #[serde(default)]
    pub cooling: Option<Vec<String>>,
    #[serde(default)]
    pub water_source: Option<Vec<String>>,
    #[serde(default)]
    pub fireplace_features: Option<Vec<String>>,
    #[serde(default)]
    pub community_features: Option<Vec<String>>,
    #[serde(default)]
    pub lot_features: Option<Vec<String>>,
    #[serde(default)]
    pub pool_features: Option<Vec<String>>,
    #[serde(default)]
    pub security_features: Option<Vec<String>>,
    #[serde(default)]
    pub waterfront_features: Option<Vec<String>>,

    // Lot and systems
    #[serde(default)]
    pub lot_depth: Option<f64>,
    #[serde(default)]
    pub lot_width: Option<f64>,
    #[serde(default)]
    pub lot_size_units: Option<String>,
    #[serde(default)]
    pub tax_annual_amount: Option<f64>,
    #[serde(default)]
    pub cross_street: Option<String>,
    #[serde(default)]
    pub zoning_designation: Option<String>,
    #[serde(default)]
    pub heat_type: Option<String>,
    #[serde(default)]
    pub heat_source: Option<String>,
    #[serde(rename = "FireplaceYN", default)]
    pub has_fireplace: Option<bool>,

    // Brokerage
    #[serde(default)]
    pub list_office_name: Option<String>,
    #[serde(default)]
    pub list_office_key: Option<String>,
    #[serde(rename = "VirtualTourURLUnbranded", default)]
    pub virtual_tour_url_unbranded: Option<String>,
    #[serde(rename = "VirtualTourURLBranded", default)]
    pub virtual_tour_url_branded: Option<String>,

    // Filled in by coordinate enrichment
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,

    /// `None` until media enrichment succeeded for this listing in the current
    /// run. Stored media is only replaced when this is `Some`.
    #[serde(skip)]
    #[sqlx(skip)]
    pub media: Option<Vec<Media>>,
}

impl Listing {
    /// Minimal listing, used by fixtures and fakes.
    pub fn new(listing_key: impl Into<String>) -> Self {
        Self {
            listing_key: listing_key.into(),
            ..Default::default()
        }
    }

    pub fn has_coordinates(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some()
    }

    pub async fn find_by_key(
        category: Category,
        listing_key: &str,
        pool: &PgPool,
    ) -> Result<Option<Self>> {
        let sql = format!(
            "SELECT * FROM {} WHERE listing_key = $1",
            category.listing_table()
        );
        let listing = sqlx::query_as::<_, Self>(&sql)
            .bind(listing_key)
            .fetch_optional(pool)
            .await?;
        Ok(listing)
    }

    /// Every stored key of the category.
    pub async fn find_keys(category: Category, pool: &PgPool) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT listing_key FROM {} ORDER BY listing_key",
            category.listing_table()
        );
        let rows = sqlx::query_as::<_, (String,)>(&sql).fetch_all(pool).await?;
        Ok(rows.into_iter().map(|(key,)| key).collect())
    }

    pub async fn delete_by_keys(
        category: Category,
        listing_keys: &[String],
        conn: &mut PgConnection,
    ) -> Result<u64> {
        if listing_keys.is_empty() {
            return Ok(0);
        }

        let sql = format!(
            "DELETE FROM {} WHERE listing_key = ANY($1)",
            category.listing_table()
        );
        let result = sqlx::query(&sql)
            .bind(listing_keys)
            .execute(conn)
            .await?;
        Ok(result.rows_affected())
    }

    /// Insert, or overwrite every column of the row with the same key.
    pub async fn upsert(&self, category: Category, conn: &mut PgConnection) -> Result<()> {
        let sql = upsert_sql(category);

        sqlx::query(&sql)
            .bind(&self.listing_key)
            .bind(self.list_price)
            .bind(&self.street_number)
            .bind(&self.street_name)
            .bind(&self.street_suffix)
            .bind(&self.unit_number)
            .bind(&self.city_region)
            .bind(&self.city)
            .bind(&self.county_or_parish)
            .bind(&self.state_or_province)
            .bind(&self.postal_code)
            .bind(self.bedrooms_total)
            .bind(self.bathrooms_total_integer)
            .bind(self.parking_spaces)
            .bind(self.rooms_above_grade)
            .bind(self.rooms_below_grade)
            .bind(self.original_entry_timestamp)
            .bind(self.modification_timestamp)
            .bind(&self.standard_status)
            .bind(&self.transaction_type)
            .bind(&self.property_type)
            .bind(&self.property_sub_type)
            .bind(&self.public_remarks)
            .bind(&self.architectural_style)
            .bind(&self.basement)
            .bind(&self.roof)
            .bind(&self.construction_materials)
            .bind(&self.foundation_details)
            .bind(&self.sewer)
            .bind(&self.cooling)
            .bind(&self.water_source)
            .bind(&self.fireplace_features)
            .bind(&self.community_features)
            .bind(&self.lot_features)
            .bind(&self.pool_features)
            .bind(&self.security_features)
            .bind(&self.waterfront_features)
            .bind(self.lot_depth)
            .bind(self.lot_width)
            .bind(&self.lot_size_units)
            .bind(self.tax_annual_amount)
            .bind(&self.cross_street)
            .bind(&self.zoning_designation)
            .bind(&self.heat_type)
            .bind(&self.heat_source)
            .bind(self.has_fireplace)
            .bind(&self.list_office_name)
            .bind(&self.list_office_key)
            .bind(&self.virtual_tour_url_unbranded)
            .bind(&self.virtual_tour_url_branded)
            .bind(self.latitude)
            .bind(self.longitude)
            .execute(conn)
            .await?;
        Ok(())
    }
}

/// Column order matches the binds in [`Listing::upsert`].
const LISTING_COLUMNS: &[&str] = &[
    "listing_key",
    "list_price",
    "street_number",
    "street_name",
    "street_suffix",
    "unit_number",
    "city_region",
    "city",
    "county_or_parish",
    "state_or_province",
    "postal_code",
    "bedrooms_total",
    "bathrooms_total_integer",
    "parking_spaces",
    "rooms_above_grade",
    "rooms_below_grade",
    "original_entry_timestamp",
    "modification_timestamp",
    "standard_status",
    "transaction_type",
    "property_type",
    "property_sub_type",
    "public_remarks",
    "architectural_style",
    "basement",
    "roof",
    "construction_materials",
    "foundation_details",
    "sewer",
    "cooling",
    "water_source",
    "fireplace_features",
    "community_features",
    "lot_features",
    "pool_features",
    "security_features",
    "waterfront_features",
    "lot_depth",
    "lot_width",
    "lot_size_units",
    "tax_annual_amount",
    "cross_street",
    "zoning_designation",
    "heat_type",
    "heat_source",
    "has_fireplace",
    "list_office_name",
    "list_office_key",
    "virtual_tour_url_unbranded",
    "virtual_tour_url_branded",
    "latitude",
    "longitude",
];

fn upsert_sql(category: Category) -> String {
    let placeholders: Vec<String> = (1..=LISTING_COLUMNS.len())
        .map(|i| format!("${}", i))
        .collect();
    let updates: Vec<String> = LISTING_COLUMNS
        .iter()
        .skip(1)
        .map(|col| format!("{col} = EXCLUDED.{col}"))
        .collect();

    format!(
        "INSERT INTO {table} ({columns}) VALUES ({values}) \
         ON CONFLICT (listing_key) DO UPDATE SET {updates}, updated_at = NOW()",
        table = category.listing_table(),
        columns = LISTING_COLUMNS.join(", "),
        values = placeholders.join(", "),
        updates = updates.join(", "),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_feed_record() {
        let body = r#"{
            "ListingKey": "X5501234",
            "ListPrice": 749900.0,
            "StreetNumber": "12",
            "StreetName": "Elgin",
            "City": "Ottawa",
            "CountyOrParish": "Ottawa",
            "BedroomsTotal": 3,
            "ModificationTimestamp": "2024-05-02T14:03:11.52Z",
            "StandardStatus": "Active",
            "PropertyType": "Residential Freehold",
            "Basement": ["Finished", "Full"],
            "FireplaceYN": true,
            "VirtualTourURLUnbranded": "https://tour.example.com/x",
            "SomeFieldWeDoNotStore": 42
        }"#;
        let listing: Listing = serde_json::from_str(body).unwrap();

        assert_eq!(listing.listing_key, "X5501234");
        assert_eq!(listing.bedrooms_total, Some(3));
        assert_eq!(listing.has_fireplace, Some(true));
        assert_eq!(
            listing.basement,
            Some(vec!["Finished".to_string(), "Full".to_string()])
        );
        assert_eq!(
            listing.virtual_tour_url_unbranded.as_deref(),
            Some("https://tour.example.com/x")
        );
        assert!(listing.modification_timestamp.is_some());
        assert!(listing.media.is_none());
        assert!(!listing.has_coordinates());
    }

    #[test]
    fn upsert_sql_covers_every_column() {
        let sql = upsert_sql(Category::Commercial);

        assert!(sql.starts_with("INSERT INTO commercial_listings (listing_key, list_price,"));
        assert!(sql.contains(&format!("${}", LISTING_COLUMNS.len())));
        assert!(!sql.contains(&format!("${}", LISTING_COLUMNS.len() + 1)));
        assert!(sql.contains("longitude = EXCLUDED.longitude"));
        assert!(!sql.contains("listing_key = EXCLUDED.listing_key"));
    }
}
