//! Test fixtures for building listings and media.

use chrono::{DateTime, TimeZone, Utc};
use sync_core::domains::listings::models::{Listing, Media};

/// `2024-03-01T<hour>:00:00Z`
pub fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0)
        .single()
        .expect("valid fixture timestamp")
}

/// A listing with the fields the pipeline cares about filled in.
pub fn test_listing(listing_key: &str, modified_hour: u32) -> Listing {
    let mut listing = Listing::new(listing_key);
    listing.list_price = Some(649_900.0);
    listing.street_number = Some("12".to_string());
    listing.street_name = Some("Elgin".to_string());
    listing.city = Some("Ottawa".to_string());
    listing.county_or_parish = Some("Ottawa".to_string());
    listing.bedrooms_total = Some(3);
    listing.property_type = Some("Residential Freehold".to_string());
    listing.basement = Some(vec!["Finished".to_string(), "Full".to_string()]);
    listing.has_fireplace = Some(true);
    listing.modification_timestamp = Some(at(modified_hour));
    listing
}

pub fn test_media(listing_key: &str, media_key: &str, display_order: i32) -> Media {
    Media {
        media_key: media_key.to_string(),
        listing_key: listing_key.to_string(),
        media_url: Some(format!("https://cdn.example.com/{}.jpg", media_key)),
        media_category: Some("Photo".to_string()),
        media_type: Some("image/jpeg".to_string()),
        display_order,
        media_modification_timestamp: Some(at(1)),
        preferred_photo: Some(display_order == 0),
        image_size_description: Some("Largest".to_string()),
    }
}

/// A listing carrying freshly fetched media.
pub fn with_media(mut listing: Listing, media_keys: &[&str]) -> Listing {
    let key = listing.listing_key.clone();
    listing.media = Some(
        media_keys
            .iter()
            .enumerate()
            .map(|(i, media_key)| test_media(&key, media_key, i as i32))
            .collect(),
    );
    listing
}
