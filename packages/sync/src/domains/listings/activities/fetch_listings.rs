use chrono::{DateTime, Utc};
use feed_client::PropertyFilter;
use std::collections::HashSet;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domains::listings::models::{Category, Listing};
use crate::error::{SyncError, SyncResult};
use crate::kernel::SyncDeps;

/// Why pagination stopped before the filter's total was read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Truncation {
    /// A page request failed; pages after it were not attempted.
    PageFailed { skip: u64, error: String },
    /// The total exceeded the configured record ceiling.
    Ceiling { total: u64, ceiling: u64 },
    /// The feed returned an empty page before `expected` rows were read.
    Exhausted { read: u64, expected: u64 },
    Cancelled,
}

#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// Changed listings, deduplicated by key, newest first.
    pub listings: Vec<Listing>,
    /// Count reported by the feed for the filter
    pub total: u64,
    pub pages_fetched: u64,
    pub truncation: Option<Truncation>,
    /// Newest `ModificationTimestamp` among the fetched listings
    pub max_modified: Option<DateTime<Utc>>,
}

impl FetchOutcome {
    /// Every listing the filter matched was read.
    pub fn is_complete(&self) -> bool {
        self.truncation.is_none()
    }
}

/// OData filter selecting the category's active listings changed after the watermark.
pub fn listing_filter(
    category: Category,
    jurisdiction: &str,
    watermark: Option<DateTime<Utc>>,
) -> String {
    PropertyFilter::new(category.property_type_match())
        .status("Active")
        .jurisdiction(jurisdiction)
        .modified_after(watermark)
        .to_odata()
}

/// Read every listing of the category changed since `watermark`, page by page.
///
/// A failing page ends pagination and whatever was read so far is returned.
/// The run only fails when the count query fails, or when the feed reported
/// matches but not a single page could be read.
pub async fn fetch_listings(
    category: Category,
    watermark: Option<DateTime<Utc>>,
    deps: &SyncDeps,
    cancel: &CancellationToken,
) -> SyncResult<FetchOutcome> {
    let settings = &deps.settings;
    let filter = listing_filter(category, &settings.jurisdiction, watermark);

    let total = deps
        .feed
        .count_listings(&filter)
        .await
        .map_err(|e| SyncError::Fetch {
            category,
            message: format!("count query failed: {}", e),
        })?;

    let limit = total.min(settings.max_records);
    let page_size = settings.page_size.max(1);

    info!(
        category = %category,
        total,
        limit,
        page_size,
        since = ?watermark,
        "Fetching changed listings"
    );

    let mut outcome = FetchOutcome {
        total,
        ..Default::default()
    };
    if total > settings.max_records {
        outcome.truncation = Some(Truncation::Ceiling {
            total,
            ceiling: settings.max_records,
        });
    }

    let mut seen: HashSet<String> = HashSet::new();
    // The feed may cap `$top` below `page_size`, so the offset follows the
    // rows actually received.
    let mut skip = 0;
    while skip < limit {
        if skip > 0 && !pause(settings.page_delay, cancel).await {
            outcome.truncation = Some(Truncation::Cancelled);
            break;
        }
        if cancel.is_cancelled() {
            outcome.truncation = Some(Truncation::Cancelled);
            break;
        }

        let top = page_size.min(limit - skip);

        let batch = match deps.feed.fetch_listings_page(&filter, skip, top).await {
            Ok(batch) => batch,
            Err(e) => {
                warn!(
                    category = %category,
                    skip,
                    error = %e,
                    fetched = outcome.listings.len(),
                    "Page fetch failed, keeping partial results"
                );
                outcome.truncation = Some(Truncation::PageFailed {
                    skip,
                    error: e.to_string(),
                });
                break;
            }
        };
        outcome.pages_fetched += 1;

        debug!(
            category = %category,
            skip,
            top,
            received = batch.len(),
            "Fetched listing page"
        );

        if batch.is_empty() {
            warn!(
                category = %category,
                read = skip,
                expected = limit,
                "Feed ran out of rows before the reported total"
            );
            outcome.truncation = Some(Truncation::Exhausted {
                read: skip,
                expected: limit,
            });
            break;
        }

        skip += batch.len() as u64;
        for listing in batch {
            if listing.listing_key.is_empty() || !seen.insert(listing.listing_key.clone()) {
                continue;
            }
            outcome.max_modified = outcome.max_modified.max(listing.modification_timestamp);
            outcome.listings.push(listing);
        }
    }

    if total > 0 && outcome.pages_fetched == 0 {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        let reason = match &outcome.truncation {
            Some(Truncation::PageFailed { error, .. }) => error.clone(),
            _ => "no page could be read".to_string(),
        };
        return Err(SyncError::Fetch {
            category,
            message: reason,
        });
    }

    info!(
        category = %category,
        fetched = outcome.listings.len(),
        pages_fetched = outcome.pages_fetched,
        truncated = outcome.truncation.is_some(),
        "Listing fetch finished"
    );
    Ok(outcome)
}

/// Sleep unless cancelled first. Returns false on cancellation.
async fn pause(delay: Duration, cancel: &CancellationToken) -> bool {
    if delay.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
