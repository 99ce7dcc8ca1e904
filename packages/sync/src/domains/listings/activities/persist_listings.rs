use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::domains::listings::models::{Category, Listing};
use crate::error::{SyncError, SyncResult};
use crate::kernel::SyncDeps;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct PersistOutcome {
    pub batches_total: usize,
    pub batches_failed: usize,
    pub listings_written: usize,
    pub media_written: usize,
    pub listings_failed: usize,
    /// Oldest `ModificationTimestamp` among listings whose batch failed
    pub oldest_failed: Option<DateTime<Utc>>,
    /// A listing without a modification timestamp failed to persist
    pub failed_undated: bool,
}

impl PersistOutcome {
    pub fn is_degraded(&self) -> bool {
        self.batches_failed > 0
    }
}

/// Write the listings in fixed-size batches, one transaction per batch.
///
/// A failing batch is rolled back alone; batches already committed stay
/// committed. The stage is only an error when every batch failed.
pub async fn persist_listings(
    category: Category,
    listings: &[Listing],
    deps: &SyncDeps,
    cancel: &CancellationToken,
) -> SyncResult<PersistOutcome> {
    let batch_size = deps.settings.persist_batch_size.max(1);
    let mut outcome = PersistOutcome::default();
    let mut last_error = None;

    for (index, batch) in listings.chunks(batch_size).enumerate() {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        outcome.batches_total += 1;

        match deps.store.persist_batch(category, batch).await {
            Ok(written) => {
                outcome.listings_written += written.listings;
                outcome.media_written += written.media;
                debug!(
                    category = %category,
                    batch = index + 1,
                    listings = written.listings,
                    media = written.media,
                    "Persisted batch"
                );
            }
            Err(e) => {
                error!(
                    category = %category,
                    batch = index + 1,
                    size = batch.len(),
                    error = %e,
                    "Persist batch rolled back"
                );
                outcome.batches_failed += 1;
                outcome.listings_failed += batch.len();
                for listing in batch {
                    match listing.modification_timestamp {
                        Some(ts) => {
                            outcome.oldest_failed = Some(outcome.oldest_failed.map_or(ts, |o| o.min(ts)))
                        }
                        None => outcome.failed_undated = true,
                    }
                }
                last_error = Some(e);
            }
        }
    }

    if outcome.batches_total > 0 && outcome.batches_failed == outcome.batches_total {
        let message = last_error
            .map(|e| format!("{:#}", e))
            .unwrap_or_else(|| "every batch failed".to_string());
        return Err(SyncError::Persistence { category, message });
    }

    info!(
        category = %category,
        listings = outcome.listings_written,
        media = outcome.media_written,
        batches = outcome.batches_total,
        batches_failed = outcome.batches_failed,
        "Persist finished"
    );
    Ok(outcome)
}
