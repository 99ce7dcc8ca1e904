use registry_client::RegistryProperty;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::common::run_batches;
use crate::domains::listings::models::Listing;
use crate::error::{SyncError, SyncResult};
use crate::kernel::SyncDeps;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CoordinateOutcome {
    pub located: usize,
    pub batches_total: usize,
    pub batches_failed: usize,
    pub cancelled: bool,
}

impl CoordinateOutcome {
    pub fn is_degraded(&self) -> bool {
        self.batches_failed > 0 || self.cancelled
    }
}

/// Fill in latitude/longitude from the secondary registry, one multi-key
/// query per batch. Listings the registry has no position for are left as
/// they are. Only an authentication failure is an error.
pub async fn enrich_coordinates(
    listings: &mut [Listing],
    deps: &SyncDeps,
    cancel: &CancellationToken,
) -> SyncResult<CoordinateOutcome> {
    let mut outcome = CoordinateOutcome::default();
    if listings.is_empty() {
        return Ok(outcome);
    }

    let limits = deps.settings.coordinates;
    let keys: Vec<String> = listings.iter().map(|l| l.listing_key.clone()).collect();

    deps.registry.authorize().await?;

    let registry = &deps.registry;
    let report = run_batches(
        keys,
        limits.batch_size,
        limits.max_parallel,
        limits.pause,
        cancel,
        |batch| async move { registry.coordinates(&batch).await },
    )
    .await;

    outcome.batches_total = report.batches_total();
    outcome.cancelled = report.was_cancelled();

    let mut positions: HashMap<String, RegistryProperty> = HashMap::new();
    for batch in report.completed {
        match batch.result {
            Ok(found) => {
                for property in found {
                    if batch.items.contains(&property.listing_id) {
                        positions.insert(property.listing_id.clone(), property);
                    }
                }
            }
            Err(e) => match SyncError::from_registry(e, SyncError::Enrichment) {
                err if err.is_fatal() => return Err(err),
                err => {
                    warn!(batch_size = batch.items.len(), error = %err, "Coordinate batch failed");
                    outcome.batches_failed += 1;
                }
            },
        }
    }

    for listing in listings.iter_mut() {
        let Some(property) = positions.get(&listing.listing_key) else {
            continue;
        };
        if property.latitude.is_some() {
            listing.latitude = property.latitude;
        }
        if property.longitude.is_some() {
            listing.longitude = property.longitude;
        }
        if listing.has_coordinates() {
            outcome.located += 1;
        }
    }

    info!(
        listings = listings.len(),
        located = outcome.located,
        batches = outcome.batches_total,
        batches_failed = outcome.batches_failed,
        "Coordinate enrichment finished"
    );
    Ok(outcome)
}
