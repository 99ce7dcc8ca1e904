use feed_client::FeedError;
use std::collections::{HashMap, HashSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::common::run_batches;
use crate::config::MediaFailurePolicy;
use crate::domains::listings::models::{Listing, Media};
use crate::error::SyncError;
use crate::kernel::SyncDeps;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MediaOutcome {
    /// Listings whose media set was refreshed (possibly to empty)
    pub refreshed: usize,
    /// Refreshed listings that ended up with at least one item
    pub with_media: usize,
    pub lookups_failed: usize,
    /// Failed lookups whose listing will be written with no media
    pub cleared: usize,
    /// Items dropped because they did not point at the listing they were fetched for
    pub orphans_discarded: usize,
    /// Listings skipped because the run was cancelled
    pub skipped: usize,
}

impl MediaOutcome {
    pub fn is_degraded(&self) -> bool {
        self.lookups_failed > 0 || self.skipped > 0
    }
}

/// Look up the media of every listing, one request per key.
///
/// A listing whose lookup failed is written with no media. Under
/// [`MediaFailurePolicy::KeepStored`] it keeps `media = None` instead, so its
/// stored media is left alone. Never fails: the worst case is a listing set
/// without media.
pub async fn enrich_media(
    listings: &mut [Listing],
    deps: &SyncDeps,
    cancel: &CancellationToken,
) -> MediaOutcome {
    let limits = deps.settings.media;
    let policy = deps.settings.media_failure_policy;
    let key_pause = deps.settings.media_key_pause;
    let keys: Vec<String> = listings.iter().map(|l| l.listing_key.clone()).collect();

    let feed = &deps.feed;
    let report = run_batches(
        keys,
        limits.batch_size,
        limits.max_parallel,
        limits.pause,
        cancel,
        |batch| async move {
            let mut found: Vec<(String, Result<Vec<Media>, FeedError>)> =
                Vec::with_capacity(batch.len());
            for key in batch {
                if cancel.is_cancelled() {
                    break;
                }
                let result = feed.fetch_media(&key).await;
                found.push((key, result));
                if !key_pause.is_zero() {
                    tokio::time::sleep(key_pause).await;
                }
            }
            found
        },
    )
    .await;

    let mut outcome = MediaOutcome::default();
    let mut by_key: HashMap<String, Vec<Media>> = HashMap::new();
    let mut failed: HashSet<String> = HashSet::new();
    let mut looked_up = 0;

    for batch in report.completed {
        for (key, result) in batch.result {
            looked_up += 1;
            match result {
                Ok(media) => {
                    let total = media.len();
                    let mut owned: Vec<Media> =
                        media.into_iter().filter(|m| m.belongs_to(&key)).collect();
                    outcome.orphans_discarded += total - owned.len();
                    owned.sort_by(|a, b| {
                        a.display_order
                            .cmp(&b.display_order)
                            .then_with(|| a.media_key.cmp(&b.media_key))
                    });
                    by_key.insert(key, owned);
                }
                Err(e) => {
                    let err = SyncError::Enrichment(e.to_string());
                    debug!(listing_key = %key, error = %err, "Media lookup failed");
                    outcome.lookups_failed += 1;
                    failed.insert(key);
                }
            }
        }
    }
    outcome.skipped = listings.len().saturating_sub(looked_up);

    for listing in listings.iter_mut() {
        match by_key.remove(&listing.listing_key) {
            Some(media) => {
                outcome.refreshed += 1;
                if !media.is_empty() {
                    outcome.with_media += 1;
                }
                listing.media = Some(media);
            }
            None if policy == MediaFailurePolicy::Clear
                && failed.contains(&listing.listing_key) =>
            {
                outcome.cleared += 1;
                listing.media = Some(Vec::new());
            }
            None => listing.media = None,
        }
    }

    if outcome.is_degraded() {
        warn!(
            refreshed = outcome.refreshed,
            failed = outcome.lookups_failed,
            skipped = outcome.skipped,
            cleared = outcome.cleared,
            policy = %policy,
            "Media enrichment degraded"
        );
    }
    info!(
        listings = listings.len(),
        with_media = outcome.with_media,
        orphans_discarded = outcome.orphans_discarded,
        "Media enrichment finished"
    );
    outcome
}
