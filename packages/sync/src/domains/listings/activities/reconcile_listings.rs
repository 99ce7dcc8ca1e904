use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::filter_existing::verify_keys;
use crate::config::StaleKeyPolicy;
use crate::domains::listings::models::Category;
use crate::error::{SyncError, SyncResult};
use crate::kernel::SyncDeps;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub persisted: usize,
    /// Persisted keys not confirmed earlier in the run, checked again
    pub rechecked: usize,
    pub deleted: u64,
    /// Rechecked keys whose verification batch failed
    pub unverified: usize,
    /// Deletion was skipped because verification was degraded
    pub skipped: bool,
}

/// Delete persisted listings that no longer exist upstream.
///
/// The feed only reports changes, so every persisted key of the category is
/// considered. Keys confirmed earlier in this run are kept; the others are
/// re-verified against the registry and only keys positively reported absent
/// are deleted, unless `policy` says otherwise.
pub async fn reconcile_listings(
    category: Category,
    confirmed: &HashSet<String>,
    deps: &SyncDeps,
    cancel: &CancellationToken,
) -> SyncResult<ReconcileOutcome> {
    let policy = deps.settings.stale_key_policy;
    let persisted = deps
        .store
        .listing_keys(category)
        .await
        .map_err(|e| SyncError::Reconciliation {
            category,
            message: format!("failed to load persisted keys: {:#}", e),
        })?;

    let candidates: Vec<String> = persisted
        .iter()
        .filter(|k| !confirmed.contains(*k))
        .cloned()
        .collect();

    let mut outcome = ReconcileOutcome {
        persisted: persisted.len(),
        rechecked: candidates.len(),
        ..Default::default()
    };
    if candidates.is_empty() {
        info!(category = %category, persisted = outcome.persisted, "Nothing to reconcile");
        return Ok(outcome);
    }

    let verification = verify_keys(candidates.clone(), deps, cancel).await?;
    if verification.cancelled {
        return Err(SyncError::Cancelled);
    }
    outcome.unverified = verification.unverified.len();

    let stale: Vec<String> = match policy {
        StaleKeyPolicy::KeepUnverified => verification.absent(&candidates).cloned().collect(),
        StaleKeyPolicy::SkipIfDegraded if verification.is_degraded() => {
            warn!(
                category = %category,
                batches_dropped = verification.batches_dropped,
                "Verification degraded, skipping stale listing deletion"
            );
            outcome.skipped = true;
            Vec::new()
        }
        StaleKeyPolicy::SkipIfDegraded => verification.absent(&candidates).cloned().collect(),
        StaleKeyPolicy::DeleteUnverified => candidates
            .iter()
            .filter(|k| !verification.confirmed.contains(*k))
            .cloned()
            .collect(),
    };

    if !stale.is_empty() {
        outcome.deleted = deps
            .store
            .delete_listings(category, &stale)
            .await
            .map_err(|e| SyncError::Reconciliation {
                category,
                message: format!("failed to delete {} stale listings: {:#}", stale.len(), e),
            })?;
    }

    info!(
        category = %category,
        persisted = outcome.persisted,
        rechecked = outcome.rechecked,
        deleted = outcome.deleted,
        unverified = outcome.unverified,
        policy = %policy,
        "Reconciliation finished"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::listings::models::{Listing, Media};
    use crate::kernel::test_dependencies::{
        MemoryListingStore, MockListingFeed, MockListingRegistry, TestDependencies,
    };

    fn with_media(key: &str) -> Listing {
        let mut listing = Listing::new(key);
        listing.media = Some(vec![Media {
            media_key: format!("{}-1", key),
            listing_key: key.to_string(),
            media_url: None,
            media_category: None,
            media_type: None,
            display_order: 0,
            media_modification_timestamp: None,
            preferred_photo: None,
            image_size_description: None,
        }]);
        listing
    }

    fn seeded(keys: &[&str]) -> MemoryListingStore {
        keys.iter().fold(MemoryListingStore::new(), |store, key| {
            store.with_listing(Category::Residential, with_media(key))
        })
    }

    fn confirmed(keys: &[&str]) -> HashSet<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[tokio::test]
    async fn deletes_exactly_the_absent_listing() {
        let registry = MockListingRegistry::new(["A", "C"]);
        let test = TestDependencies::new(MockListingFeed::new(Vec::new()), registry)
            .with_store(seeded(&["A", "B", "C"]));

        let outcome = reconcile_listings(
            Category::Residential,
            &confirmed(&["A", "C"]),
            &test.deps(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.deleted, 1);
        assert_eq!(test.store.keys(Category::Residential), vec!["A", "C"]);
        assert!(test.store.media_keys(Category::Residential, "B").is_empty());
        assert_eq!(test.store.media_keys(Category::Residential, "A"), vec!["A-1"]);
        assert_eq!(test.store.media_keys(Category::Residential, "C"), vec!["C-1"]);
    }

    #[tokio::test]
    async fn unchanged_listings_survive_a_delta_run() {
        // only A changed this run; B and C are still upstream
        let registry = MockListingRegistry::new(["A", "B", "C"]);
        let test = TestDependencies::new(MockListingFeed::new(Vec::new()), registry)
            .with_store(seeded(&["A", "B", "C"]));

        let outcome = reconcile_listings(
            Category::Residential,
            &confirmed(&["A"]),
            &test.deps(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.rechecked, 2);
        assert_eq!(outcome.deleted, 0);
        assert_eq!(test.store.keys(Category::Residential).len(), 3);
    }

    #[tokio::test]
    async fn keeps_unverified_by_default() {
        let mut settings = TestDependencies::fast_settings();
        settings.existence.batch_size = 1;
        let registry = MockListingRegistry::new(["A"]).with_failing_key("B");
        let test = TestDependencies::new(MockListingFeed::new(Vec::new()), registry)
            .with_store(seeded(&["A", "B", "C"]))
            .with_settings(settings);

        let outcome = reconcile_listings(
            Category::Residential,
            &HashSet::new(),
            &test.deps(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.unverified, 1);
        assert_eq!(test.store.keys(Category::Residential), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn skip_if_degraded_deletes_nothing() {
        let mut settings = TestDependencies::fast_settings();
        settings.existence.batch_size = 1;
        settings.stale_key_policy = StaleKeyPolicy::SkipIfDegraded;
        let registry = MockListingRegistry::new(["A"]).with_failing_key("B");
        let test = TestDependencies::new(MockListingFeed::new(Vec::new()), registry)
            .with_store(seeded(&["A", "B", "C"]))
            .with_settings(settings);

        let outcome = reconcile_listings(
            Category::Residential,
            &HashSet::new(),
            &test.deps(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(outcome.skipped);
        assert_eq!(test.store.keys(Category::Residential).len(), 3);
    }

    #[tokio::test]
    async fn delete_unverified_treats_failures_as_absent() {
        let mut settings = TestDependencies::fast_settings();
        settings.existence.batch_size = 1;
        settings.stale_key_policy = StaleKeyPolicy::DeleteUnverified;
        let registry = MockListingRegistry::new(["A"]).with_failing_key("B");
        let test = TestDependencies::new(MockListingFeed::new(Vec::new()), registry)
            .with_store(seeded(&["A", "B", "C"]))
            .with_settings(settings);

        let outcome = reconcile_listings(
            Category::Residential,
            &HashSet::new(),
            &test.deps(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.deleted, 2);
        assert_eq!(test.store.keys(Category::Residential), vec!["A"]);
    }

    #[tokio::test]
    async fn confirmed_keys_are_not_rechecked() {
        let registry = MockListingRegistry::new(["A", "B"]);
        let test = TestDependencies::new(MockListingFeed::new(Vec::new()), registry)
            .with_store(seeded(&["A", "B"]));

        reconcile_listings(
            Category::Residential,
            &confirmed(&["A", "B"]),
            &test.deps(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(test.registry.existence_calls().is_empty());
    }
}
