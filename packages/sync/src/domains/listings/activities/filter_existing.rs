use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::common::run_batches;
use crate::domains::listings::models::Listing;
use crate::error::{SyncError, SyncResult};
use crate::kernel::SyncDeps;

/// Result of checking a key set against the secondary registry.
#[derive(Debug, Default)]
pub struct Verification {
    /// Keys the registry reported present
    pub confirmed: HashSet<String>,
    /// Keys of dropped or never-run batches. Their presence is unknown.
    pub unverified: HashSet<String>,
    pub checked: usize,
    pub batches_total: usize,
    pub batches_dropped: usize,
    pub cancelled: bool,
}

impl Verification {
    /// At least one batch could not be answered.
    pub fn is_degraded(&self) -> bool {
        self.batches_dropped > 0 || self.cancelled
    }

    /// Keys positively reported absent.
    pub fn absent<'a>(&'a self, keys: &'a [String]) -> impl Iterator<Item = &'a String> + 'a {
        keys.iter()
            .filter(|k| !self.confirmed.contains(*k) && !self.unverified.contains(*k))
    }
}

/// Ask the registry which of `keys` exist, in bounded-parallel batches.
///
/// A failing batch is dropped: none of its keys are confirmed. An
/// authentication failure aborts the whole check.
pub async fn verify_keys(
    keys: Vec<String>,
    deps: &SyncDeps,
    cancel: &CancellationToken,
) -> SyncResult<Verification> {
    let limits = deps.settings.existence;
    let mut verification = Verification {
        checked: keys.len(),
        ..Default::default()
    };
    if keys.is_empty() {
        return Ok(verification);
    }

    deps.registry.authorize().await?;

    let registry = &deps.registry;
    let report = run_batches(
        keys,
        limits.batch_size,
        limits.max_parallel,
        limits.pause,
        cancel,
        |batch| async move { registry.existing_keys(&batch).await },
    )
    .await;

    verification.batches_total = report.batches_total();
    verification.cancelled = report.was_cancelled();

    let mut auth_failure = None;
    for outcome in report.completed {
        match outcome.result {
            Ok(found) => {
                // only keys we asked about in this batch count
                let asked: HashSet<&String> = outcome.items.iter().collect();
                verification
                    .confirmed
                    .extend(found.into_iter().filter(|k| asked.contains(k)));
            }
            Err(e) => match SyncError::from_registry(e, SyncError::Verification) {
                SyncError::Auth(auth) => {
                    auth_failure.get_or_insert(auth);
                }
                err => {
                    warn!(
                        batch_size = outcome.items.len(),
                        error = %err,
                        "Verification batch dropped"
                    );
                    verification.batches_dropped += 1;
                    verification.unverified.extend(outcome.items);
                }
            },
        }
    }
    for batch in report.not_run {
        verification.unverified.extend(batch);
    }

    if let Some(e) = auth_failure {
        return Err(SyncError::Auth(e));
    }
    Ok(verification)
}

/// Keep only the listings the registry confirms.
pub async fn filter_existing(
    listings: Vec<Listing>,
    deps: &SyncDeps,
    cancel: &CancellationToken,
) -> SyncResult<(Vec<Listing>, Verification)> {
    let keys: Vec<String> = listings.iter().map(|l| l.listing_key.clone()).collect();
    let verification = verify_keys(keys, deps, cancel).await?;

    let confirmed: Vec<Listing> = listings
        .into_iter()
        .filter(|l| verification.confirmed.contains(&l.listing_key))
        .collect();

    info!(
        checked = verification.checked,
        confirmed = confirmed.len(),
        batches = verification.batches_total,
        batches_dropped = verification.batches_dropped,
        "Existence filter finished"
    );
    Ok((confirmed, verification))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::test_dependencies::{MockListingFeed, MockListingRegistry, TestDependencies};
    use registry_client::AuthError;
    use std::time::Duration;

    fn keyed(n: usize) -> Vec<Listing> {
        (0..n).map(|i| Listing::new(format!("K{:04}", i))).collect()
    }

    #[tokio::test]
    async fn keeps_only_confirmed_listings() {
        let registry = MockListingRegistry::new(["K0001", "K0003", "K0010"]);
        let test = TestDependencies::new(MockListingFeed::new(Vec::new()), registry);

        let (confirmed, verification) =
            filter_existing(keyed(12), &test.deps(), &CancellationToken::new())
                .await
                .unwrap();

        let keys: Vec<&str> = confirmed.iter().map(|l| l.listing_key.as_str()).collect();
        assert_eq!(keys, vec!["K0001", "K0003", "K0010"]);
        assert_eq!(verification.batches_total, 2);
        assert!(!verification.is_degraded());
    }

    #[tokio::test]
    async fn failed_batch_confirms_nothing() {
        // K0004 poisons the first batch of ten, which holds present keys too
        let registry = MockListingRegistry::new(["K0001", "K0002", "K0015"]).with_failing_key("K0004");
        let test = TestDependencies::new(MockListingFeed::new(Vec::new()), registry);

        let (confirmed, verification) =
            filter_existing(keyed(20), &test.deps(), &CancellationToken::new())
                .await
                .unwrap();

        let keys: Vec<&str> = confirmed.iter().map(|l| l.listing_key.as_str()).collect();
        assert_eq!(keys, vec!["K0015"]);
        assert_eq!(verification.batches_dropped, 1);
        assert_eq!(verification.unverified.len(), 10);
        assert!(verification.unverified.contains("K0001"));
        assert!(verification.is_degraded());
    }

    #[tokio::test(start_paused = true)]
    async fn respects_concurrency_cap() {
        let present: Vec<String> = (0..500).map(|i| format!("K{:04}", i)).collect();
        let registry = MockListingRegistry::new(present).with_latency(Duration::from_millis(30));
        let mut settings = TestDependencies::fast_settings();
        settings.existence.max_parallel = 3;
        let test = TestDependencies::new(MockListingFeed::new(Vec::new()), registry)
            .with_settings(settings);

        let (confirmed, _) = filter_existing(keyed(500), &test.deps(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(confirmed.len(), 500);
        assert_eq!(test.registry.existence_calls().len(), 50);
        assert!(test.registry.peak_in_flight() <= 3);
        assert_eq!(test.registry.peak_in_flight(), 3);
    }

    #[tokio::test]
    async fn auth_failure_is_fatal() {
        let registry = MockListingRegistry::new(["K0001"]).with_auth_failure(AuthError::Rejected {
            status: 401,
            message: "invalid_client".into(),
        });
        let test = TestDependencies::new(MockListingFeed::new(Vec::new()), registry);

        let err = filter_existing(keyed(5), &test.deps(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Auth(_)));
        assert!(test.registry.existence_calls().is_empty());
    }

    #[test]
    fn absent_excludes_unverified() {
        let verification = Verification {
            confirmed: ["A".to_string()].into_iter().collect(),
            unverified: ["C".to_string()].into_iter().collect(),
            ..Default::default()
        };
        let keys = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        let absent: Vec<&String> = verification.absent(&keys).collect();
        assert_eq!(absent, vec!["B"]);
    }
}
