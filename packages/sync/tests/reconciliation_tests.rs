//! Stale listing reconciliation against Postgres.

mod common;

use crate::common::*;
use std::collections::HashSet;
use sync_core::domains::listings::activities::reconcile_listings;
use sync_core::domains::listings::models::{Category, Media};
use sync_core::kernel::test_dependencies::{MockListingFeed, MockListingRegistry};
use sync_core::kernel::BaseListingStore;
use sync_core::StaleKeyPolicy;
use test_context::test_context;
use tokio_util::sync::CancellationToken;

async fn seed(ctx: &TestHarness, keys: &[&str]) {
    let batch: Vec<_> = keys
        .iter()
        .map(|key| {
            let media_key = format!("{}-1", key);
            with_media(test_listing(key, 8), &[media_key.as_str()])
        })
        .collect();
    ctx.store()
        .persist_batch(Category::Residential, &batch)
        .await
        .unwrap();
}

#[test_context(TestHarness)]
#[tokio::test]
async fn removes_listing_gone_upstream(ctx: &TestHarness) {
    seed(ctx, &["A", "B", "C"]).await;
    let deps = ctx.deps(
        MockListingFeed::new(Vec::new()),
        MockListingRegistry::new(["A", "C"]),
        ctx.settings(),
    );

    let confirmed: HashSet<String> = ["A", "C"].iter().map(|k| k.to_string()).collect();
    let outcome = reconcile_listings(
        Category::Residential,
        &confirmed,
        &deps,
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(outcome.persisted, 3);
    assert_eq!(outcome.rechecked, 1);
    assert_eq!(outcome.deleted, 1);
    assert_eq!(
        ctx.store().listing_keys(Category::Residential).await.unwrap(),
        vec!["A", "C"]
    );
    assert!(Media::find_for_listing(Category::Residential, "B", &ctx.db_pool)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(Media::count(Category::Residential, &ctx.db_pool).await.unwrap(), 2);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn keeps_listings_whose_recheck_failed(ctx: &TestHarness) {
    seed(ctx, &["A", "B", "C"]).await;
    let mut settings = ctx.settings();
    settings.existence.batch_size = 1;
    let deps = ctx.deps(
        MockListingFeed::new(Vec::new()),
        MockListingRegistry::new(["A"]).with_failing_key("B"),
        settings,
    );

    let outcome = reconcile_listings(
        Category::Residential,
        &HashSet::new(),
        &deps,
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(outcome.unverified, 1);
    assert_eq!(
        ctx.store().listing_keys(Category::Residential).await.unwrap(),
        vec!["A", "B"]
    );
}

#[test_context(TestHarness)]
#[tokio::test]
async fn skip_if_degraded_leaves_table_intact(ctx: &TestHarness) {
    seed(ctx, &["A", "B", "C"]).await;
    let mut settings = ctx.settings();
    settings.existence.batch_size = 1;
    settings.stale_key_policy = StaleKeyPolicy::SkipIfDegraded;
    let deps = ctx.deps(
        MockListingFeed::new(Vec::new()),
        MockListingRegistry::new(["A"]).with_failing_key("B"),
        settings,
    );

    let outcome = reconcile_listings(
        Category::Residential,
        &HashSet::new(),
        &deps,
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert!(outcome.skipped);
    assert_eq!(outcome.deleted, 0);
    assert_eq!(
        ctx.store().listing_keys(Category::Residential).await.unwrap().len(),
        3
    );
}
