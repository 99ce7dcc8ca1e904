//! Listing persistence against a real Postgres database.

mod common;

use crate::common::*;
use sync_core::domains::listings::models::{Category, Listing, Media};
use sync_core::kernel::BaseListingStore;
use test_context::test_context;

#[test_context(TestHarness)]
#[tokio::test]
async fn listing_round_trips_through_the_store(ctx: &TestHarness) {
    let listing = test_listing("X100", 9);
    ctx.store()
        .persist_batch(Category::Residential, &[listing.clone()])
        .await
        .unwrap();

    let stored = Listing::find_by_key(Category::Residential, "X100", &ctx.db_pool)
        .await
        .unwrap()
        .expect("listing stored");

    assert_eq!(stored, listing);
    assert!(Listing::find_by_key(Category::Commercial, "X100", &ctx.db_pool)
        .await
        .unwrap()
        .is_none());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn persisting_the_same_batch_twice_is_idempotent(ctx: &TestHarness) {
    let store = ctx.store();
    let batch = vec![
        with_media(test_listing("A", 8), &["A-1", "A-2"]),
        with_media(test_listing("B", 9), &["B-1"]),
    ];

    let first = store.persist_batch(Category::Residential, &batch).await.unwrap();
    let second = store.persist_batch(Category::Residential, &batch).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(
        Listing::find_keys(Category::Residential, &ctx.db_pool).await.unwrap(),
        vec!["A", "B"]
    );
    assert_eq!(Media::count(Category::Residential, &ctx.db_pool).await.unwrap(), 3);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn later_write_overwrites_every_column(ctx: &TestHarness) {
    let store = ctx.store();
    store
        .persist_batch(Category::Residential, &[test_listing("A", 8)])
        .await
        .unwrap();

    let mut updated = test_listing("A", 10);
    updated.list_price = Some(599_000.0);
    updated.public_remarks = None;
    updated.basement = None;
    store
        .persist_batch(Category::Residential, &[updated.clone()])
        .await
        .unwrap();

    let stored = Listing::find_by_key(Category::Residential, "A", &ctx.db_pool)
        .await
        .unwrap()
        .expect("listing stored");
    assert_eq!(stored, updated);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn refreshed_media_replaces_stored_media(ctx: &TestHarness) {
    let store = ctx.store();
    store
        .persist_batch(
            Category::Residential,
            &[with_media(test_listing("A", 8), &["A-1", "A-2", "A-3"])],
        )
        .await
        .unwrap();

    store
        .persist_batch(
            Category::Residential,
            &[with_media(test_listing("A", 9), &["A-9"])],
        )
        .await
        .unwrap();

    let media = Media::find_for_listing(Category::Residential, "A", &ctx.db_pool)
        .await
        .unwrap();
    let keys: Vec<&str> = media.iter().map(|m| m.media_key.as_str()).collect();
    assert_eq!(keys, vec!["A-9"]);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn listing_without_media_set_keeps_stored_media(ctx: &TestHarness) {
    let store = ctx.store();
    store
        .persist_batch(
            Category::Residential,
            &[with_media(test_listing("A", 8), &["A-1", "A-2"])],
        )
        .await
        .unwrap();

    // a failed lookup under the keep_stored policy carries no media set
    store
        .persist_batch(Category::Residential, &[test_listing("A", 9)])
        .await
        .unwrap();

    let media = Media::find_for_listing(Category::Residential, "A", &ctx.db_pool)
        .await
        .unwrap();
    assert_eq!(media.len(), 2);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn empty_refreshed_media_clears_stored_media(ctx: &TestHarness) {
    let store = ctx.store();
    store
        .persist_batch(
            Category::Residential,
            &[with_media(test_listing("A", 8), &["A-1"])],
        )
        .await
        .unwrap();

    store
        .persist_batch(Category::Residential, &[with_media(test_listing("A", 9), &[])])
        .await
        .unwrap();

    assert_eq!(Media::count(Category::Residential, &ctx.db_pool).await.unwrap(), 0);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn failed_batch_writes_nothing(ctx: &TestHarness) {
    let mut broken = test_listing("B", 9);
    // media pointing at a listing that does not exist violates the foreign key
    broken.media = Some(vec![test_media("MISSING", "M-1", 0)]);

    let result = ctx
        .store()
        .persist_batch(Category::Commercial, &[test_listing("A", 8), broken])
        .await;

    assert!(result.is_err());
    assert!(Listing::find_keys(Category::Commercial, &ctx.db_pool)
        .await
        .unwrap()
        .is_empty());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn deleting_listings_removes_their_media(ctx: &TestHarness) {
    let store = ctx.store();
    store
        .persist_batch(
            Category::Residential,
            &[
                with_media(test_listing("A", 8), &["A-1"]),
                with_media(test_listing("B", 8), &["B-1", "B-2"]),
            ],
        )
        .await
        .unwrap();

    let deleted = store
        .delete_listings(Category::Residential, &["B".to_string()])
        .await
        .unwrap();

    assert_eq!(deleted, 1);
    assert_eq!(
        store.listing_keys(Category::Residential).await.unwrap(),
        vec!["A"]
    );
    assert_eq!(Media::count(Category::Residential, &ctx.db_pool).await.unwrap(), 1);
}
