// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no business logic.
// Pipeline stages live in domains/*/activities and receive these explicitly.
//
// Naming convention: Base* for trait names (e.g., BaseListingFeed)

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feed_client::FeedError;
use registry_client::{AuthError, RegistryError, RegistryProperty};

use crate::domains::listings::models::{Category, Listing, Media};

// =============================================================================
// Primary feed (Infrastructure - paged listings and per-listing media)
// =============================================================================

#[async_trait]
pub trait BaseListingFeed: Send + Sync {
    /// Total number of listings matching an OData filter
    async fn count_listings(&self, filter: &str) -> Result<u64, FeedError>;

    /// One page of listings, newest modification first
    async fn fetch_listings_page(
        &self,
        filter: &str,
        skip: u64,
        top: u64,
    ) -> Result<Vec<Listing>, FeedError>;

    /// Live media of a single listing
    async fn fetch_media(&self, listing_key: &str) -> Result<Vec<Media>, FeedError>;
}

// =============================================================================
// Secondary registry (Infrastructure - existence checks and coordinates)
// =============================================================================

#[async_trait]
pub trait BaseListingRegistry: Send + Sync {
    /// Make sure a usable credential is available before a stage starts
    async fn authorize(&self) -> Result<(), AuthError>;

    /// The subset of `listing_keys` the registry knows about
    async fn existing_keys(&self, listing_keys: &[String]) -> Result<Vec<String>, RegistryError>;

    /// Key and coordinates of every listing of `listing_keys` the registry knows about
    async fn coordinates(
        &self,
        listing_keys: &[String],
    ) -> Result<Vec<RegistryProperty>, RegistryError>;
}

// =============================================================================
// Listing store (Infrastructure - transactional persistence)
// =============================================================================

/// Rows written by one persisted batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistedBatch {
    pub listings: usize,
    pub media: usize,
}

#[async_trait]
pub trait BaseListingStore: Send + Sync {
    async fn watermark(&self, source: &str) -> Result<Option<DateTime<Utc>>>;

    /// Store `to` unless the current watermark is newer. Returns the value now stored.
    async fn advance_watermark(&self, source: &str, to: DateTime<Utc>) -> Result<DateTime<Utc>>;

    /// Write a batch in one transaction: replace the media of every listing
    /// whose media was refreshed, then upsert listings and their media.
    async fn persist_batch(&self, category: Category, listings: &[Listing])
        -> Result<PersistedBatch>;

    /// Every persisted key of the category
    async fn listing_keys(&self, category: Category) -> Result<Vec<String>>;

    /// Delete listings and their media in one transaction. Returns listings deleted.
    async fn delete_listings(&self, category: Category, listing_keys: &[String]) -> Result<u64>;
}
