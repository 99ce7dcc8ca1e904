//! Sync dependencies for pipeline stages (using traits for testability)
//!
//! This module provides the dependency container handed to every stage, plus
//! the adapters that put the registry clients behind the kernel traits.

use async_trait::async_trait;
use feed_client::{FeedClient, FeedError, DEFAULT_IMAGE_SIZES};
use registry_client::{
    AuthError, OAuthTokenSource, PropertySelect, RegistryClient, RegistryError,
    RegistryProperty, TokenCache, TokenSource,
};
use std::sync::Arc;

use crate::config::SyncSettings;
use crate::domains::listings::models::{Listing, Media};
use crate::kernel::{BaseListingFeed, BaseListingRegistry, BaseListingStore};

// =============================================================================
// FeedClient Adapter (implements BaseListingFeed trait)
// =============================================================================

/// Wrapper around FeedClient that implements BaseListingFeed trait
pub struct FeedAdapter(pub Arc<FeedClient>);

impl FeedAdapter {
    pub fn new(client: Arc<FeedClient>) -> Self {
        Self(client)
    }
}

#[async_trait]
impl BaseListingFeed for FeedAdapter {
    async fn count_listings(&self, filter: &str) -> Result<u64, FeedError> {
        self.0.count(filter).await
    }

    async fn fetch_listings_page(
        &self,
        filter: &str,
        skip: u64,
        top: u64,
    ) -> Result<Vec<Listing>, FeedError> {
        self.0.fetch_page(filter, skip, top).await
    }

    async fn fetch_media(&self, listing_key: &str) -> Result<Vec<Media>, FeedError> {
        self.0.fetch_media(listing_key, DEFAULT_IMAGE_SIZES).await
    }
}

// =============================================================================
// RegistryClient Adapter (implements BaseListingRegistry trait)
// =============================================================================

/// Registry client plus the token cache every concurrent batch shares.
pub struct RegistryAdapter<S: TokenSource = OAuthTokenSource> {
    client: Arc<RegistryClient>,
    tokens: Arc<TokenCache<S>>,
}

impl<S: TokenSource + 'static> RegistryAdapter<S> {
    pub fn new(client: Arc<RegistryClient>, tokens: Arc<TokenCache<S>>) -> Self {
        Self { client, tokens }
    }

    async fn query(
        &self,
        listing_keys: &[String],
        select: PropertySelect,
    ) -> Result<Vec<RegistryProperty>, RegistryError> {
        let token = self.tokens.token().await?;
        let result = self
            .client
            .query_properties(token.secret(), listing_keys, select)
            .await;

        // A rejected token is dropped so the next batch refreshes it
        if let Err(RegistryError::Api { status: 401, .. }) = &result {
            tracing::warn!("Registry rejected cached token, invalidating");
            self.tokens.invalidate();
        }
        result
    }
}

#[async_trait]
impl<S: TokenSource + 'static> BaseListingRegistry for RegistryAdapter<S> {
    async fn authorize(&self) -> Result<(), AuthError> {
        self.tokens.token().await.map(|_| ())
    }

    async fn existing_keys(&self, listing_keys: &[String]) -> Result<Vec<String>, RegistryError> {
        let found = self.query(listing_keys, PropertySelect::KeyOnly).await?;
        Ok(found.into_iter().map(|p| p.listing_id).collect())
    }

    async fn coordinates(
        &self,
        listing_keys: &[String],
    ) -> Result<Vec<RegistryProperty>, RegistryError> {
        self.query(listing_keys, PropertySelect::WithCoordinates)
            .await
    }
}

// =============================================================================
// SyncDeps
// =============================================================================

/// Dependencies accessible to pipeline stages (using traits for testability)
#[derive(Clone)]
pub struct SyncDeps {
    pub feed: Arc<dyn BaseListingFeed>,
    pub registry: Arc<dyn BaseListingRegistry>,
    pub store: Arc<dyn BaseListingStore>,
    pub settings: SyncSettings,
}

impl SyncDeps {
    pub fn new(
        feed: Arc<dyn BaseListingFeed>,
        registry: Arc<dyn BaseListingRegistry>,
        store: Arc<dyn BaseListingStore>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            feed,
            registry,
            store,
            settings,
        }
    }
}
