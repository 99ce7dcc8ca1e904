// TestDependencies - mock implementations for testing
//
// Provides in-memory feeds, registries and stores that can be injected into
// SyncDeps for tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feed_client::FeedError;
use registry_client::{AuthError, RegistryError, RegistryProperty};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{BaseListingFeed, BaseListingRegistry, BaseListingStore, PersistedBatch, SyncDeps};
use crate::config::SyncSettings;
use crate::domains::listings::models::{Category, Listing, Media};

// =============================================================================
// Mock Listing Feed
// =============================================================================

/// Arguments captured from a page call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCall {
    pub filter: String,
    pub skip: u64,
    pub top: u64,
}

/// Serves a fixed listing set, newest first, one page at a time.
pub struct MockListingFeed {
    listings: Vec<Listing>,
    total_override: Option<u64>,
    fail_count: bool,
    failing_skips: HashSet<u64>,
    page_cap: Option<u64>,
    media: HashMap<String, Vec<Media>>,
    failing_media: HashSet<String>,
    count_calls: Mutex<Vec<String>>,
    page_calls: Mutex<Vec<PageCall>>,
    media_calls: Mutex<Vec<String>>,
}

impl MockListingFeed {
    pub fn new(mut listings: Vec<Listing>) -> Self {
        listings.sort_by(|a, b| b.modification_timestamp.cmp(&a.modification_timestamp));
        Self {
            listings,
            total_override: None,
            fail_count: false,
            failing_skips: HashSet::new(),
            page_cap: None,
            media: HashMap::new(),
            failing_media: HashSet::new(),
            count_calls: Mutex::new(Vec::new()),
            page_calls: Mutex::new(Vec::new()),
            media_calls: Mutex::new(Vec::new()),
        }
    }

    /// Report a different total than the listings actually served
    pub fn with_total(mut self, total: u64) -> Self {
        self.total_override = Some(total);
        self
    }

    pub fn with_failing_count(mut self) -> Self {
        self.fail_count = true;
        self
    }

    /// Fail the page starting at `skip`
    pub fn with_failing_page(mut self, skip: u64) -> Self {
        self.failing_skips.insert(skip);
        self
    }

    /// Serve at most `cap` rows per page whatever `$top` asks for
    pub fn with_page_cap(mut self, cap: u64) -> Self {
        self.page_cap = Some(cap);
        self
    }

    pub fn with_media(mut self, listing_key: &str, media: Vec<Media>) -> Self {
        self.media.insert(listing_key.to_string(), media);
        self
    }

    pub fn with_failing_media(mut self, listing_key: &str) -> Self {
        self.failing_media.insert(listing_key.to_string());
        self
    }

    pub fn count_calls(&self) -> Vec<String> {
        self.count_calls.lock().unwrap().clone()
    }

    pub fn page_calls(&self) -> Vec<PageCall> {
        self.page_calls.lock().unwrap().clone()
    }

    pub fn media_calls(&self) -> Vec<String> {
        self.media_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl BaseListingFeed for MockListingFeed {
    async fn count_listings(&self, filter: &str) -> Result<u64, FeedError> {
        self.count_calls.lock().unwrap().push(filter.to_string());
        if self.fail_count {
            return Err(FeedError::Api {
                status: 503,
                message: "count unavailable".to_string(),
            });
        }
        Ok(self.total_override.unwrap_or(self.listings.len() as u64))
    }

    async fn fetch_listings_page(
        &self,
        filter: &str,
        skip: u64,
        top: u64,
    ) -> Result<Vec<Listing>, FeedError> {
        self.page_calls.lock().unwrap().push(PageCall {
            filter: filter.to_string(),
            skip,
            top,
        });
        if self.failing_skips.contains(&skip) {
            return Err(FeedError::Network("connection reset".to_string()));
        }
        let top = self.page_cap.map_or(top, |cap| top.min(cap));
        Ok(self
            .listings
            .iter()
            .skip(skip as usize)
            .take(top as usize)
            .cloned()
            .collect())
    }

    async fn fetch_media(&self, listing_key: &str) -> Result<Vec<Media>, FeedError> {
        self.media_calls.lock().unwrap().push(listing_key.to_string());
        if self.failing_media.contains(listing_key) {
            return Err(FeedError::Api {
                status: 500,
                message: "media lookup failed".to_string(),
            });
        }
        Ok(self.media.get(listing_key).cloned().unwrap_or_default())
    }
}

// =============================================================================
// Mock Listing Registry
// =============================================================================

/// Knows a fixed key set. Any batch containing a poisoned key fails.
pub struct MockListingRegistry {
    present: HashSet<String>,
    coordinates: HashMap<String, (f64, f64)>,
    poisoned: HashSet<String>,
    auth_failure: Option<AuthError>,
    latency: Duration,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    existence_calls: Mutex<Vec<Vec<String>>>,
    coordinate_calls: Mutex<Vec<Vec<String>>>,
}

impl MockListingRegistry {
    pub fn new<I, K>(present: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        Self {
            present: present.into_iter().map(Into::into).collect(),
            coordinates: HashMap::new(),
            poisoned: HashSet::new(),
            auth_failure: None,
            latency: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            existence_calls: Mutex::new(Vec::new()),
            coordinate_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_coordinates(mut self, listing_key: &str, latitude: f64, longitude: f64) -> Self {
        self.coordinates
            .insert(listing_key.to_string(), (latitude, longitude));
        self
    }

    /// Every batch that contains `listing_key` fails with a 503
    pub fn with_failing_key(mut self, listing_key: &str) -> Self {
        self.poisoned.insert(listing_key.to_string());
        self
    }

    pub fn with_auth_failure(mut self, error: AuthError) -> Self {
        self.auth_failure = Some(error);
        self
    }

    /// Simulated round trip, so overlapping batches are observable
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Most batches ever outstanding at once
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn existence_calls(&self) -> Vec<Vec<String>> {
        self.existence_calls.lock().unwrap().clone()
    }

    pub fn coordinate_calls(&self) -> Vec<Vec<String>> {
        self.coordinate_calls.lock().unwrap().clone()
    }

    async fn round_trip(&self, listing_keys: &[String]) -> Result<(), RegistryError> {
        if let Some(err) = &self.auth_failure {
            return Err(RegistryError::Auth(err.clone()));
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if listing_keys.iter().any(|k| self.poisoned.contains(k)) {
            return Err(RegistryError::Api {
                status: 503,
                message: "service unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl BaseListingRegistry for MockListingRegistry {
    async fn authorize(&self) -> Result<(), AuthError> {
        match &self.auth_failure {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn existing_keys(&self, listing_keys: &[String]) -> Result<Vec<String>, RegistryError> {
        self.existence_calls
            .lock()
            .unwrap()
            .push(listing_keys.to_vec());
        self.round_trip(listing_keys).await?;

        Ok(listing_keys
            .iter()
            .filter(|k| self.present.contains(*k))
            .cloned()
            .collect())
    }

    async fn coordinates(
        &self,
        listing_keys: &[String],
    ) -> Result<Vec<RegistryProperty>, RegistryError> {
        self.coordinate_calls
            .lock()
            .unwrap()
            .push(listing_keys.to_vec());
        self.round_trip(listing_keys).await?;

        Ok(listing_keys
            .iter()
            .filter(|k| self.present.contains(*k))
            .map(|k| {
                let coords = self.coordinates.get(k);
                RegistryProperty {
                    listing_id: k.clone(),
                    latitude: coords.map(|c| c.0),
                    longitude: coords.map(|c| c.1),
                }
            })
            .collect())
    }
}

// =============================================================================
// Memory Listing Store
// =============================================================================

#[derive(Default)]
struct StoreState {
    listings: HashMap<Category, BTreeMap<String, Listing>>,
    media: HashMap<Category, BTreeMap<String, Media>>,
    watermarks: HashMap<String, DateTime<Utc>>,
}

/// In-memory store with the same batch semantics as the Postgres one.
#[derive(Default)]
pub struct MemoryListingStore {
    state: Mutex<StoreState>,
    poisoned: HashSet<String>,
    fail_watermark_writes: bool,
    persist_calls: AtomicUsize,
}

impl MemoryListingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Any batch containing `listing_key` fails without writing anything
    pub fn with_failing_key(mut self, listing_key: &str) -> Self {
        self.poisoned.insert(listing_key.to_string());
        self
    }

    pub fn with_failing_watermark_writes(mut self) -> Self {
        self.fail_watermark_writes = true;
        self
    }

    pub fn with_watermark(self, source: &str, at: DateTime<Utc>) -> Self {
        self.state
            .lock()
            .unwrap()
            .watermarks
            .insert(source.to_string(), at);
        self
    }

    /// Seed a persisted listing with its media
    pub fn with_listing(self, category: Category, listing: Listing) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            for media in listing.media.iter().flatten() {
                state
                    .media
                    .entry(category)
                    .or_default()
                    .insert(media.media_key.clone(), media.clone());
            }
            let mut stored = listing;
            stored.media = None;
            state
                .listings
                .entry(category)
                .or_default()
                .insert(stored.listing_key.clone(), stored);
        }
        self
    }

    pub fn listing(&self, category: Category, listing_key: &str) -> Option<Listing> {
        let state = self.state.lock().unwrap();
        state
            .listings
            .get(&category)
            .and_then(|l| l.get(listing_key))
            .cloned()
    }

    pub fn keys(&self, category: Category) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .listings
            .get(&category)
            .map(|l| l.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Media keys owned by a listing, sorted
    pub fn media_keys(&self, category: Category, listing_key: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .media
            .get(&category)
            .map(|m| {
                m.values()
                    .filter(|media| media.listing_key == listing_key)
                    .map(|media| media.media_key.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn stored_watermark(&self, source: &str) -> Option<DateTime<Utc>> {
        self.state.lock().unwrap().watermarks.get(source).copied()
    }

    pub fn persist_calls(&self) -> usize {
        self.persist_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BaseListingStore for MemoryListingStore {
    async fn watermark(&self, source: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.stored_watermark(source))
    }

    async fn advance_watermark(&self, source: &str, to: DateTime<Utc>) -> Result<DateTime<Utc>> {
        if self.fail_watermark_writes {
            return Err(anyhow!("watermark table locked"));
        }
        let mut state = self.state.lock().unwrap();
        let stored = state.watermarks.entry(source.to_string()).or_insert(to);
        if to > *stored {
            *stored = to;
        }
        Ok(*stored)
    }

    async fn persist_batch(
        &self,
        category: Category,
        listings: &[Listing],
    ) -> Result<PersistedBatch> {
        self.persist_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(bad) = listings.iter().find(|l| self.poisoned.contains(&l.listing_key)) {
            return Err(anyhow!("constraint violation on {}", bad.listing_key));
        }

        let mut state = self.state.lock().unwrap();
        let mut written = PersistedBatch::default();

        let refreshed: HashSet<&str> = listings
            .iter()
            .filter(|l| l.media.is_some())
            .map(|l| l.listing_key.as_str())
            .collect();
        state
            .media
            .entry(category)
            .or_default()
            .retain(|_, m| !refreshed.contains(m.listing_key.as_str()));

        for listing in listings {
            for media in listing.media.iter().flatten() {
                state
                    .media
                    .entry(category)
                    .or_default()
                    .insert(media.media_key.clone(), media.clone());
                written.media += 1;
            }
            let mut stored = listing.clone();
            stored.media = None;
            state
                .listings
                .entry(category)
                .or_default()
                .insert(stored.listing_key.clone(), stored);
            written.listings += 1;
        }
        Ok(written)
    }

    async fn listing_keys(&self, category: Category) -> Result<Vec<String>> {
        Ok(self.keys(category))
    }

    async fn delete_listings(&self, category: Category, listing_keys: &[String]) -> Result<u64> {
        let doomed: HashSet<&str> = listing_keys.iter().map(String::as_str).collect();
        let mut state = self.state.lock().unwrap();

        state
            .media
            .entry(category)
            .or_default()
            .retain(|_, m| !doomed.contains(m.listing_key.as_str()));

        let listings = state.listings.entry(category).or_default();
        let before = listings.len();
        listings.retain(|key, _| !doomed.contains(key.as_str()));
        Ok((before - listings.len()) as u64)
    }
}

// =============================================================================
// TestDependencies
// =============================================================================

/// Mocks wired into a SyncDeps, with handles kept for assertions.
pub struct TestDependencies {
    pub feed: Arc<MockListingFeed>,
    pub registry: Arc<MockListingRegistry>,
    pub store: Arc<MemoryListingStore>,
    pub settings: SyncSettings,
}

impl TestDependencies {
    pub fn new(feed: MockListingFeed, registry: MockListingRegistry) -> Self {
        Self {
            feed: Arc::new(feed),
            registry: Arc::new(registry),
            store: Arc::new(MemoryListingStore::new()),
            settings: Self::fast_settings(),
        }
    }

    pub fn with_store(mut self, store: MemoryListingStore) -> Self {
        self.store = Arc::new(store);
        self
    }

    pub fn with_settings(mut self, settings: SyncSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Default batch shapes with every pacing delay removed
    pub fn fast_settings() -> SyncSettings {
        let mut settings = SyncSettings::default();
        settings.page_delay = Duration::ZERO;
        settings.existence.pause = Duration::ZERO;
        settings.media.pause = Duration::ZERO;
        settings.media_key_pause = Duration::ZERO;
        settings.coordinates.pause = Duration::ZERO;
        settings
    }

    pub fn deps(&self) -> SyncDeps {
        SyncDeps::new(
            self.feed.clone(),
            self.registry.clone(),
            self.store.clone(),
            self.settings.clone(),
        )
    }
}
