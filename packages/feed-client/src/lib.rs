//! Pure REST client for the primary listings feed.
//!
//! The feed is a RESO Web API (OData v4) endpoint authorized with a static
//! bearer token. Supports the three queries the sync needs: a total count for
//! a filter, a page of properties ordered newest-first, and the media of a
//! single listing.
//!
//! # Example
//!
//! ```rust,ignore
//! use feed_client::{FeedClient, PropertyFilter, PropertyTypeMatch};
//!
//! let client = FeedClient::new("https://feed.example.com/odata/", token)?;
//! let filter = PropertyFilter::new(PropertyTypeMatch::Equals("Commercial".into()));
//!
//! let total = client.count(&filter.to_odata()).await?;
//! let page: Vec<MyListing> = client.fetch_page(&filter.to_odata(), 0, 5000).await?;
//! ```

pub mod error;
pub mod filter;
pub mod types;

pub use error::{FeedError, Result};
pub use filter::{media_filter, PropertyFilter, PropertyTypeMatch};
pub use types::{ImageSize, ODataResponse, DEFAULT_IMAGE_SIZES};

use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use std::time::Duration;

const USER_AGENT: &str = concat!("listings-sync/", env!("CARGO_PKG_VERSION"));

/// Request timeout; full pages of 5000 records are slow to render upstream.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

pub struct FeedClient {
    client: reqwest::Client,
    base_url: String,
    token: SecretString,
}

impl FeedClient {
    /// `base_url` is the OData service root; resource names are appended to it.
    pub fn new(base_url: impl Into<String>, token: SecretString) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| FeedError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: normalize_base(base_url.into()),
            token,
        })
    }

    /// Total number of properties matching `filter`.
    pub async fn count(&self, filter: &str) -> Result<u64> {
        let response: ODataResponse<serde_json::Value> = self
            .get(
                "Property",
                &[
                    ("$top", "0".to_string()),
                    ("$count", "true".to_string()),
                    ("$filter", filter.to_string()),
                ],
            )
            .await?;

        response
            .count
            .ok_or_else(|| FeedError::Parse("count not returned in response".to_string()))
    }

    /// One window of properties, newest modification first.
    pub async fn fetch_page<T: DeserializeOwned>(
        &self,
        filter: &str,
        skip: u64,
        top: u64,
    ) -> Result<Vec<T>> {
        tracing::debug!(skip, top, "Fetching property page");

        let response: ODataResponse<T> = self
            .get(
                "Property",
                &[
                    ("$top", top.to_string()),
                    ("$skip", skip.to_string()),
                    ("$orderby", "ModificationTimestamp desc".to_string()),
                    ("$filter", filter.to_string()),
                ],
            )
            .await?;

        Ok(response.value)
    }

    /// Live media records of one listing in the requested sizes.
    pub async fn fetch_media<T: DeserializeOwned>(
        &self,
        listing_key: &str,
        sizes: &[ImageSize],
    ) -> Result<Vec<T>> {
        let response: ODataResponse<T> = self
            .get("Media", &[("$filter", media_filter(listing_key, sizes))])
            .await?;

        Ok(response.value)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        resource: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, resource);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(self.token.expose_secret())
            .query(query)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FeedError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|e| FeedError::Parse(e.to_string()))
    }
}

fn normalize_base(mut base_url: String) -> String {
    if !base_url.ends_with('/') {
        base_url.push('/');
    }
    base_url
}
