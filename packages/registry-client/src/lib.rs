//! Pure REST client for the verification registry.
//!
//! The registry is an OData property API secured with OAuth2
//! client-credentials. It answers two questions for a batch of listing keys:
//! which of them exist, and where they are.
//!
//! The client never stores a token itself. Callers obtain one from a
//! [`TokenCache`] (shared across all concurrent batches) and pass it in.
//!
//! # Example
//!
//! ```rust,ignore
//! use registry_client::{
//!     ClientCredentials, OAuthTokenSource, PropertySelect, RegistryClient, TokenCache,
//! };
//!
//! let client = RegistryClient::new("https://registry.example.com/odata/v1")?;
//! let tokens = TokenCache::new(OAuthTokenSource::new(client.http(), credentials));
//!
//! let token = tokens.token().await?;
//! let found = client
//!     .query_properties(token.secret(), &keys, PropertySelect::KeyOnly)
//!     .await?;
//! ```

pub mod error;
pub mod token;
pub mod types;

pub use error::{AuthError, RegistryError, Result};
pub use token::{
    AccessToken, ClientCredentials, OAuthTokenSource, TokenCache, TokenSource,
    DEFAULT_REFRESH_MARGIN,
};
pub use types::{PropertySelect, RegistryProperty, TokenResponse};

use std::time::Duration;
use types::ODataResponse;

const USER_AGENT: &str = concat!("listings-sync/", env!("CARGO_PKG_VERSION"));

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub struct RegistryClient {
    client: reqwest::Client,
    api_url: String,
}

impl RegistryClient {
    pub fn new(api_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| RegistryError::Network(e.to_string()))?;

        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Underlying HTTP client, shared with the token source.
    pub fn http(&self) -> reqwest::Client {
        self.client.clone()
    }

    /// Look up a batch of listing keys. Keys unknown to the registry are
    /// simply absent from the result.
    pub async fn query_properties(
        &self,
        token: &str,
        listing_keys: &[String],
        select: PropertySelect,
    ) -> Result<Vec<RegistryProperty>> {
        if listing_keys.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/Property", self.api_url);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/json")
            .query(&[
                ("$select", select.as_str().to_string()),
                ("$filter", listing_id_filter(listing_keys)),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RegistryError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let body = resp.text().await?;
        let parsed: ODataResponse<RegistryProperty> =
            serde_json::from_str(&body).map_err(|e| RegistryError::Parse(e.to_string()))?;

        tracing::trace!(
            requested = listing_keys.len(),
            returned = parsed.value.len(),
            "Registry batch answered"
        );
        Ok(parsed.value)
    }
}

/// `ListingId in ('k1','k2',...)`
pub fn listing_id_filter(listing_keys: &[String]) -> String {
    let quoted: Vec<String> = listing_keys
        .iter()
        .map(|key| format!("'{}'", key.replace('\'', "''")))
        .collect();
    format!("ListingId in ({})", quoted.join(","))
}
