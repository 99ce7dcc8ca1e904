use serde::{Deserialize, Serialize};

/// OAuth2 client-credentials form body.
#[derive(Debug, Serialize)]
pub(crate) struct TokenRequest<'a> {
    pub client_id: &'a str,
    pub client_secret: &'a str,
    pub grant_type: &'a str,
    pub scope: &'a str,
}

/// Token endpoint response.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Lifetime in seconds
    pub expires_in: u64,
}

/// OData collection envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct ODataResponse<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
}

/// A property as known to the registry, restricted to the selected fields.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RegistryProperty {
    #[serde(rename = "ListingId")]
    pub listing_id: String,
    #[serde(rename = "Latitude", default)]
    pub latitude: Option<f64>,
    #[serde(rename = "Longitude", default)]
    pub longitude: Option<f64>,
}

/// Field sets passed as `$select`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertySelect {
    /// Existence checks only need the key
    KeyOnly,
    /// Key plus coordinates
    WithCoordinates,
}

impl PropertySelect {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertySelect::KeyOnly => "ListingId",
            PropertySelect::WithCoordinates => "ListingId,Latitude,Longitude",
        }
    }
}
