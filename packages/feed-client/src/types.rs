use serde::Deserialize;

/// OData collection envelope. Count queries also carry `@odata.count`.
#[derive(Debug, Clone, Deserialize)]
pub struct ODataResponse<T> {
    #[serde(rename = "@odata.count", default)]
    pub count: Option<u64>,
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
}

/// Image sizes requested from the media endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSize {
    Thumbnail,
    Medium,
    Large,
}

impl ImageSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageSize::Thumbnail => "Thumbnail",
            ImageSize::Medium => "Medium",
            ImageSize::Large => "Large",
        }
    }
}

/// Sizes the sync stores for each listing.
pub const DEFAULT_IMAGE_SIZES: &[ImageSize] = &[ImageSize::Thumbnail, ImageSize::Medium];
