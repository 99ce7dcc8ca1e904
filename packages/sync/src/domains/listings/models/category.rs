use feed_client::PropertyTypeMatch;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Listing partition. Each category has its own tables and its own watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Residential,
    Commercial,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::Residential, Category::Commercial];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Residential => "residential",
            Category::Commercial => "commercial",
        }
    }

    pub fn listing_table(&self) -> &'static str {
        match self {
            Category::Residential => "residential_listings",
            Category::Commercial => "commercial_listings",
        }
    }

    pub fn media_table(&self) -> &'static str {
        match self {
            Category::Residential => "residential_media",
            Category::Commercial => "commercial_media",
        }
    }

    /// Watermark row name, e.g. `FEED_RESIDENTIAL`.
    pub fn source_name(&self, feed_name: &str) -> String {
        format!("{}_{}", feed_name, self.as_str()).to_uppercase()
    }

    /// Residential spans several feed property types ("Residential Freehold",
    /// "Residential Condo & Other"), commercial is a single exact value.
    pub fn property_type_match(&self) -> PropertyTypeMatch {
        match self {
            Category::Residential => PropertyTypeMatch::Contains("Residential".to_string()),
            Category::Commercial => PropertyTypeMatch::Equals("Commercial".to_string()),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "residential" => Ok(Category::Residential),
            "commercial" => Ok(Category::Commercial),
            other => Err(format!("unknown category: {}", other)),
        }
    }
}
