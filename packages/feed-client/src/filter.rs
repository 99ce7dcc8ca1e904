//! OData `$filter` builders for the property and media resources.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::types::ImageSize;

/// How the `PropertyType` field is matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyTypeMatch {
    /// `contains(PropertyType, '<value>')`
    Contains(String),
    /// `PropertyType eq '<value>'`
    Equals(String),
}

/// Filter over the `Property` resource.
///
/// ```rust,ignore
/// let filter = PropertyFilter::new(PropertyTypeMatch::Equals("Commercial".into()))
///     .jurisdiction("Ottawa")
///     .modified_after(Some(last_run));
/// let total = client.count(&filter.to_odata()).await?;
/// ```
#[derive(Debug, Clone)]
pub struct PropertyFilter {
    property_type: PropertyTypeMatch,
    status: String,
    jurisdiction: Option<String>,
    modified_after: Option<DateTime<Utc>>,
}

impl PropertyFilter {
    pub fn new(property_type: PropertyTypeMatch) -> Self {
        Self {
            property_type,
            status: "Active".to_string(),
            jurisdiction: None,
            modified_after: None,
        }
    }

    pub fn status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    pub fn jurisdiction(mut self, county: impl Into<String>) -> Self {
        self.jurisdiction = Some(county.into());
        self
    }

    pub fn modified_after(mut self, watermark: Option<DateTime<Utc>>) -> Self {
        self.modified_after = watermark;
        self
    }

    pub fn to_odata(&self) -> String {
        let mut clauses = Vec::with_capacity(4);

        clauses.push(match &self.property_type {
            PropertyTypeMatch::Contains(value) => {
                format!("contains(PropertyType, {})", quote(value))
            }
            PropertyTypeMatch::Equals(value) => format!("PropertyType eq {}", quote(value)),
        });
        clauses.push(format!("StandardStatus eq {}", quote(&self.status)));

        if let Some(county) = &self.jurisdiction {
            clauses.push(format!("CountyOrParish eq {}", quote(county)));
        }

        if let Some(ts) = self.modified_after {
            clauses.push(format!(
                "ModificationTimestamp gt {}",
                ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
            ));
        }

        clauses.join(" and ")
    }
}

/// Filter selecting the live media of one listing in the given sizes.
pub fn media_filter(listing_key: &str, sizes: &[ImageSize]) -> String {
    let mut filter = format!(
        "ResourceRecordKey eq {} and MediaStatus ne 'Deleted'",
        quote(listing_key)
    );

    if !sizes.is_empty() {
        let alternatives: Vec<String> = sizes
            .iter()
            .map(|size| format!("ImageSizeDescription eq '{}'", size.as_str()))
            .collect();
        filter.push_str(&format!(" and ({})", alternatives.join(" or ")));
    }

    filter
}

/// Quote an OData string literal (single quotes doubled).
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
