//! Pipeline error taxonomy.
//!
//! Only some of these stop a category run. The orchestrator decides: see
//! [`SyncError::is_fatal`].

use registry_client::{AuthError, RegistryError};
use thiserror::Error;

use crate::domains::listings::models::Category;

pub type SyncResult<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Secondary registry credential exchange failed
    #[error("registry authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// Primary feed count or page query failed
    #[error("feed fetch failed for {category}: {message}")]
    Fetch { category: Category, message: String },

    /// Registry batch query failed (batch dropped)
    #[error("verification batch failed: {0}")]
    Verification(String),

    /// Media or coordinate lookup failed (field left unset)
    #[error("enrichment failed: {0}")]
    Enrichment(String),

    /// Transactional write failed
    #[error("persistence failed for {category}: {message}")]
    Persistence { category: Category, message: String },

    /// Stale-key diff or delete failed
    #[error("reconciliation failed for {category}: {message}")]
    Reconciliation { category: Category, message: String },

    /// Watermark could not be read or written
    #[error("watermark {source_name}: {message}")]
    Watermark { source_name: String, message: String },

    /// Run cancelled before it could finish
    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Errors that abort the category run and hold its watermark.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::Auth(_)
                | SyncError::Fetch { .. }
                | SyncError::Persistence { .. }
                | SyncError::Watermark { .. }
                | SyncError::Cancelled
        )
    }

    /// Split a registry failure into the fatal auth case and a batch-level
    /// error of the given kind.
    pub(crate) fn from_registry(
        err: RegistryError,
        batch_error: impl FnOnce(String) -> SyncError,
    ) -> SyncError {
        match err {
            RegistryError::Auth(auth) => SyncError::Auth(auth),
            other => batch_error(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_auth_maps_to_auth() {
        let err = SyncError::from_registry(
            RegistryError::Auth(AuthError::Network("down".into())),
            SyncError::Verification,
        );
        assert!(matches!(err, SyncError::Auth(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn registry_api_error_is_batch_level() {
        let err = SyncError::from_registry(
            RegistryError::Api {
                status: 503,
                message: "busy".into(),
            },
            SyncError::Verification,
        );
        assert!(matches!(err, SyncError::Verification(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn reconciliation_is_not_fatal() {
        let err = SyncError::Reconciliation {
            category: Category::Residential,
            message: "deadlock".into(),
        };
        assert!(!err.is_fatal());
    }
}
