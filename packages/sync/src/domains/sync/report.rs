use chrono::{DateTime, Utc};
use std::fmt;

use crate::domains::listings::activities::{
    CoordinateOutcome, MediaOutcome, PersistOutcome, ReconcileOutcome,
};
use crate::domains::listings::models::Category;

/// Pipeline stages in the order a category run visits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncStage {
    Fetch,
    Filter,
    EnrichMedia,
    EnrichGeo,
    Persist,
    Reconcile,
    AdvanceWatermark,
}

impl SyncStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStage::Fetch => "fetch",
            SyncStage::Filter => "filter",
            SyncStage::EnrichMedia => "enrich_media",
            SyncStage::EnrichGeo => "enrich_geo",
            SyncStage::Persist => "persist",
            SyncStage::Reconcile => "reconcile",
            SyncStage::AdvanceWatermark => "advance_watermark",
        }
    }
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategoryStatus {
    /// Every stage ran without losing anything
    Completed,
    /// Finished, but some batches or lookups failed
    Degraded,
    /// Stopped at `stage`; the watermark was not advanced
    Failed { stage: SyncStage, error: String },
}

/// What one category run did.
#[derive(Debug, Clone)]
pub struct CategoryReport {
    pub category: Category,
    /// Watermark row name
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: CategoryStatus,
    pub fetched: usize,
    pub fetch_truncated: bool,
    pub confirmed: usize,
    pub verification_batches_dropped: usize,
    pub media: MediaOutcome,
    pub coordinates: CoordinateOutcome,
    pub persist: PersistOutcome,
    pub reconcile: ReconcileOutcome,
    pub watermark_before: Option<DateTime<Utc>>,
    pub watermark_after: Option<DateTime<Utc>>,
    /// Human-readable reasons the run was degraded
    pub warnings: Vec<String>,
}

impl CategoryReport {
    pub fn new(category: Category, source: String, started_at: DateTime<Utc>) -> Self {
        Self {
            category,
            source,
            started_at,
            finished_at: None,
            status: CategoryStatus::Completed,
            fetched: 0,
            fetch_truncated: false,
            confirmed: 0,
            verification_batches_dropped: 0,
            media: MediaOutcome::default(),
            coordinates: CoordinateOutcome::default(),
            persist: PersistOutcome::default(),
            reconcile: ReconcileOutcome::default(),
            watermark_before: None,
            watermark_after: None,
            warnings: Vec::new(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, CategoryStatus::Failed { .. })
    }

    pub(crate) fn warn(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }
}

/// Every category of one run, in the order they ran.
#[derive(Debug, Clone)]
pub struct SyncRunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub categories: Vec<CategoryReport>,
}

impl SyncRunReport {
    /// No category failed. Degraded categories still count as success.
    pub fn is_success(&self) -> bool {
        !self.categories.iter().any(CategoryReport::is_failed)
    }

    pub fn failed_categories(&self) -> Vec<Category> {
        self.categories
            .iter()
            .filter(|c| c.is_failed())
            .map(|c| c.category)
            .collect()
    }
}
