//! Per-category sync run.
//!
//! ```text
//! Fetch → Filter → EnrichMedia → EnrichGeo → Persist → Reconcile → AdvanceWatermark
//! ```
//!
//! Stages run strictly one after another; the concurrent ones finish every
//! batch before the next stage starts. A fatal error stops the category and
//! leaves its watermark where it was. Anything else is recorded as a warning
//! and the run carries on with what it has.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};

use super::report::{CategoryReport, CategoryStatus, SyncRunReport, SyncStage};
use crate::config::{MediaFailurePolicy, SyncSettings};
use crate::domains::listings::activities::{
    enrich_coordinates, enrich_media, fetch_listings, filter_existing, persist_listings,
    reconcile_listings, FetchOutcome, Truncation,
};
use crate::domains::listings::models::Category;
use crate::error::SyncError;
use crate::kernel::SyncDeps;

/// Categories a scheduled run covers. An inactive feed covers none.
pub fn categories_to_sync(settings: &SyncSettings, only: Option<Category>) -> Vec<Category> {
    if !settings.feed_active {
        return Vec::new();
    }
    match only {
        Some(category) => vec![category],
        None if settings.include_commercial => Category::ALL.to_vec(),
        None => vec![Category::Residential],
    }
}

/// Sync each category in turn. A failing category does not stop the next one.
pub async fn sync_all(
    categories: &[Category],
    deps: &SyncDeps,
    cancel: &CancellationToken,
) -> SyncRunReport {
    let started_at = Utc::now();
    let mut reports = Vec::with_capacity(categories.len());

    for &category in categories {
        reports.push(sync_category(category, deps, cancel).await);
    }

    let report = SyncRunReport {
        started_at,
        finished_at: Utc::now(),
        categories: reports,
    };
    info!(
        categories = report.categories.len(),
        failed = report.failed_categories().len(),
        elapsed_secs = (report.finished_at - report.started_at).num_seconds(),
        "Sync run finished"
    );
    report
}

/// Run every stage for one category. Never returns an error: failures are
/// reported in the returned [`CategoryReport`].
pub async fn sync_category(
    category: Category,
    deps: &SyncDeps,
    cancel: &CancellationToken,
) -> CategoryReport {
    let source = category.source_name(&deps.settings.feed_name);
    let span = tracing::info_span!("sync_category", category = %category, source = %source);
    let mut report = CategoryReport::new(category, source, Utc::now());

    async {
        info!("Category sync started");

        if let Err((stage, err)) = run_stages(&mut report, deps, cancel).await {
            error!(stage = %stage, error = %err, "Category sync failed, watermark held");
            report.status = CategoryStatus::Failed {
                stage,
                error: err.to_string(),
            };
        } else if !report.warnings.is_empty() {
            report.status = CategoryStatus::Degraded;
            warn!(warnings = ?report.warnings, "Category sync degraded");
        }
        report.finished_at = Some(Utc::now());

        info!(
            status = ?report.status,
            fetched = report.fetched,
            confirmed = report.confirmed,
            with_media = report.media.with_media,
            located = report.coordinates.located,
            persisted = report.persist.listings_written,
            deleted = report.reconcile.deleted,
            watermark = ?report.watermark_after,
            "Category sync finished"
        );
    }
    .instrument(span)
    .await;

    report
}

async fn run_stages(
    report: &mut CategoryReport,
    deps: &SyncDeps,
    cancel: &CancellationToken,
) -> Result<(), (SyncStage, SyncError)> {
    let category = report.category;
    let at = |stage: SyncStage| move |err: SyncError| (stage, err);

    // Fetch
    let existing = deps
        .store
        .watermark(&report.source)
        .await
        .map_err(|e| SyncError::Watermark {
            source_name: report.source.clone(),
            message: format!("{:#}", e),
        })
        .map_err(at(SyncStage::Fetch))?;
    report.watermark_before = existing;

    let fetch = fetch_listings(category, existing, deps, cancel)
        .await
        .map_err(at(SyncStage::Fetch))?;
    report.fetched = fetch.listings.len();
    report.fetch_truncated = !fetch.is_complete();
    if let Some(truncation) = &fetch.truncation {
        report.warn(describe_truncation(truncation));
    }
    check_cancelled(cancel).map_err(at(SyncStage::Fetch))?;

    let mut floor = FailureFloor::default();
    let fetched_at: HashMap<String, Option<DateTime<Utc>>> = fetch
        .listings
        .iter()
        .map(|l| (l.listing_key.clone(), l.modification_timestamp))
        .collect();

    // Filter
    let FetchOutcome {
        listings,
        max_modified,
        ..
    } = fetch;
    let (mut listings, verification) = filter_existing(listings, deps, cancel)
        .await
        .map_err(at(SyncStage::Filter))?;
    check_cancelled(cancel).map_err(at(SyncStage::Filter))?;
    report.confirmed = listings.len();
    report.verification_batches_dropped = verification.batches_dropped;
    if verification.batches_dropped > 0 {
        report.warn(format!(
            "{} of {} verification batches dropped ({} listings unverified)",
            verification.batches_dropped,
            verification.batches_total,
            verification.unverified.len()
        ));
        for key in &verification.unverified {
            floor.record(fetched_at.get(key).copied().flatten());
        }
    }

    // EnrichMedia
    report.media = enrich_media(&mut listings, deps, cancel).await;
    check_cancelled(cancel).map_err(at(SyncStage::EnrichMedia))?;
    if report.media.lookups_failed > 0 {
        let action = match deps.settings.media_failure_policy {
            MediaFailurePolicy::Clear => "written without media",
            MediaFailurePolicy::KeepStored => "stored media kept",
        };
        report.warn(format!(
            "{} media lookups failed, {}",
            report.media.lookups_failed, action
        ));
    }

    // EnrichGeo
    report.coordinates = enrich_coordinates(&mut listings, deps, cancel)
        .await
        .map_err(at(SyncStage::EnrichGeo))?;
    check_cancelled(cancel).map_err(at(SyncStage::EnrichGeo))?;
    if report.coordinates.batches_failed > 0 {
        report.warn(format!(
            "{} of {} coordinate batches failed",
            report.coordinates.batches_failed, report.coordinates.batches_total
        ));
    }

    // Persist
    report.persist = persist_listings(category, &listings, deps, cancel)
        .await
        .map_err(at(SyncStage::Persist))?;
    if report.persist.is_degraded() {
        report.warn(format!(
            "{} of {} persist batches failed ({} listings)",
            report.persist.batches_failed,
            report.persist.batches_total,
            report.persist.listings_failed
        ));
        floor.merge(report.persist.oldest_failed, report.persist.failed_undated);
    }

    // Reconcile
    let confirmed = verification.confirmed;
    match reconcile_listings(category, &confirmed, deps, cancel).await {
        Ok(outcome) => {
            if outcome.skipped {
                report.warn("stale listing deletion skipped after degraded verification");
            } else if outcome.unverified > 0 {
                report.warn(format!(
                    "{} persisted listings could not be re-verified",
                    outcome.unverified
                ));
            }
            report.reconcile = outcome;
        }
        Err(err) if err.is_fatal() => return Err((SyncStage::Reconcile, err)),
        Err(err) => {
            warn!(error = %err, "Reconciliation failed, persisted listings kept");
            report.warn(err.to_string());
        }
    }

    // AdvanceWatermark
    let target = watermark_target(
        existing,
        report.started_at,
        max_modified,
        report.fetch_truncated,
        &floor,
    );
    match target {
        Some(to) => {
            let stored = deps
                .store
                .advance_watermark(&report.source, to)
                .await
                .map_err(|e| SyncError::Watermark {
                    source_name: report.source.clone(),
                    message: format!("{:#}", e),
                })
                .map_err(at(SyncStage::AdvanceWatermark))?;
            report.watermark_after = Some(stored);
            info!(watermark = %stored, "Watermark advanced");
        }
        None => {
            report.watermark_after = existing;
            report.warn("watermark held so the next run re-reads this window");
        }
    }

    Ok(())
}

fn check_cancelled(cancel: &CancellationToken) -> Result<(), SyncError> {
    if cancel.is_cancelled() {
        Err(SyncError::Cancelled)
    } else {
        Ok(())
    }
}

fn describe_truncation(truncation: &Truncation) -> String {
    match truncation {
        Truncation::PageFailed { skip, error } => {
            format!("pagination stopped at offset {}: {}", skip, error)
        }
        Truncation::Ceiling { total, ceiling } => {
            format!("{} changed listings exceed the {} record ceiling", total, ceiling)
        }
        Truncation::Exhausted { read, expected } => {
            format!("feed ran out after {} of {} changed listings", read, expected)
        }
        Truncation::Cancelled => "pagination cancelled".to_string(),
    }
}

/// Oldest modification time among fetched listings the run failed to verify
/// or write. The watermark must stay below it so they are fetched again.
#[derive(Debug, Default)]
struct FailureFloor {
    oldest: Option<DateTime<Utc>>,
    undated: bool,
}

impl FailureFloor {
    fn record(&mut self, modified: Option<DateTime<Utc>>) {
        match modified {
            Some(ts) => self.oldest = Some(self.oldest.map_or(ts, |o| o.min(ts))),
            None => self.undated = true,
        }
    }

    fn merge(&mut self, oldest: Option<DateTime<Utc>>, undated: bool) {
        if let Some(ts) = oldest {
            self.record(Some(ts));
        }
        self.undated |= undated;
    }
}

/// Where the watermark should move after a run that reached the last stage.
///
/// `None` holds it. A complete fetch moves it to the newest modification
/// time seen, kept just below anything that has to be re-read. An empty fetch
/// keeps the current value, or the run start when there is none.
fn watermark_target(
    existing: Option<DateTime<Utc>>,
    run_started: DateTime<Utc>,
    max_modified: Option<DateTime<Utc>>,
    truncated: bool,
    floor: &FailureFloor,
) -> Option<DateTime<Utc>> {
    if truncated || floor.undated {
        return None;
    }

    let target = max_modified.or(existing).unwrap_or(run_started);
    match floor.oldest {
        // the feed filter is strictly greater-than, Postgres keeps microseconds
        Some(oldest) => Some(target.min(oldest - Duration::microseconds(1))),
        None => Some(target),
    }
}
