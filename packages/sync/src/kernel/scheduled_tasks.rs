//! Scheduled sync runs using tokio-cron-scheduler.
//!
//! ```text
//! Scheduler (SYNC_SCHEDULE, default hourly at :05)
//!     │
//!     └─► sync_all(categories)
//!             └─► Fetch → Filter → Enrich → Persist → Reconcile → Watermark
//! ```
//!
//! Runs never overlap: a tick that fires while the previous run is still
//! going is skipped.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;

use crate::domains::listings::models::Category;
use crate::domains::sync::sync_all;
use crate::kernel::SyncDeps;

/// Start the periodic sync job. Cancelling `cancel` aborts the run in flight.
pub async fn start_scheduler(
    schedule: &str,
    categories: Vec<Category>,
    deps: SyncDeps,
    cancel: CancellationToken,
) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    let running = Arc::new(Mutex::new(()));
    let categories = Arc::new(categories);
    let sync_job = Job::new_async(schedule, move |_uuid, _lock| {
        let deps = deps.clone();
        let categories = categories.clone();
        let running = running.clone();
        let cancel = cancel.clone();
        Box::pin(async move {
            let Ok(_guard) = running.try_lock() else {
                tracing::warn!("Previous sync still running, skipping this tick");
                return;
            };
            if cancel.is_cancelled() {
                return;
            }

            let report = sync_all(&categories, &deps, &cancel.child_token()).await;
            if !report.is_success() {
                tracing::error!(
                    failed = ?report.failed_categories(),
                    "Scheduled sync finished with failures"
                );
            }
        })
    })?;

    scheduler.add(sync_job).await?;
    scheduler.start().await?;

    tracing::info!(schedule, "Scheduled sync started");
    Ok(scheduler)
}
