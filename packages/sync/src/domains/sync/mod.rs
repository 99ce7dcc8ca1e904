//! Sync orchestration: runs the listing stages per category and reports.

pub mod pipeline;
pub mod report;

pub use pipeline::{categories_to_sync, sync_all, sync_category};
pub use report::{CategoryReport, CategoryStatus, SyncRunReport, SyncStage};
