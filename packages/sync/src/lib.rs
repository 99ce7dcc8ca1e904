// Listings Sync - Core
//
// Replicates real-estate listings from the primary feed into Postgres,
// verified and geolocated against the secondary registry.
//
// Pipeline stages live in domains/listings/activities, orchestration in
// domains/sync, infrastructure behind traits in kernel/.

pub mod common;
pub mod config;
pub mod domains;
pub mod error;
pub mod kernel;

pub use config::*;
pub use error::{SyncError, SyncResult};
