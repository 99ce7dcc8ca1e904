//! Listings domain activities
//!
//! One module per pipeline stage. Each stage takes its collaborators through
//! `SyncDeps` and returns counts for the run report.

pub mod enrich_coordinates;
pub mod enrich_media;
pub mod fetch_listings;
pub mod filter_existing;
pub mod persist_listings;
pub mod reconcile_listings;

pub use enrich_coordinates::{enrich_coordinates, CoordinateOutcome};
pub use enrich_media::{enrich_media, MediaOutcome};
pub use fetch_listings::{fetch_listings, listing_filter, FetchOutcome, Truncation};
pub use filter_existing::{filter_existing, verify_keys, Verification};
pub use persist_listings::{persist_listings, PersistOutcome};
pub use reconcile_listings::{reconcile_listings, ReconcileOutcome};
