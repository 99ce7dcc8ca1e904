// Business domains
pub mod listings;
pub mod replication;
pub mod sync;
