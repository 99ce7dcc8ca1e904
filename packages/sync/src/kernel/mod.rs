//! Kernel module - sync infrastructure and dependencies.

pub mod deps;
pub mod scheduled_tasks;
pub mod stores;
pub mod test_dependencies;
pub mod traits;

pub use deps::{FeedAdapter, RegistryAdapter, SyncDeps};
pub use scheduled_tasks::start_scheduler;
pub use stores::PgListingStore;
pub use test_dependencies::TestDependencies;
pub use traits::*;
