pub mod batching;

pub use batching::{run_batches, BatchOutcome, BatchReport};
