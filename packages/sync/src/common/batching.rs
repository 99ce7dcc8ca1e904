//! Bounded-parallel batch execution shared by every concurrent stage.
//!
//! Items are split into fixed-size batches and handed to a worker, with at most
//! `max_parallel` batches outstanding. A batch keeps its slot for `pause` after
//! the worker finishes, which paces requests against the upstream rate limit.
//! [`run_batches`] returns only once every admitted batch has settled, so a
//! stage never overlaps with the next one.
//!
//! Workers never touch shared state: each result comes back next to the items
//! it was computed for and the caller merges sequentially.

use futures::stream::{self, StreamExt};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A batch the worker finished, with the items it was given.
#[derive(Debug)]
pub struct BatchOutcome<T, R> {
    pub items: Vec<T>,
    pub result: R,
}

#[derive(Debug)]
pub struct BatchReport<T, R> {
    /// Finished batches, in completion order.
    pub completed: Vec<BatchOutcome<T, R>>,
    /// Batches never started, or abandoned mid-flight, because of cancellation.
    pub not_run: Vec<Vec<T>>,
}

impl<T, R> BatchReport<T, R> {
    pub fn batches_total(&self) -> usize {
        self.completed.len() + self.not_run.len()
    }

    pub fn was_cancelled(&self) -> bool {
        !self.not_run.is_empty()
    }
}

enum Settled<T, R> {
    Done(BatchOutcome<T, R>),
    NotRun(Vec<T>),
}

/// Split `items` into batches and run `worker` over them with bounded
/// parallelism.
pub async fn run_batches<T, R, F, Fut>(
    items: Vec<T>,
    batch_size: usize,
    max_parallel: usize,
    pause: Duration,
    cancel: &CancellationToken,
    worker: F,
) -> BatchReport<T, R>
where
    T: Clone,
    F: Fn(Vec<T>) -> Fut,
    Fut: Future<Output = R>,
{
    let batches = into_batches(items, batch_size);
    let worker = &worker;

    let settled: Vec<Settled<T, R>> = stream::iter(batches)
        .map(|batch| async move {
            // buffer_unordered only polls a future once it has a free slot, so
            // this check is the admission point
            if cancel.is_cancelled() {
                return Settled::NotRun(batch);
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Settled::NotRun(batch),
                result = worker(batch.clone()) => result,
            };

            if !pause.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(pause) => {}
                }
            }

            Settled::Done(BatchOutcome {
                items: batch,
                result,
            })
        })
        .buffer_unordered(max_parallel.max(1))
        .collect()
        .await;

    let mut report = BatchReport {
        completed: Vec::new(),
        not_run: Vec::new(),
    };
    for outcome in settled {
        match outcome {
            Settled::Done(done) => report.completed.push(done),
            Settled::NotRun(batch) => report.not_run.push(batch),
        }
    }
    report
}

fn into_batches<T>(items: Vec<T>, batch_size: usize) -> Vec<Vec<T>> {
    let batch_size = batch_size.max(1);
    let mut batches = Vec::with_capacity(items.len().div_ceil(batch_size));
    let mut iter = items.into_iter().peekable();
    while iter.peek().is_some() {
        batches.push(iter.by_ref().take(batch_size).collect());
    }
    batches
}
