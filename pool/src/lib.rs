//! Contains the worker pools that execute noisefs XOR, store, retrieve and
//! randomizer-generation batches in parallel.
//!
//! Two variants are provided behind a single [`WorkerPool`] trait:
//!
//! * [`SemaphorePool`] — the performance path. A counting semaphore admits
//!   at most `workers.count` units at once; XOR batches run on the rayon
//!   thread pool.
//! * [`TrackedPool`] — the observability path. A long-lived pool with an
//!   explicit start/shutdown lifecycle, a bounded task queue, per-task
//!   results in a stream, live statistics and a periodic progress callback.
//!
//! Both preserve result order matching submission order, turn a worker
//! panic into a typed failure for that task only, and honor cancellation
//! tokens: unadmitted units abort immediately, admitted units exit at their
//! next suspension point.

use std::future::Future;

use noisefs_types::{Address, Block, Result};
use tokio_util::sync::CancellationToken;

pub mod semaphore;
pub mod task;
pub mod tracked;

pub use semaphore::SemaphorePool;
pub use task::{PoolStats, PoolStatsSnapshot, Task, TaskKind, TaskResult, TaskValue, TaskWork};
pub use tracked::{ProgressFn, TrackedPool};

/// Ordered results of one batch. `results[i]` corresponds to submission
/// `i`; `first_error` is the position of the earliest failure so callers
/// can selectively retry.
#[derive(Debug)]
pub struct Batch<T> {
    pub results: Vec<Result<T>>,
    pub first_error: Option<usize>,
}

impl<T> Batch<T> {
    pub fn from_results(results: Vec<Result<T>>) -> Self {
        let first_error = results.iter().position(|r| r.is_err());
        Batch {
            results,
            first_error,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.first_error.is_none()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Unwraps every result, surfacing the first error if any task failed.
    pub fn into_values(self) -> Result<Vec<T>> {
        let mut values = Vec::with_capacity(self.results.len());
        for result in self.results {
            values.push(result?);
        }
        Ok(values)
    }
}

/// The batched operations both pool variants provide. Callers pick a pool
/// for its workload profile and swap freely without code changes.
pub trait WorkerPool: Send + Sync {
    /// XORs `data[i]` with `rand1[i]` and `rand2[i]` for every `i`,
    /// returning the anonymized blocks in input order.
    fn xor_batch(
        &self,
        data: Vec<Block>,
        rand1: Vec<Block>,
        rand2: Vec<Block>,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<Batch<Block>>> + Send;

    /// Persists every block through the gateway, returning addresses in
    /// input order.
    fn store_batch(
        &self,
        blocks: Vec<Block>,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<Batch<Address>>> + Send;

    /// Fetches every address through the gateway. Retrieved bytes that no
    /// longer hash to the requested address fail that position with
    /// `BlockUnavailable`.
    fn retrieve_batch(
        &self,
        addresses: Vec<Address>,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<Batch<Block>>> + Send;

    /// Draws `count` random blocks of `size` bytes from the entropy source.
    fn generate_batch(
        &self,
        count: usize,
        size: usize,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<Batch<Block>>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_records_first_error_position() {
        let batch: Batch<u32> = Batch::from_results(vec![
            Ok(1),
            Err(noisefs_types::NoiseError::Cancelled),
            Err(noisefs_types::NoiseError::EmptyBlock),
            Ok(4),
        ]);
        assert_eq!(batch.first_error, Some(1));
        assert!(!batch.is_ok());
        assert!(batch.into_values().is_err());
    }

    #[test]
    fn clean_batch_unwraps_in_order() {
        let batch: Batch<u32> = Batch::from_results(vec![Ok(1), Ok(2), Ok(3)]);
        assert!(batch.is_ok());
        assert_eq!(batch.into_values().unwrap(), vec![1, 2, 3]);
    }
}
