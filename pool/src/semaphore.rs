//! The semaphore-gated pool: batched parallelism with bounded admission.
//!
//! I/O batches spawn one tokio task per unit and admit at most
//! `worker_count` at once through a counting semaphore; results are awaited
//! in submission order. The CPU-bound XOR batch instead runs on the rayon
//! thread pool, which already spreads work across every core.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use noisefs_cache::RandomizerSource;
use noisefs_gateway::BackendGateway;
use noisefs_types::{Address, Block, NoiseError, Result};
use rayon::prelude::*;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{Batch, WorkerPool};

pub struct SemaphorePool<G> {
    gateway: Arc<G>,
    source: RandomizerSource,
    semaphore: Arc<Semaphore>,
}

impl<G: BackendGateway> SemaphorePool<G> {
    /// Builds a pool admitting at most `worker_count` concurrent units.
    pub fn new(gateway: Arc<G>, source: RandomizerSource, worker_count: usize) -> Self {
        SemaphorePool {
            gateway,
            source,
            semaphore: Arc::new(Semaphore::new(worker_count.max(1))),
        }
    }

    /// Spawns one admission-gated task per unit and awaits the handles in
    /// submission order, so the returned results line up with the inputs.
    async fn run_gated<T, F, Fut>(
        &self,
        count: usize,
        cancel: CancellationToken,
        mut unit: F,
    ) -> Batch<T>
    where
        T: Send + 'static,
        F: FnMut(usize) -> Fut,
        Fut: std::future::Future<Output = Result<T>> + Send + 'static,
    {
        let mut handles: Vec<JoinHandle<Result<T>>> = Vec::with_capacity(count);
        for index in 0..count {
            let semaphore = Arc::clone(&self.semaphore);
            let token = cancel.clone();
            let work = unit(index);
            handles.push(tokio::spawn(async move {
                // Unadmitted units abort as soon as cancellation fires
                let _permit = tokio::select! {
                    _ = token.cancelled() => return Err(NoiseError::Cancelled),
                    permit = semaphore.acquire_owned() => {
                        permit.map_err(|_| NoiseError::Cancelled)?
                    }
                };
                if token.is_cancelled() {
                    return Err(NoiseError::Cancelled);
                }
                work.await
            }));
        }

        let mut results = Vec::with_capacity(count);
        for handle in handles {
            let result = match handle.await {
                Ok(result) => result,
                // A panicked unit fails alone; the rest of the batch runs on
                Err(join_err) => Err(NoiseError::backend(std::io::Error::other(format!(
                    "worker aborted: {join_err}"
                )))),
            };
            results.push(result);
        }
        Batch::from_results(results)
    }
}

impl<G: BackendGateway> WorkerPool for SemaphorePool<G> {
    async fn xor_batch(
        &self,
        data: Vec<Block>,
        rand1: Vec<Block>,
        rand2: Vec<Block>,
        cancel: CancellationToken,
    ) -> Result<Batch<Block>> {
        if data.len() != rand1.len() || data.len() != rand2.len() {
            return Err(NoiseError::SizeMismatch {
                left: data.len(),
                right: rand1.len().min(rand2.len()),
            });
        }
        if cancel.is_cancelled() {
            return Err(NoiseError::Cancelled);
        }

        let token = cancel.clone();
        let results = tokio::task::spawn_blocking(move || {
            data.into_par_iter()
                .zip(rand1.into_par_iter())
                .zip(rand2.into_par_iter())
                .map(|((block, r1), r2)| {
                    if token.is_cancelled() {
                        return Err(NoiseError::Cancelled);
                    }
                    catch_unwind(AssertUnwindSafe(|| block.xor3(&r1, &r2))).unwrap_or_else(
                        |_| {
                            Err(NoiseError::backend(std::io::Error::other(
                                "xor worker panicked",
                            )))
                        },
                    )
                })
                .collect::<Vec<Result<Block>>>()
        })
        .await
        .map_err(|e| NoiseError::backend(std::io::Error::other(format!("xor batch aborted: {e}"))))?;

        Ok(Batch::from_results(results))
    }

    async fn store_batch(
        &self,
        blocks: Vec<Block>,
        cancel: CancellationToken,
    ) -> Result<Batch<Address>> {
        let count = blocks.len();
        let mut blocks = blocks.into_iter();
        let batch = self
            .run_gated(count, cancel, |_| {
                let gateway = Arc::clone(&self.gateway);
                let block = blocks.next().expect("one block per unit");
                async move { gateway.put(block).await }
            })
            .await;
        Ok(batch)
    }

    async fn retrieve_batch(
        &self,
        addresses: Vec<Address>,
        cancel: CancellationToken,
    ) -> Result<Batch<Block>> {
        let count = addresses.len();
        let batch = self
            .run_gated(count, cancel, |index| {
                let gateway = Arc::clone(&self.gateway);
                let address = addresses[index];
                async move {
                    let block = gateway.get(address).await?;
                    // Bytes that no longer hash to the requested address are
                    // as good as missing
                    if block.address() != address {
                        return Err(NoiseError::BlockUnavailable(address));
                    }
                    Ok(block)
                }
            })
            .await;
        Ok(batch)
    }

    async fn generate_batch(
        &self,
        count: usize,
        size: usize,
        cancel: CancellationToken,
    ) -> Result<Batch<Block>> {
        let batch = self
            .run_gated(count, cancel, |_| {
                let source = self.source;
                async move { source.generate(size) }
            })
            .await;
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use noisefs_gateway::MemoryGateway;
    use rand::RngCore;

    fn pool() -> SemaphorePool<MemoryGateway> {
        SemaphorePool::new(Arc::new(MemoryGateway::new()), RandomizerSource::new(), 4)
    }

    fn random_block(len: usize) -> Block {
        let mut bytes = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut bytes);
        Block::new(bytes).unwrap()
    }

    #[tokio::test]
    async fn xor_batch_preserves_order() {
        let pool = pool();
        let data: Vec<Block> = (0..8).map(|_| random_block(64)).collect();
        let rand1: Vec<Block> = (0..8).map(|_| random_block(64)).collect();
        let rand2: Vec<Block> = (0..8).map(|_| random_block(64)).collect();

        let batch = pool
            .xor_batch(
                data.clone(),
                rand1.clone(),
                rand2.clone(),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let blocks = batch.into_values().unwrap();
        for i in 0..8 {
            let expected = data[i].xor3(&rand1[i], &rand2[i]).unwrap();
            assert_eq!(blocks[i], expected);
        }
    }

    #[tokio::test]
    async fn xor_batch_rejects_arity_mismatch() {
        let pool = pool();
        let err = pool
            .xor_batch(
                vec![random_block(64)],
                vec![],
                vec![],
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, NoiseError::SizeMismatch { .. }));
    }

    #[tokio::test]
    async fn size_mismatch_fails_only_its_position() {
        let pool = pool();
        let data = vec![random_block(64), random_block(64)];
        let rand1 = vec![random_block(64), random_block(32)];
        let rand2 = vec![random_block(64), random_block(64)];

        let batch = pool
            .xor_batch(data, rand1, rand2, CancellationToken::new())
            .await
            .unwrap();
        assert!(batch.results[0].is_ok());
        assert!(batch.results[1].is_err());
        assert_eq!(batch.first_error, Some(1));
    }

    #[tokio::test]
    async fn store_then_retrieve_round_trips_in_order() {
        let pool = pool();
        let blocks: Vec<Block> = (0..6).map(|_| random_block(128)).collect();

        let stored = pool
            .store_batch(blocks.clone(), CancellationToken::new())
            .await
            .unwrap();
        let addresses = stored.into_values().unwrap();
        assert_eq!(addresses.len(), 6);

        let retrieved = pool
            .retrieve_batch(addresses.clone(), CancellationToken::new())
            .await
            .unwrap();
        let fetched = retrieved.into_values().unwrap();
        for i in 0..6 {
            assert_eq!(fetched[i], blocks[i]);
            assert_eq!(fetched[i].address(), addresses[i]);
        }
    }

    #[tokio::test]
    async fn retrieve_flags_missing_addresses() {
        let pool = pool();
        let present = random_block(32);
        let missing = Address::of(b"never stored");

        pool.store_batch(vec![present.clone()], CancellationToken::new())
            .await
            .unwrap();
        let batch = pool
            .retrieve_batch(vec![present.address(), missing], CancellationToken::new())
            .await
            .unwrap();

        assert!(batch.results[0].is_ok());
        assert!(matches!(batch.results[1], Err(NoiseError::NotFound(_))));
        assert_eq!(batch.first_error, Some(1));
    }

    #[tokio::test]
    async fn generate_batch_yields_distinct_blocks() {
        let pool = pool();
        let batch = pool
            .generate_batch(4, 64, CancellationToken::new())
            .await
            .unwrap();
        let blocks = batch.into_values().unwrap();

        let mut addresses: Vec<Address> = blocks.iter().map(|b| b.address()).collect();
        addresses.sort();
        addresses.dedup();
        assert_eq!(addresses.len(), 4);
    }

    #[tokio::test]
    async fn cancelled_batch_reports_cancellation() {
        let pool = pool();
        let token = CancellationToken::new();
        token.cancel();

        let batch = pool
            .store_batch(vec![random_block(32)], token)
            .await
            .unwrap();
        assert!(matches!(batch.results[0], Err(NoiseError::Cancelled)));
    }
}
