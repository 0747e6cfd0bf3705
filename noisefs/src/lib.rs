//! Privacy-preserving content-addressed block storage overlay.
//!
//! Files are split into fixed-size blocks, each XORed with two
//! cryptographically random "randomizer" blocks before persisting, so every
//! block the backend ever sees is indistinguishable from uniform random
//! bytes and plausibly belongs to many different files. The [`Client`]
//! façade wires together the cache, randomizer pool, worker pool, gateway
//! and pipeline; see the member crates for each collaborator.

use std::io::Read;
use std::sync::Arc;
use std::time::Instant;

use noisefs_cache::{BlockCache, CacheStats, EntryKind, RandomizerHandle, RandomizerSource};
use noisefs_gateway::{BackendGateway, NodeHealth};
use noisefs_pool::{SemaphorePool, WorkerPool};
use noisefs_types::{Address, Block, Config, NoiseError, Result};
use paris::Logger;
use tokio_util::sync::CancellationToken;

pub mod metrics;

pub use metrics::{ClientMetrics, ClientMetricsSnapshot};
pub use noisefs_cache as cache;
pub use noisefs_gateway as gateway;
pub use noisefs_pipeline as pipeline;
pub use noisefs_pool as pool;
pub use noisefs_types as types;

/// The public façade composing the noisefs collaborators.
///
/// `Client` is deliberately thin: the cache, gateway, worker pool and
/// pipeline are independent pieces wired here by composition, and any
/// [`WorkerPool`] implementation can be swapped in via
/// [`Client::with_pool`].
pub struct Client<G, P = SemaphorePool<G>> {
    gateway: Arc<G>,
    cache: Arc<BlockCache>,
    pool: P,
    config: Config,
    metrics: ClientMetrics,
}

impl<G: BackendGateway> Client<G> {
    /// Builds a client with the default semaphore-gated worker pool.
    pub fn new(gateway: Arc<G>, config: Config) -> Result<Self> {
        let source = RandomizerSource::new();
        let pool = SemaphorePool::new(Arc::clone(&gateway), source, config.workers.count);
        Client::with_pool(gateway, config, pool)
    }
}

impl<G: BackendGateway, P: WorkerPool> Client<G, P> {
    /// Builds a client around a caller-supplied worker pool, e.g. a
    /// [`noisefs_pool::TrackedPool`] when per-task observability matters.
    pub fn with_pool(gateway: Arc<G>, config: Config, pool: P) -> Result<Self> {
        config
            .validate()
            .map_err(|e| NoiseError::resource_exceeded(e.to_string()))?;
        let cache = Arc::new(BlockCache::new(
            config.cache.clone(),
            RandomizerSource::new(),
        ));
        Ok(Client {
            gateway,
            cache,
            pool,
            config,
            metrics: ClientMetrics::default(),
        })
    }

    /// Reads `reader` to its end and uploads the bytes, returning the
    /// descriptor address that serves as the file handle.
    pub async fn upload(&self, mut reader: impl Read, filename: &str) -> Result<Address> {
        let mut data = Vec::new();
        reader
            .read_to_end(&mut data)
            .map_err(NoiseError::backend)?;
        self.upload_bytes(&data, filename).await
    }

    pub async fn upload_bytes(&self, data: &[u8], filename: &str) -> Result<Address> {
        self.upload_with_token(data, filename, &CancellationToken::new())
            .await
    }

    /// Cancellable upload. On cancellation the already-stored blocks remain
    /// in the backend (they may be shared with other files); a retry of the
    /// full upload deduplicates through content addressing.
    pub async fn upload_with_token(
        &self,
        data: &[u8],
        filename: &str,
        cancel: &CancellationToken,
    ) -> Result<Address> {
        let started = Instant::now();
        let (address, report) = noisefs_pipeline::upload(
            &self.gateway,
            &self.cache,
            &self.pool,
            self.config.pipeline.block_size,
            filename,
            data,
            cancel,
        )
        .await?;
        self.metrics.record_upload(&report, started.elapsed());
        let mut logger = Logger::new();
        logger.info(format!(
            "uploaded {} ({} bytes, {} reused / {} generated randomizers) as {}",
            filename,
            report.bytes_original,
            report.blocks_reused,
            report.blocks_generated,
            address.to_base64()
        ));
        Ok(address)
    }

    /// Fetches, verifies and reassembles the file behind a descriptor
    /// address. Returns the full bytes or an error; never a partial file.
    pub async fn download(&self, address: Address) -> Result<Vec<u8>> {
        self.download_with_token(address, &CancellationToken::new())
            .await
    }

    pub async fn download_with_token(
        &self,
        address: Address,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let started = Instant::now();
        let (data, descriptor) =
            noisefs_pipeline::download(&self.gateway, &self.pool, address, cancel).await?;
        self.metrics.record_download(started.elapsed());
        let mut logger = Logger::new();
        logger.info(format!(
            "downloaded {} ({} bytes) from {}",
            descriptor.filename(),
            data.len(),
            address.to_base64()
        ));
        Ok(data)
    }

    /// Stores one block through the gateway and memoizes it in the cache.
    /// Used by outer layers (such as a filesystem façade) that manage their
    /// own block structure.
    pub async fn store_block_with_cache(&self, block: Block) -> Result<Address> {
        let address = self.gateway.put(block.clone()).await?;
        let _ = self.cache.store(block, EntryKind::Data);
        Ok(address)
    }

    /// Cache-first retrieval; populates the cache on a gateway fallback.
    pub async fn retrieve_block_with_cache(&self, address: Address) -> Result<Block> {
        if let Some(block) = self.cache.get(&address) {
            return Ok((*block).clone());
        }
        let block = self.gateway.get(address).await?;
        if block.address() != address {
            return Err(NoiseError::BlockUnavailable(address));
        }
        let _ = self.cache.store(block.clone(), EntryKind::Data);
        Ok(block)
    }

    /// Two distinct pooled randomizers of `size` bytes, for callers that
    /// anonymize blocks outside the upload pipeline.
    pub fn select_randomizer_pair(
        &self,
        size: usize,
    ) -> Result<(RandomizerHandle, RandomizerHandle)> {
        self.cache.pick_randomizer_pair(size)
    }

    /// Cumulative counters, with the cache's hit/miss accounting merged in.
    pub fn metrics(&self) -> ClientMetricsSnapshot {
        self.metrics.snapshot(&self.cache.stats())
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub async fn backend_health(&self) -> NodeHealth {
        self.gateway.health().await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The composed backend gateway, for callers that need direct access.
    pub fn gateway(&self) -> &G {
        &self.gateway
    }
}
