//! Contains the anonymization pipeline: file splitting, triple XOR against
//! pooled randomizers, and descriptor assembly and reassembly.
//!
//! Upload: split the file, pick two randomizers per data block from the
//! cache, XOR each block with its pair, persist the anonymized blocks and
//! any randomizers the backend does not already hold, then store the
//! descriptor binding it all together. Download is the same graph reversed.
//! Every block that leaves this pipeline for the backend is
//! indistinguishable from uniform random bytes.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use noisefs_cache::{BlockCache, EntryKind, RandomizerHandle};
use noisefs_gateway::BackendGateway;
use noisefs_pool::WorkerPool;
use noisefs_types::{Address, Block, BlockTriple, Descriptor, NoiseError, Result};
use tokio_util::sync::CancellationToken;

pub mod split;

pub use split::{reassemble, split_into_blocks};

/// What one pipeline run did, for the client's cumulative metrics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineReport {
    /// Bytes of the original file.
    pub bytes_original: u64,
    /// Bytes newly persisted in the backend: every anonymized block plus
    /// randomizers the backend did not already hold.
    pub bytes_stored: u64,
    /// Randomizer slots served from the pool as it stood before the run.
    pub blocks_reused: u64,
    /// Randomizer slots filled with blocks created during the run.
    pub blocks_generated: u64,
}

/// Runs the upload path for `data`, returning the descriptor's address —
/// the handle a caller needs to get the file back — and the run's report.
pub async fn upload<G, P>(
    gateway: &Arc<G>,
    cache: &BlockCache,
    pool: &P,
    block_size: u32,
    filename: &str,
    data: &[u8],
    cancel: &CancellationToken,
) -> Result<(Address, PipelineReport)>
where
    G: BackendGateway,
    P: WorkerPool,
{
    if cancel.is_cancelled() {
        return Err(NoiseError::Cancelled);
    }

    let data_blocks = split_into_blocks(data, block_size)?;
    let created_at = unix_now();

    // EARLY OUT: an empty file is a descriptor with no triples
    if data_blocks.is_empty() {
        let descriptor = Descriptor::new(filename, 0, block_size, created_at, Vec::new())?;
        let address = store_descriptor(gateway.as_ref(), &descriptor).await?;
        return Ok((
            address,
            PipelineReport {
                bytes_original: 0,
                ..PipelineReport::default()
            },
        ));
    }

    // The pool as it stood before this run; picks outside this set were
    // fabricated for (or during) the run
    let preexisting: HashSet<Address> =
        cache.randomizer_addresses(block_size as usize).into_iter().collect();

    // Select a randomizer pair per data block
    let mut pairs: Vec<(RandomizerHandle, RandomizerHandle)> =
        Vec::with_capacity(data_blocks.len());
    for _ in 0..data_blocks.len() {
        if cancel.is_cancelled() {
            return Err(NoiseError::Cancelled);
        }
        pairs.push(cache.pick_randomizer_pair(block_size as usize)?);
    }

    let mut blocks_reused = 0u64;
    let mut blocks_generated = 0u64;
    for (first, second) in &pairs {
        for handle in [first, second] {
            if preexisting.contains(&handle.address) {
                blocks_reused += 1;
            } else {
                blocks_generated += 1;
            }
        }
    }

    // Anonymize all data blocks in parallel
    let rand1: Vec<Block> = pairs.iter().map(|(a, _)| (*a.block).clone()).collect();
    let rand2: Vec<Block> = pairs.iter().map(|(_, b)| (*b.block).clone()).collect();
    let anonymized = pool
        .xor_batch(data_blocks, rand1, rand2, cancel.child_token())
        .await?
        .into_values()?;

    // Randomizers only need storing when the backend has never seen them
    let mut missing_randomizers: Vec<Block> = Vec::new();
    let mut checked: HashSet<Address> = HashSet::new();
    for (first, second) in &pairs {
        for handle in [first, second] {
            if !checked.insert(handle.address) {
                continue;
            }
            if cancel.is_cancelled() {
                return Err(NoiseError::Cancelled);
            }
            if !gateway.has(handle.address).await? {
                missing_randomizers.push((*handle.block).clone());
            }
        }
    }

    let anonymized_count = anonymized.len();
    let bytes_stored =
        anonymized_count as u64 * block_size as u64 + total_len(&missing_randomizers);

    // Held back until the stores succeed; a cancelled run must not commit
    // partial results to the cache
    let cache_copies = anonymized.clone();

    let mut to_store = anonymized;
    to_store.extend(missing_randomizers);
    let stored = pool
        .store_batch(to_store, cancel.child_token())
        .await?
        .into_values()?;

    // Memoize the anonymized blocks; a full cache is a miss, not a failure
    for block in cache_copies {
        let _ = cache.store(block, EntryKind::Data);
    }

    let triples: Vec<BlockTriple> = stored[..anonymized_count]
        .iter()
        .zip(&pairs)
        .map(|(data_addr, (first, second))| {
            BlockTriple::new(*data_addr, first.address, second.address)
        })
        .collect::<Result<Vec<BlockTriple>>>()?;

    let descriptor = Descriptor::new(
        filename,
        data.len() as u64,
        block_size,
        created_at,
        triples,
    )?;
    let descriptor_address = store_descriptor(gateway.as_ref(), &descriptor).await?;

    Ok((
        descriptor_address,
        PipelineReport {
            bytes_original: data.len() as u64,
            bytes_stored,
            blocks_reused,
            blocks_generated,
        },
    ))
}

/// Runs the download path for the descriptor stored at `address`,
/// returning the reconstructed file bytes and the descriptor itself.
pub async fn download<G, P>(
    gateway: &Arc<G>,
    pool: &P,
    address: Address,
    cancel: &CancellationToken,
) -> Result<(Vec<u8>, Descriptor)>
where
    G: BackendGateway,
    P: WorkerPool,
{
    if cancel.is_cancelled() {
        return Err(NoiseError::Cancelled);
    }

    let descriptor_block = gateway.get(address).await?;
    if descriptor_block.address() != address {
        return Err(NoiseError::BlockUnavailable(address));
    }
    let descriptor = Descriptor::from_bytes(descriptor_block.bytes())?;

    // EARLY OUT: nothing to retrieve for an empty file
    if descriptor.file_size() == 0 {
        return Ok((Vec::new(), descriptor));
    }

    let data_addrs: Vec<Address> = descriptor.triples().iter().map(|t| t.data).collect();
    let rand1_addrs: Vec<Address> = descriptor.triples().iter().map(|t| t.rand1).collect();
    let rand2_addrs: Vec<Address> = descriptor.triples().iter().map(|t| t.rand2).collect();

    // One parallel fetch for all three legs of every triple; the pool
    // verifies each retrieved block against its requested address
    let n = data_addrs.len();
    let mut all_addrs = data_addrs;
    all_addrs.extend(rand1_addrs);
    all_addrs.extend(rand2_addrs);
    let mut fetched = pool
        .retrieve_batch(all_addrs, cancel.child_token())
        .await?
        .into_values()?;

    let rand2 = fetched.split_off(2 * n);
    let rand1 = fetched.split_off(n);
    let anonymized = fetched;

    let recovered = pool
        .xor_batch(anonymized, rand1, rand2, cancel.child_token())
        .await?
        .into_values()?;

    Ok((reassemble(recovered, descriptor.file_size()), descriptor))
}

/// Serializes the descriptor and persists it as an opaque block; its
/// address is the file handle handed back to the caller.
async fn store_descriptor<G: BackendGateway>(
    gateway: &G,
    descriptor: &Descriptor,
) -> Result<Address> {
    let bytes = descriptor.to_bytes()?;
    gateway.put(Block::new(bytes)?).await
}

/// Seconds since the Unix epoch; clamps a pre-epoch clock to zero.
fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn total_len(blocks: &[Block]) -> u64 {
    blocks.iter().map(|b| b.len() as u64).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use noisefs_cache::RandomizerSource;
    use noisefs_gateway::MemoryGateway;
    use noisefs_pool::SemaphorePool;
    use noisefs_types::config::CacheConfig;
    use rand::RngCore;

    struct Fixture {
        gateway: Arc<MemoryGateway>,
        cache: BlockCache,
        pool: SemaphorePool<MemoryGateway>,
    }

    fn fixture() -> Fixture {
        let gateway = Arc::new(MemoryGateway::new());
        let source = RandomizerSource::new();
        Fixture {
            gateway: Arc::clone(&gateway),
            cache: BlockCache::new(CacheConfig::default(), source),
            pool: SemaphorePool::new(gateway, source, 4),
        }
    }

    async fn round_trip(f: &Fixture, data: &[u8], block_size: u32) -> (Address, PipelineReport) {
        let token = CancellationToken::new();
        let (address, report) = upload(
            &f.gateway,
            &f.cache,
            &f.pool,
            block_size,
            "file.bin",
            data,
            &token,
        )
        .await
        .unwrap();

        let (bytes, _) = download(&f.gateway, &f.pool, address, &token).await.unwrap();
        assert_eq!(bytes, data);
        (address, report)
    }

    #[tokio::test]
    async fn small_file_round_trips_with_three_triples() {
        let f = fixture();
        let data = b"abcdefghijklmnopqrstuvwxyz0123456789!";
        let (address, report) = round_trip(&f, data, 16).await;

        let descriptor_block = f.gateway.get(address).await.unwrap();
        let descriptor = Descriptor::from_bytes(descriptor_block.bytes()).unwrap();
        assert_eq!(descriptor.triples().len(), 3);
        assert_eq!(descriptor.tail_len(), 5);
        assert_eq!(descriptor.file_size(), 37);

        // Cold cache: every randomizer slot was filled during the run
        assert_eq!(report.blocks_reused, 0);
        assert_eq!(report.blocks_generated, 6);
        assert_eq!(report.bytes_original, 37);
    }

    #[tokio::test]
    async fn aligned_file_round_trips_without_special_casing() {
        let f = fixture();
        let data: Vec<u8> = (0..=255u8).cycle().take(1024).collect();
        let (address, _) = round_trip(&f, &data, 256).await;

        let descriptor_block = f.gateway.get(address).await.unwrap();
        let descriptor = Descriptor::from_bytes(descriptor_block.bytes()).unwrap();
        assert_eq!(descriptor.triples().len(), 4);
        assert_eq!(descriptor.tail_len(), 256);
    }

    #[tokio::test]
    async fn empty_file_round_trips_with_no_triples() {
        let f = fixture();
        let (address, report) = round_trip(&f, &[], 128).await;

        let descriptor_block = f.gateway.get(address).await.unwrap();
        let descriptor = Descriptor::from_bytes(descriptor_block.bytes()).unwrap();
        assert_eq!(descriptor.file_size(), 0);
        assert!(descriptor.triples().is_empty());
        assert_eq!(report.bytes_original, 0);
        // Only the descriptor block itself reached the backend
        assert_eq!(f.gateway.len(), 1);
    }

    #[tokio::test]
    async fn every_triple_has_distinct_randomizers() {
        let f = fixture();
        let mut data = vec![0u8; 2048];
        rand::thread_rng().fill_bytes(&mut data);
        let (address, _) = round_trip(&f, &data, 128).await;

        let descriptor_block = f.gateway.get(address).await.unwrap();
        let descriptor = Descriptor::from_bytes(descriptor_block.bytes()).unwrap();
        assert_eq!(descriptor.triples().len(), 16);
        for triple in descriptor.triples() {
            assert_ne!(triple.rand1, triple.rand2);
        }
    }

    #[tokio::test]
    async fn second_upload_reuses_pooled_randomizers() {
        let f = fixture();
        let mut first = vec![0u8; 512];
        let mut second = vec![0u8; 512];
        rand::thread_rng().fill_bytes(&mut first);
        rand::thread_rng().fill_bytes(&mut second);

        let (_, report_a) = round_trip(&f, &first, 128).await;
        assert_eq!(report_a.blocks_reused, 0);

        let (_, report_b) = round_trip(&f, &second, 128).await;
        assert!(
            report_b.blocks_reused >= 2,
            "second upload reused {} randomizers",
            report_b.blocks_reused
        );
        assert!(f.cache.stats().hit_rate > 0.0);
    }

    #[tokio::test]
    async fn stored_blocks_are_deduplicated_across_uploads() {
        let f = fixture();
        let data = vec![7u8; 384];
        round_trip(&f, &data, 128).await;
        let after_first = f.gateway.len();

        // Same content, same pooled randomizers: nothing new except the
        // descriptor timestamp may differ
        round_trip(&f, &data, 128).await;
        assert!(f.gateway.len() <= after_first + 1);
    }

    #[tokio::test]
    async fn corrupted_data_block_fails_the_download() {
        let f = fixture();
        let data = vec![42u8; 300];
        let (address, _) = round_trip(&f, &data, 128).await;

        let descriptor_block = f.gateway.get(address).await.unwrap();
        let descriptor = Descriptor::from_bytes(descriptor_block.bytes()).unwrap();
        let victim = descriptor.triples()[1].data;
        f.gateway.inject(victim, b"tampered bytes".to_vec());

        let err = download(&f.gateway, &f.pool, address, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, NoiseError::BlockUnavailable(addr) if addr == victim));
    }

    #[tokio::test]
    async fn missing_randomizer_fails_the_download() {
        let f = fixture();
        let data = vec![9u8; 300];
        let (address, _) = round_trip(&f, &data, 128).await;

        let descriptor_block = f.gateway.get(address).await.unwrap();
        let descriptor = Descriptor::from_bytes(descriptor_block.bytes()).unwrap();

        // Rebuild the backend without one randomizer
        let missing = descriptor.triples()[0].rand1;
        let fresh = MemoryGateway::new();
        for triple in descriptor.triples() {
            for addr in [triple.data, triple.rand1, triple.rand2] {
                if addr == missing {
                    continue;
                }
                if let Ok(block) = f.gateway.get(addr).await {
                    fresh.put(block).await.unwrap();
                }
            }
        }
        fresh.put(descriptor_block).await.unwrap();

        let fresh = Arc::new(fresh);
        let pool = SemaphorePool::new(Arc::clone(&fresh), RandomizerSource::new(), 4);
        let err = download(&fresh, &pool, address, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, NoiseError::NotFound(_)));
    }

    #[tokio::test]
    async fn cancelled_upload_returns_cancelled() {
        let f = fixture();
        let token = CancellationToken::new();
        token.cancel();

        let err = upload(
            &f.gateway,
            &f.cache,
            &f.pool,
            128,
            "f",
            &[1, 2, 3],
            &token,
        )
        .await
        .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(f.gateway.len(), 0);
    }

    #[tokio::test]
    async fn garbage_descriptor_bytes_are_rejected() {
        let f = fixture();
        let junk = Block::new(vec![0xFF; 64]).unwrap();
        let address = f.gateway.put(junk).await.unwrap();

        let err = download(&f.gateway, &f.pool, address, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, NoiseError::InvalidDescriptor { .. }));
    }
}
