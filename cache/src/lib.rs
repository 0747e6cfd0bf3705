//! Contains the bounded block cache and randomizer pool (cached noisefs
//! data) that facilitate anonymization operations.
//!
//! The cache maps content addresses to blocks, tracks per-entry popularity
//! and recency, and evicts with a hybrid score that keeps the randomizer
//! pool resident for as long as possible. The same structure implements the
//! randomizer pair selection policy used by the anonymization pipeline.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use noisefs_types::config::CacheConfig;
use noisefs_types::{Address, Block, NoiseError, Result};

pub mod entry;
pub mod randomizer;
pub mod stats;

pub use entry::EntryKind;
pub use randomizer::RandomizerSource;
pub use stats::CacheStats;

use entry::CacheEntry;

/// Steady-state floor of distinct randomizer addresses per active block
/// size. The pool is replenished to this level before pair selection.
pub const MIN_RANDOMIZER_POOL: usize = 3;

/// One selected randomizer: its address, the shared block bytes, and whether
/// this very selection had to fabricate it.
#[derive(Clone, Debug)]
pub struct RandomizerHandle {
    pub address: Address,
    pub block: Arc<Block>,
    pub freshly_generated: bool,
}

/// Bounded in-memory mapping from address to block.
///
/// Thread safe: a single mutex guards the index while the hit/miss/eviction
/// counters are atomics, so `stats()` stays cheap. The cache performs no
/// gateway I/O; no lock is ever held across a suspension point.
pub struct BlockCache {
    inner: Mutex<CacheInner>,
    config: CacheConfig,
    source: RandomizerSource,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

struct CacheInner {
    entries: HashMap<Address, CacheEntry>,
    size_bytes: u64,
    /// Recently issued randomizer pairs, normalized to (low, high) address
    /// order, bounded by `recent_pair_history`.
    recent_pairs: VecDeque<(Address, Address)>,
}

impl BlockCache {
    pub fn new(config: CacheConfig, source: RandomizerSource) -> Self {
        BlockCache {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                size_bytes: 0,
                recent_pairs: VecDeque::new(),
            }),
            config,
            source,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Inserts `block` under its content address, or refreshes `last_used`
    /// if the address is already present. Insertion itself is not a hit and
    /// does not touch popularity. Fails with `ResourceExceeded` when a
    /// single block is larger than the whole byte budget.
    pub fn store(&self, block: Block, kind: EntryKind) -> Result<Address> {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        self.insert_entry(&mut inner, block, kind)
    }

    /// Returns the cached block, counting a hit and bumping its popularity;
    /// counts a miss when the address is absent.
    pub fn get(&self, address: &Address) -> Option<Arc<Block>> {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        match inner.entries.get_mut(address) {
            Some(entry) => {
                entry.popularity += 1;
                entry.last_used = Instant::now();
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(Arc::clone(&entry.block))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Non-mutating membership test; affects neither counters nor metadata.
    pub fn has(&self, address: &Address) -> bool {
        let inner = self.inner.lock().expect("cache mutex poisoned");
        inner.entries.contains_key(address)
    }

    /// Returns two distinct randomizer blocks of `block_size` bytes, biased
    /// toward higher popularity while avoiding recently issued pairs.
    ///
    /// The pool is replenished from the randomizer source up to
    /// [`MIN_RANDOMIZER_POOL`] first, so selection always has candidates to
    /// diversify over. The two returned addresses are never equal.
    pub fn pick_randomizer_pair(
        &self,
        block_size: usize,
    ) -> Result<(RandomizerHandle, RandomizerHandle)> {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        let mut fresh: Vec<Address> = Vec::new();

        // Replenish the pool to its floor before selection can proceed
        for _ in 0..MIN_RANDOMIZER_POOL {
            if count_randomizers(&inner, block_size) >= MIN_RANDOMIZER_POOL {
                break;
            }
            let block = self.source.generate(block_size)?;
            let address = self.insert_entry(&mut inner, block, EntryKind::Randomizer)?;
            fresh.push(address);
        }

        // Rank candidates by popularity, tie-broken by address ordering
        let mut candidates: Vec<(u64, Address)> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.kind == EntryKind::Randomizer && e.block.len() == block_size)
            .map(|(a, e)| (e.popularity, *a))
            .collect();
        candidates.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        if candidates.len() < 2 {
            return Err(NoiseError::resource_exceeded(format!(
                "cache budget cannot hold two {block_size} byte randomizers"
            )));
        }

        // Walk ranked pairs and take the first one not issued recently
        let mut chosen: Option<(Address, Address)> = None;
        'ranked: for i in 0..candidates.len() {
            for j in i + 1..candidates.len() {
                let pair = normalize_pair(candidates[i].1, candidates[j].1);
                if !inner.recent_pairs.contains(&pair) {
                    chosen = Some((candidates[i].1, candidates[j].1));
                    break 'ranked;
                }
            }
        }
        // Every pair was issued recently; re-issue the least recent one so
        // repeated selections keep rotating instead of pinning one pair
        let (first, second) = chosen
            .or_else(|| {
                let live: Vec<Address> = candidates.iter().map(|(_, a)| *a).collect();
                inner
                    .recent_pairs
                    .iter()
                    .find(|(a, b)| live.contains(a) && live.contains(b))
                    .copied()
            })
            .unwrap_or((candidates[0].1, candidates[1].1));

        if self.config.recent_pair_history > 0 {
            let pair = normalize_pair(first, second);
            inner.recent_pairs.retain(|p| p != &pair);
            inner.recent_pairs.push_back(pair);
            while inner.recent_pairs.len() > self.config.recent_pair_history {
                inner.recent_pairs.pop_front();
            }
        }

        let first_handle = self.issue_handle(&mut inner, first, &fresh);
        let second_handle = self.issue_handle(&mut inner, second, &fresh);
        Ok((first_handle, second_handle))
    }

    /// Addresses currently held in the randomizer pool for `block_size`.
    /// Used by the pipeline to attribute reuse across an upload.
    pub fn randomizer_addresses(&self, block_size: usize) -> Vec<Address> {
        let inner = self.inner.lock().expect("cache mutex poisoned");
        inner
            .entries
            .iter()
            .filter(|(_, e)| e.kind == EntryKind::Randomizer && e.block.len() == block_size)
            .map(|(a, _)| *a)
            .collect()
    }

    pub fn stats(&self) -> CacheStats {
        let (size_bytes, size_entries) = {
            let inner = self.inner.lock().expect("cache mutex poisoned");
            (inner.size_bytes, inner.entries.len())
        };
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        CacheStats {
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            size_bytes,
            size_entries,
            hit_rate: CacheStats::hit_rate_of(hits, misses),
        }
    }

    //==========================================================================
    // Internals
    //--------------------------------------------------------------------------

    fn issue_handle(
        &self,
        inner: &mut CacheInner,
        address: Address,
        fresh: &[Address],
    ) -> RandomizerHandle {
        let entry = inner
            .entries
            .get_mut(&address)
            .expect("selected randomizer must be cached");
        entry.popularity += 1;
        entry.last_used = Instant::now();

        let freshly_generated = fresh.contains(&address);
        if freshly_generated {
            self.misses.fetch_add(1, Ordering::Relaxed);
        } else {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }

        RandomizerHandle {
            address,
            block: Arc::clone(&entry.block),
            freshly_generated,
        }
    }

    fn insert_entry(
        &self,
        inner: &mut CacheInner,
        block: Block,
        kind: EntryKind,
    ) -> Result<Address> {
        let address = block.address();
        let size = block.len() as u64;
        if size > self.config.byte_budget {
            return Err(NoiseError::resource_exceeded(format!(
                "{size} byte block exceeds the {} byte cache budget",
                self.config.byte_budget
            )));
        }

        let now = Instant::now();
        if let Some(existing) = inner.entries.get_mut(&address) {
            // Content addressing makes this the same block; refresh only
            existing.last_used = now;
            return Ok(address);
        }

        inner
            .entries
            .insert(address, CacheEntry::new(Arc::new(block), kind, now));
        inner.size_bytes += size;
        self.evict_to_budget(inner, now);
        Ok(address)
    }

    fn evict_to_budget(&self, inner: &mut CacheInner, now: Instant) {
        while inner.size_bytes > self.config.byte_budget
            || inner.entries.len() > self.config.entry_budget
        {
            let Some(victim) = self.select_victim(inner, now) else {
                break;
            };
            if let Some(entry) = inner.entries.remove(&victim) {
                inner.size_bytes -= entry.size();
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Data entries go first, then randomizers whose popularity fell to
    /// zero. Randomizers that have been used are never evicted; eviction is
    /// only ever triggered by an insert, and the inserted entry starts at
    /// popularity zero, so the surviving popular randomizers are always a
    /// subset of a state that already fit the budget.
    fn select_victim(&self, inner: &CacheInner, now: Instant) -> Option<Address> {
        let weights = &self.config.weights;
        let bonus = self.config.randomizer_retention_bonus;

        let highest = |filter: &dyn Fn(&CacheEntry) -> bool| -> Option<Address> {
            inner
                .entries
                .iter()
                .filter(|(_, e)| filter(e))
                .max_by(|(_, a), (_, b)| {
                    a.score(now, weights, bonus)
                        .partial_cmp(&b.score(now, weights, bonus))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .map(|(a, _)| *a)
        };

        if let Some(victim) = highest(&|e| e.kind == EntryKind::Data) {
            return Some(victim);
        }
        highest(&|e| e.kind == EntryKind::Randomizer && e.popularity == 0)
    }
}

fn count_randomizers(inner: &CacheInner, block_size: usize) -> usize {
    inner
        .entries
        .values()
        .filter(|e| e.kind == EntryKind::Randomizer && e.block.len() == block_size)
        .count()
}

fn normalize_pair(a: Address, b: Address) -> (Address, Address) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use noisefs_types::config::CacheConfig;

    fn cache_with(byte_budget: u64, entry_budget: usize) -> BlockCache {
        let config = CacheConfig {
            byte_budget,
            entry_budget,
            ..CacheConfig::default()
        };
        BlockCache::new(config, RandomizerSource::new())
    }

    fn block(tag: u8, len: usize) -> Block {
        Block::new(vec![tag; len]).unwrap()
    }

    #[test]
    fn get_counts_hits_and_misses() {
        let cache = cache_with(1024, 16);
        let addr = cache.store(block(1, 32), EntryKind::Data).unwrap();

        assert!(cache.get(&addr).is_some());
        assert!(cache.get(&Address::of(b"absent")).is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn has_does_not_mutate_counters() {
        let cache = cache_with(1024, 16);
        let addr = cache.store(block(1, 32), EntryKind::Data).unwrap();

        assert!(cache.has(&addr));
        assert!(!cache.has(&Address::of(b"absent")));

        let stats = cache.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
    }

    #[test]
    fn duplicate_store_is_counted_once() {
        let cache = cache_with(1024, 16);
        cache.store(block(1, 32), EntryKind::Data).unwrap();
        cache.store(block(1, 32), EntryKind::Data).unwrap();

        let stats = cache.stats();
        assert_eq!(stats.size_entries, 1);
        assert_eq!(stats.size_bytes, 32);
    }

    #[test]
    fn byte_budget_is_never_exceeded() {
        let cache = cache_with(128, 64);
        for tag in 0..16u8 {
            cache.store(block(tag, 32), EntryKind::Data).unwrap();
            assert!(cache.stats().size_bytes <= 128);
        }
        assert!(cache.stats().evictions > 0);
    }

    #[test]
    fn entry_budget_is_never_exceeded() {
        let cache = cache_with(4096, 4);
        for tag in 0..12u8 {
            cache.store(block(tag, 8), EntryKind::Data).unwrap();
            assert!(cache.stats().size_entries <= 4);
        }
    }

    #[test]
    fn oversized_insert_is_refused_without_flushing() {
        let cache = cache_with(64, 16);
        cache.store(block(1, 32), EntryKind::Data).unwrap();

        let err = cache.store(block(2, 128), EntryKind::Data).unwrap_err();
        assert!(matches!(err, NoiseError::ResourceExceeded { .. }));
        assert_eq!(cache.stats().size_entries, 1);
    }

    #[test]
    fn data_is_evicted_before_randomizers() {
        let cache = cache_with(128, 64);
        let r = cache.store(block(1, 32), EntryKind::Randomizer).unwrap();
        // Popular randomizers must survive data churn
        cache.get(&r);

        for tag in 2..10u8 {
            cache.store(block(tag, 32), EntryKind::Data).unwrap();
        }
        assert!(cache.has(&r));
    }

    #[test]
    fn popular_randomizers_survive_budget_pressure() {
        // Budget exactly fits two randomizers; once both have been used,
        // nothing can displace them
        let cache = cache_with(64, 16);
        let a = cache.store(block(1, 32), EntryKind::Randomizer).unwrap();
        let b = cache.store(block(2, 32), EntryKind::Randomizer).unwrap();
        cache.get(&a);
        cache.get(&b);

        // An incoming data block is the eviction victim, not the pool
        let d = cache.store(block(3, 32), EntryKind::Data).unwrap();
        assert!(cache.has(&a) && cache.has(&b));
        assert!(!cache.has(&d));

        // Same for an incoming unused randomizer
        let c = cache.store(block(4, 32), EntryKind::Randomizer).unwrap();
        assert!(cache.has(&a) && cache.has(&b));
        assert!(!cache.has(&c));

        let stats = cache.stats();
        assert!(stats.size_bytes <= 64);
        assert_eq!(stats.evictions, 2);
    }

    #[test]
    fn pick_replenishes_a_cold_pool() {
        let cache = cache_with(4096, 64);
        let (a, b) = cache.pick_randomizer_pair(64).unwrap();

        assert_ne!(a.address, b.address);
        assert!(a.freshly_generated && b.freshly_generated);
        assert!(cache.stats().size_entries >= 2);
    }

    #[test]
    fn pick_never_returns_equal_addresses() {
        let cache = cache_with(4096, 64);
        for _ in 0..16 {
            let (a, b) = cache.pick_randomizer_pair(32).unwrap();
            assert_ne!(a.address, b.address);
        }
    }

    #[test]
    fn successive_picks_are_diverse() {
        let cache = cache_with(4096, 64);
        let mut pairs = std::collections::HashSet::new();
        for _ in 0..4 {
            let (a, b) = cache.pick_randomizer_pair(32).unwrap();
            pairs.insert(normalize_pair(a.address, b.address));
        }
        // With >= 3 candidates, 4 successive picks must span >= 2 pairs
        assert!(pairs.len() >= 2, "picks were not diverse: {pairs:?}");
    }

    #[test]
    fn warm_pool_serves_reused_randomizers() {
        let cache = cache_with(4096, 64);
        // Warm the pool
        cache.pick_randomizer_pair(32).unwrap();

        let before = cache.stats().size_entries;
        let (a, b) = cache.pick_randomizer_pair(32).unwrap();
        assert!(!a.freshly_generated || !b.freshly_generated);
        assert_eq!(cache.stats().size_entries, before);
    }

    #[test]
    fn pool_is_partitioned_by_block_size() {
        let cache = cache_with(16384, 64);
        let (a, _) = cache.pick_randomizer_pair(32).unwrap();
        let (c, d) = cache.pick_randomizer_pair(64).unwrap();

        assert_eq!(a.block.len(), 32);
        assert_eq!(c.block.len(), 64);
        assert_eq!(d.block.len(), 64);
        assert_ne!(c.address, a.address);
    }
}
