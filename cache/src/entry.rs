//! Cache entry metadata and eviction scoring.

use noisefs_types::block::Block;
use noisefs_types::config::EvictionWeights;
use std::sync::Arc;
use std::time::Instant;

/// What a cached block is used for. Randomizer entries feed the pair
/// selection policy and enjoy stronger retention.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    Data,
    Randomizer,
}

/// One cached block plus its bookkeeping.
///
/// Entries move through `Inserted -> Warm (popularity > 0) -> Cold (aged)
/// -> Evicted`; the Warm/Cold distinction is derived lazily from
/// `popularity` and `last_used` when the eviction score is computed, rather
/// than by a background sweep.
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub(crate) block: Arc<Block>,
    pub(crate) kind: EntryKind,
    /// Monotonic count of lookups and of uses as a randomizer. Only ever
    /// increases between evictions.
    pub(crate) popularity: u64,
    pub(crate) last_used: Instant,
}

impl CacheEntry {
    pub(crate) fn new(block: Arc<Block>, kind: EntryKind, now: Instant) -> Self {
        CacheEntry {
            block,
            kind,
            popularity: 0,
            last_used: now,
        }
    }

    pub(crate) fn size(&self) -> u64 {
        self.block.len() as u64
    }

    /// Eviction score: higher scores are evicted first. Stale entries age
    /// toward eviction while popular entries resist it; randomizer entries
    /// divide their score by the retention bonus.
    pub(crate) fn score(
        &self,
        now: Instant,
        weights: &EvictionWeights,
        randomizer_retention_bonus: f64,
    ) -> f64 {
        let age_secs = now.duration_since(self.last_used).as_secs_f64();
        let mut score =
            weights.recency * age_secs + weights.popularity * (1.0 / (1.0 + self.popularity as f64));
        if self.kind == EntryKind::Randomizer && randomizer_retention_bonus > 1.0 {
            score /= randomizer_retention_bonus;
        }
        score
    }
}
