//! Snapshot counters exposed by the cache.

use serde_derive::Serialize;

/// Point-in-time view of the cache counters. Hit/miss accounting is
/// eventually consistent; a snapshot may lag an in-flight operation.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size_bytes: u64,
    pub size_entries: usize,
    pub hit_rate: f64,
}

impl CacheStats {
    pub(crate) fn hit_rate_of(hits: u64, misses: u64) -> f64 {
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}
