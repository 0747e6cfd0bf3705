//! Cumulative operational counters for the client façade.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use noisefs_cache::CacheStats;
use noisefs_pipeline::PipelineReport;
use serde_derive::Serialize;

/// Thread-safe cumulative counters. Updated only when an operation
/// succeeds, so a cancelled call never advances them.
#[derive(Debug, Default)]
pub struct ClientMetrics {
    uploads: AtomicU64,
    downloads: AtomicU64,
    bytes_original: AtomicU64,
    bytes_stored: AtomicU64,
    blocks_reused: AtomicU64,
    blocks_generated: AtomicU64,
    upload_micros: AtomicU64,
    download_micros: AtomicU64,
}

impl ClientMetrics {
    pub(crate) fn record_upload(&self, report: &PipelineReport, elapsed: Duration) {
        self.uploads.fetch_add(1, Ordering::Relaxed);
        self.bytes_original
            .fetch_add(report.bytes_original, Ordering::Relaxed);
        self.bytes_stored
            .fetch_add(report.bytes_stored, Ordering::Relaxed);
        self.blocks_reused
            .fetch_add(report.blocks_reused, Ordering::Relaxed);
        self.blocks_generated
            .fetch_add(report.blocks_generated, Ordering::Relaxed);
        self.upload_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_download(&self, elapsed: Duration) {
        self.downloads.fetch_add(1, Ordering::Relaxed);
        self.download_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, cache: &CacheStats) -> ClientMetricsSnapshot {
        ClientMetricsSnapshot {
            uploads: self.uploads.load(Ordering::Relaxed),
            downloads: self.downloads.load(Ordering::Relaxed),
            bytes_original: self.bytes_original.load(Ordering::Relaxed),
            bytes_stored: self.bytes_stored.load(Ordering::Relaxed),
            blocks_reused: self.blocks_reused.load(Ordering::Relaxed),
            blocks_generated: self.blocks_generated.load(Ordering::Relaxed),
            cache_hits: cache.hits,
            cache_misses: cache.misses,
            cache_hit_rate: cache.hit_rate,
            upload_micros: self.upload_micros.load(Ordering::Relaxed),
            download_micros: self.download_micros.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ClientMetrics`] plus the cache counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct ClientMetricsSnapshot {
    pub uploads: u64,
    pub downloads: u64,
    pub bytes_original: u64,
    pub bytes_stored: u64,
    pub blocks_reused: u64,
    pub blocks_generated: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate: f64,
    /// Aggregate wall-clock time spent in successful uploads.
    pub upload_micros: u64,
    /// Aggregate wall-clock time spent in successful downloads.
    pub download_micros: u64,
}
