//! Core-visible configuration.
//!
//! Every field has a sane default so a `Config::default()` (or a JSON file
//! with any subset of fields) is always valid. Configuration is passed into
//! constructors by value; there is no global mutable configuration.

use serde_derive::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub workers: WorkerConfig,
    pub pipeline: PipelineConfig,
}

/// Budget and policy knobs for the block cache.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Upper bound on the summed block lengths held by the cache.
    pub byte_budget: u64,
    /// Upper bound on the number of cached entries.
    pub entry_budget: usize,
    pub weights: EvictionWeights,
    /// Divisor applied to a randomizer entry's eviction score, keeping the
    /// randomizer pool resident longer than plain data blocks.
    pub randomizer_retention_bonus: f64,
    /// How many recently issued randomizer pairs to remember when enforcing
    /// pair diversity.
    pub recent_pair_history: usize,
}

/// Relative weight of recency vs popularity in the eviction score.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct EvictionWeights {
    pub recency: f64,
    pub popularity: f64,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of concurrently admitted work units. Defaults to the host's
    /// logical CPU count.
    pub count: usize,
    /// Submission queue bound for the tracked pool. Defaults to `2 * count`.
    pub queue_size: usize,
    /// Grace period for draining in-flight tasks on shutdown, in seconds.
    pub shutdown_timeout_secs: u64,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Split granularity for uploaded files, in bytes.
    pub block_size: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            byte_budget: 64 * 1024 * 1024,
            entry_budget: 4096,
            weights: EvictionWeights::default(),
            randomizer_retention_bonus: 2.0,
            recent_pair_history: 32,
        }
    }
}

impl Default for EvictionWeights {
    fn default() -> Self {
        EvictionWeights {
            recency: 0.3,
            popularity: 0.7,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let count = default_worker_count();
        WorkerConfig {
            count,
            queue_size: 2 * count,
            shutdown_timeout_secs: 30,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            block_size: 128 * 1024,
        }
    }
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl WorkerConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Errors raised while loading configuration from disk.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl Config {
    /// Loads configuration from a JSON file; omitted fields take their
    /// defaults.
    pub fn from_json_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the handful of fields a zero value would render meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.block_size == 0 {
            return Err(ConfigError::Invalid("pipeline.block_size is zero".into()));
        }
        if self.workers.count == 0 {
            return Err(ConfigError::Invalid("workers.count is zero".into()));
        }
        if self.cache.byte_budget == 0 && self.cache.entry_budget == 0 {
            return Err(ConfigError::Invalid(
                "cache has neither a byte nor an entry budget".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pipeline.block_size, 128 * 1024);
        assert_eq!(config.workers.queue_size, 2 * config.workers.count);
        assert_eq!(config.workers.shutdown_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn omitted_json_fields_take_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"pipeline": {"block_size": 4096}}"#).unwrap();
        assert_eq!(config.pipeline.block_size, 4096);
        assert_eq!(config.cache.entry_budget, 4096);
        assert_eq!(config.cache.weights.popularity, 0.7);
    }

    #[test]
    fn zero_block_size_is_rejected() {
        let config: Config =
            serde_json::from_str(r#"{"pipeline": {"block_size": 0}}"#).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
