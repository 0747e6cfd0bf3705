//! Generation of cryptographically random blocks.
//!
//! The privacy property of the stored blocks (indistinguishable from random
//! bytes) requires at least one XOR operand per triple that an observer
//! cannot predict, so randomizers are always drawn from the operating
//! system's CSPRNG.

use noisefs_types::{Block, NoiseError, Result};
use rand::rngs::OsRng;
use rand::RngCore;

/// A handle to the system entropy source, sized per request.
///
/// Stateless and safe to invoke from any number of threads concurrently.
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomizerSource;

impl RandomizerSource {
    pub fn new() -> Self {
        RandomizerSource
    }

    /// Returns a freshly generated block of `size` uniformly random bytes.
    /// Fails only when the system entropy source cannot produce bytes.
    pub fn generate(&self, size: usize) -> Result<Block> {
        if size == 0 {
            return Err(NoiseError::EmptyBlock);
        }
        let mut bytes = vec![0u8; size];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| NoiseError::EntropyUnavailable(e.to_string()))?;
        Block::new(bytes)
    }
}
