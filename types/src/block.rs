//! The fixed-size byte container that is the unit of storage and XOR algebra.

use crate::{Address, NoiseError, Result};

/// An immutable byte sequence addressed by the SHA-256 hash of its contents.
///
/// The address is computed eagerly on construction; the bytes are never
/// mutated afterwards, so the address stays valid for the block's lifetime.
/// Blocks participating in a single XOR operation must have equal lengths.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    bytes: Vec<u8>,
    address: Address,
}

impl Block {
    /// Takes ownership of `bytes` and computes their content address,
    /// returning the finished block. Empty byte sequences are rejected.
    pub fn new(bytes: Vec<u8>) -> Result<Self> {
        if bytes.is_empty() {
            return Err(NoiseError::EmptyBlock);
        }
        let address = Address::of(&bytes);
        Ok(Block { bytes, address })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Blocks are non-empty by construction; kept for slice-like call sites.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Recomputes the address from the block's bytes and compares it with the
    /// memoized one. Returns `false` when the bytes no longer hash to the
    /// address the block claims.
    pub fn verify_integrity(&self) -> bool {
        Address::of(&self.bytes) == self.address
    }

    /// Byte-wise XOR of this block with two equal-length operands, producing
    /// the anonymized (or, inversely, the recovered) block.
    ///
    /// XOR is associative and commutative, so the operand order carries no
    /// meaning. Fails with `SizeMismatch` when any operand length differs.
    pub fn xor3(&self, r1: &Block, r2: &Block) -> Result<Block> {
        if self.len() != r1.len() {
            return Err(NoiseError::SizeMismatch {
                left: self.len(),
                right: r1.len(),
            });
        }
        if self.len() != r2.len() {
            return Err(NoiseError::SizeMismatch {
                left: self.len(),
                right: r2.len(),
            });
        }

        // XOR [bytes] with both randomizer operands in a single pass
        let mut out = vec![0u8; self.len()];
        for (i, b) in out.iter_mut().enumerate() {
            *b = self.bytes[i] ^ r1.bytes[i] ^ r2.bytes[i];
        }

        Block::new(out)
    }
}

impl AsRef<[u8]> for Block {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    fn random_block(len: usize) -> Block {
        let mut bytes = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut bytes);
        Block::new(bytes).unwrap()
    }

    #[test]
    fn rejects_empty_bytes() {
        assert!(matches!(Block::new(Vec::new()), Err(NoiseError::EmptyBlock)));
    }

    #[test]
    fn address_matches_content_hash() {
        let block = Block::new(b"hello blocks".to_vec()).unwrap();
        assert_eq!(block.address(), Address::of(b"hello blocks"));
        assert!(block.verify_integrity());
    }

    #[test]
    fn xor3_recovers_the_original() {
        let data = random_block(256);
        let r1 = random_block(256);
        let r2 = random_block(256);

        let anonymized = data.xor3(&r1, &r2).unwrap();
        let recovered = anonymized.xor3(&r1, &r2).unwrap();

        assert_eq!(recovered.bytes(), data.bytes());
        assert_eq!(recovered.address(), data.address());
    }

    #[test]
    fn xor3_is_order_independent() {
        let data = random_block(64);
        let r1 = random_block(64);
        let r2 = random_block(64);

        let a = data.xor3(&r1, &r2).unwrap();
        let b = data.xor3(&r2, &r1).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn xor3_rejects_unequal_lengths() {
        let data = random_block(64);
        let r1 = random_block(64);
        let short = random_block(32);

        let err = data.xor3(&r1, &short).unwrap_err();
        assert!(matches!(
            err,
            NoiseError::SizeMismatch {
                left: 64,
                right: 32
            }
        ));
    }
}
