//! The file descriptor: the metadata record binding a file to the block
//! triples that reconstruct it.
//!
//! Descriptors are serialized with borsh — little-endian, length-prefixed,
//! stable field order — and stored in the backend as an opaque block. The
//! first two bytes of the encoding are always the format version so future
//! revisions remain detectable.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{Address, NoiseError, Result};

/// Version written by this implementation. Anything else is rejected on
/// read; in particular there is no migration path for legacy two-tuple
/// descriptor formats.
pub const DESCRIPTOR_VERSION: u16 = 1;

/// The three addresses sufficient to recover one plaintext block:
/// `data XOR rand1 XOR rand2`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockTriple {
    pub data: Address,
    pub rand1: Address,
    pub rand2: Address,
}

impl BlockTriple {
    /// Builds a triple, rejecting the degenerate case where both randomizer
    /// addresses are equal (a block XORed with itself twice is the data
    /// block in plaintext).
    pub fn new(data: Address, rand1: Address, rand2: Address) -> Result<Self> {
        if rand1 == rand2 {
            return Err(NoiseError::invalid_descriptor(format!(
                "triple uses the same randomizer twice: {rand1:?}"
            )));
        }
        Ok(BlockTriple { data, rand1, rand2 })
    }
}

/// Metadata record for one uploaded file.
///
/// The concatenation of `data[i] XOR rand1[i] XOR rand2[i]` over the ordered
/// triples, truncated to `file_size`, reconstructs the original file. All
/// stored blocks are exactly `block_size` bytes; the declared file size
/// determines how many bytes of the final block are meaningful.
#[derive(Clone, Debug, PartialEq)]
pub struct Descriptor {
    filename: String,
    file_size: u64,
    block_size: u32,
    created_at: i64,
    triples: Vec<BlockTriple>,
}

impl Descriptor {
    pub fn new(
        filename: impl Into<String>,
        file_size: u64,
        block_size: u32,
        created_at: i64,
        triples: Vec<BlockTriple>,
    ) -> Result<Self> {
        let descriptor = Descriptor {
            filename: filename.into(),
            file_size,
            block_size,
            created_at,
            triples,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// The number of triples a file of `file_size` bytes splits into at
    /// `block_size` bytes per block. Zero for an empty file.
    pub fn expected_triple_count(file_size: u64, block_size: u32) -> u64 {
        if file_size == 0 {
            return 0;
        }
        file_size.div_ceil(block_size as u64)
    }

    /// The number of meaningful bytes in the final block. Equal to
    /// `block_size` for block-aligned files, zero for empty files.
    pub fn tail_len(&self) -> u32 {
        if self.file_size == 0 {
            return 0;
        }
        let full = (self.triples.len() as u64 - 1) * self.block_size as u64;
        (self.file_size - full) as u32
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn triples(&self) -> &[BlockTriple] {
        &self.triples
    }

    /// Serializes the descriptor to its deterministic wire encoding.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let wire = DescriptorWire {
            version: DESCRIPTOR_VERSION,
            filename: self.filename.clone(),
            file_size: self.file_size,
            block_size: self.block_size,
            created_at: self.created_at,
            triples: self
                .triples
                .iter()
                .map(|t| TripleWire {
                    data: t.data.0,
                    rand1: t.rand1.0,
                    rand2: t.rand2.0,
                })
                .collect(),
        };
        borsh::to_vec(&wire)
            .map_err(|e| NoiseError::invalid_descriptor(format!("encode failed: {e}")))
    }

    /// Deserializes and validates a descriptor from its wire encoding.
    ///
    /// Rejects mismatched versions, zero block sizes, empty triple lists for
    /// non-empty files, triples where `rand1 == rand2`, triple counts that do
    /// not cover the declared file size, and trailing bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        // The version prefix is readable without decoding the full record
        if bytes.len() < 2 {
            return Err(NoiseError::invalid_descriptor(
                "too short to carry a version prefix",
            ));
        }
        let version = u16::from_le_bytes([bytes[0], bytes[1]]);
        if version != DESCRIPTOR_VERSION {
            return Err(NoiseError::invalid_descriptor(format!(
                "unsupported version {version}, expected {DESCRIPTOR_VERSION}"
            )));
        }

        // try_from_slice rejects trailing bytes after the record
        let wire = DescriptorWire::try_from_slice(bytes)
            .map_err(|e| NoiseError::invalid_descriptor(format!("decode failed: {e}")))?;

        let triples = wire
            .triples
            .into_iter()
            .map(|t| {
                BlockTriple::new(
                    Address(t.data),
                    Address(t.rand1),
                    Address(t.rand2),
                )
            })
            .collect::<Result<Vec<BlockTriple>>>()?;

        Descriptor::new(
            wire.filename,
            wire.file_size,
            wire.block_size,
            wire.created_at,
            triples,
        )
    }

    fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(NoiseError::invalid_descriptor("block size is zero"));
        }
        if self.file_size > 0 && self.triples.is_empty() {
            return Err(NoiseError::invalid_descriptor(
                "non-empty file with an empty triple list",
            ));
        }
        let expected = Self::expected_triple_count(self.file_size, self.block_size);
        if self.triples.len() as u64 != expected {
            return Err(NoiseError::invalid_descriptor(format!(
                "{} triples do not cover a {} byte file at {} bytes per block (expected {})",
                self.triples.len(),
                self.file_size,
                self.block_size,
                expected
            )));
        }
        for triple in &self.triples {
            if triple.rand1 == triple.rand2 {
                return Err(NoiseError::invalid_descriptor(format!(
                    "triple uses the same randomizer twice: {:?}",
                    triple.rand1
                )));
            }
        }
        Ok(())
    }
}

//==============================================================================
// Wire records
//------------------------------------------------------------------------------

#[derive(BorshSerialize, BorshDeserialize)]
struct DescriptorWire {
    version: u16,
    filename: String,
    file_size: u64,
    block_size: u32,
    created_at: i64,
    triples: Vec<TripleWire>,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct TripleWire {
    data: [u8; 32],
    rand1: [u8; 32],
    rand2: [u8; 32],
}
