//! Splitting files into fixed-size blocks and reassembling them.
//!
//! Every produced block is exactly `block_size` bytes; the final block is
//! zero-padded so that all stored blocks stay uniform in size (a stored
//! block of odd length would leak the tail position of some file). The
//! descriptor's declared file size governs truncation at reassembly.

use noisefs_types::{Block, NoiseError, Result};

/// Splits `data` into an ordered sequence of `block_size` byte blocks, the
/// last one zero-padded. An empty input yields no blocks.
pub fn split_into_blocks(data: &[u8], block_size: u32) -> Result<Vec<Block>> {
    if block_size == 0 {
        return Err(NoiseError::invalid_descriptor("block size is zero"));
    }
    let block_size = block_size as usize;

    let mut blocks = Vec::with_capacity(data.len().div_ceil(block_size.max(1)));
    for chunk in data.chunks(block_size) {
        let mut bytes = chunk.to_vec();
        bytes.resize(block_size, 0);
        blocks.push(Block::new(bytes)?);
    }
    Ok(blocks)
}

/// Concatenates recovered blocks in order and truncates to the declared
/// file size, dropping the final block's padding.
pub fn reassemble(blocks: Vec<Block>, file_size: u64) -> Vec<u8> {
    let mut data = Vec::with_capacity(blocks.iter().map(Block::len).sum());
    for block in blocks {
        data.extend_from_slice(block.bytes());
    }
    data.truncate(file_size as usize);
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_with_zero_padded_tail() {
        let data = b"abcdefghijklmnopqrstuvwxyz0123456789!";
        let blocks = split_into_blocks(data, 16).unwrap();

        assert_eq!(blocks.len(), 3);
        assert!(blocks.iter().all(|b| b.len() == 16));
        assert_eq!(&blocks[2].bytes()[..5], b"6789!");
        assert!(blocks[2].bytes()[5..].iter().all(|&b| b == 0));
    }

    #[test]
    fn aligned_input_needs_no_padding() {
        let data = vec![0xAB; 1024];
        let blocks = split_into_blocks(&data, 256).unwrap();
        assert_eq!(blocks.len(), 4);
        assert!(blocks.iter().all(|b| b.bytes() == &data[..256]));
    }

    #[test]
    fn empty_input_yields_no_blocks() {
        let blocks = split_into_blocks(&[], 128).unwrap();
        assert!(blocks.is_empty());
    }

    #[test]
    fn input_smaller_than_a_block_is_a_single_padded_block() {
        let blocks = split_into_blocks(b"tiny", 64).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].len(), 64);
    }

    #[test]
    fn split_then_reassemble_is_identity() {
        let data: Vec<u8> = (0..=255u8).cycle().take(777).collect();
        let blocks = split_into_blocks(&data, 100).unwrap();
        let rebuilt = reassemble(blocks, data.len() as u64);
        assert_eq!(rebuilt, data);
    }

    #[test]
    fn zero_block_size_is_rejected() {
        assert!(split_into_blocks(b"data", 0).is_err());
    }
}
