//! The 100-byte headers that lead the data file and the inverted-index file.
//!
//! Both headers persist the same sizing fields (block size, max keys,
//! redundant blocks); everything else about the file geometry is derived from
//! those on load, never stored.

pub mod data;
pub mod search;

pub use data::DataHeader;
pub use search::SearchHeader;

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::errbounds;
use crate::error::{Error, Result};
use crate::hasher;

pub const HEADER_SIZE: u64 = 100;
pub const INDEX_ENTRY_SIZE: u64 = 8;
pub const DEFAULT_MAX_KEYS: u64 = 1_000_000;
pub const DEFAULT_REDUNDANT_BLOCKS: u16 = 1;
/// Default index-block size; one memory page on most platforms.
pub const DEFAULT_BLOCK_SIZE: u32 = 4096;

/// Shared behaviour of the data-file and index-file headers: the stored
/// sizing fields plus the geometry derived from them.
pub trait Header {
    fn block_size(&self) -> u32;
    fn max_keys(&self) -> u64;
    fn redundant_blocks(&self) -> u16;
    fn items_per_index_block(&self) -> u64;
    fn number_of_index_blocks(&self) -> u64;
    fn net_block_size(&self) -> u64;
    fn values_start_point(&self) -> u64;

    /// Serializes the header into its 100-byte on-disk form.
    fn as_bytes(&self) -> Vec<u8>;

    /// Offset of the key's slot in the top-most index block.
    fn index_offset(&self, key: &[u8]) -> u64 {
        let hash = hasher::slot_hash(key, self.items_per_index_block());
        HEADER_SIZE + hash * INDEX_ENTRY_SIZE
    }

    /// Offset of the same slot in the `n`-th probe block, zero being the
    /// top-most block.
    fn index_offset_in_nth_block(&self, initial_offset: u64, n: u64) -> Result<u64> {
        if n >= self.number_of_index_blocks() {
            return errbounds!(
                "probe block {n} is beyond the {} available blocks",
                self.number_of_index_blocks()
            );
        }
        Ok(initial_offset + self.net_block_size() * n)
    }
}

/// File geometry derived from the stored header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Geometry {
    pub items_per_index_block: u64,
    pub number_of_index_blocks: u64,
    pub net_block_size: u64,
    pub values_start_point: u64,
}

pub(crate) fn derive_geometry(block_size: u32, max_keys: u64, redundant_blocks: u16) -> Geometry {
    let items_per_index_block = u64::from(block_size) / INDEX_ENTRY_SIZE;
    let number_of_index_blocks =
        max_keys.div_ceil(items_per_index_block) + u64::from(redundant_blocks);
    let net_block_size = items_per_index_block * INDEX_ENTRY_SIZE;
    let values_start_point = HEADER_SIZE + net_block_size * number_of_index_blocks;
    Geometry {
        items_per_index_block,
        number_of_index_blocks,
        net_block_size,
        values_start_point,
    }
}

/// Truncates the file down to nothing and back up to the header plus a zeroed
/// index band, then writes the header bytes. Returns the resulting file size.
pub fn initialize_file<H: Header>(file: &mut File, header: &H) -> Result<u64> {
    let final_size = header.values_start_point();
    file.set_len(0)?;
    file.set_len(final_size)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&header.as_bytes())?;
    Ok(final_size)
}

/// Reads the raw header bytes at the start of the file.
pub fn read_header_bytes(file: &mut File) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; HEADER_SIZE as usize];
    file.seek(SeekFrom::Start(0))?;
    file.read_exact(&mut buf).map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => {
            Error::OutOfBounds(format!("header is shorter than {HEADER_SIZE} bytes"))
        }
        _ => Error::IO(e.to_string()),
    })?;
    Ok(buf)
}
