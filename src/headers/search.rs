use std::fs::File;

use crate::encoding;
use crate::errbounds;
use crate::error::{Error, Result};

use super::{
    derive_geometry, read_header_bytes, Geometry, Header, DEFAULT_BLOCK_SIZE, DEFAULT_MAX_KEYS,
    DEFAULT_REDUNDANT_BLOCKS, HEADER_SIZE,
};

/// Magic title leading the inverted-index file.
pub const INDEX_FILE_TITLE: &[u8; 16] = b"ScdbIndex v0.001";

/// Longest key prefix that gets its own inverted-index list.
pub const DEFAULT_MAX_INDEX_KEY_LEN: u32 = 3;

/// Header of the inverted-index file.
///
/// Same shape as [`DataHeader`](super::DataHeader) with one extra stored
/// field: the maximum indexed prefix length. When no max-keys value is
/// supplied for a fresh file, the default accounts for every source key
/// fanning out into up to `max_index_key_len` prefix entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHeader {
    block_size: u32,
    max_keys: u64,
    redundant_blocks: u16,
    max_index_key_len: u32,
    geometry: Geometry,
}

impl SearchHeader {
    pub fn new(
        max_keys: Option<u64>,
        redundant_blocks: Option<u16>,
        block_size: Option<u32>,
        max_index_key_len: Option<u32>,
    ) -> Self {
        let max_index_key_len = max_index_key_len.unwrap_or(DEFAULT_MAX_INDEX_KEY_LEN);
        let max_keys = max_keys.unwrap_or(DEFAULT_MAX_KEYS * u64::from(max_index_key_len));
        let redundant_blocks = redundant_blocks.unwrap_or(DEFAULT_REDUNDANT_BLOCKS);
        let block_size = block_size.unwrap_or(DEFAULT_BLOCK_SIZE);

        Self {
            block_size,
            max_keys,
            redundant_blocks,
            max_index_key_len,
            geometry: derive_geometry(block_size, max_keys, redundant_blocks),
        }
    }

    /// Parses the header stored at the start of the index file.
    pub fn from_file(file: &mut File) -> Result<Self> {
        let bytes = read_header_bytes(file)?;
        Self::try_from(bytes.as_slice())
    }

    pub fn max_index_key_len(&self) -> u32 {
        self.max_index_key_len
    }
}

impl TryFrom<&[u8]> for SearchHeader {
    type Error = Error;

    fn try_from(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE as usize {
            return errbounds!("header length is {}, expected {HEADER_SIZE}", data.len());
        }

        let block_size = encoding::u32_from(data, 16)?;
        let max_keys = encoding::u64_from(data, 20)?;
        let redundant_blocks = encoding::u16_from(data, 28)?;
        let max_index_key_len = encoding::u32_from(data, 30)?;

        Ok(Self {
            block_size,
            max_keys,
            redundant_blocks,
            max_index_key_len,
            geometry: derive_geometry(block_size, max_keys, redundant_blocks),
        })
    }
}

impl Header for SearchHeader {
    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn max_keys(&self) -> u64 {
        self.max_keys
    }

    fn redundant_blocks(&self) -> u16 {
        self.redundant_blocks
    }

    fn items_per_index_block(&self) -> u64 {
        self.geometry.items_per_index_block
    }

    fn number_of_index_blocks(&self) -> u64 {
        self.geometry.number_of_index_blocks
    }

    fn net_block_size(&self) -> u64 {
        self.geometry.net_block_size
    }

    fn values_start_point(&self) -> u64 {
        self.geometry.values_start_point
    }

    fn as_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE as usize);
        buf.extend_from_slice(INDEX_FILE_TITLE);
        buf.extend_from_slice(&self.block_size.to_be_bytes());
        buf.extend_from_slice(&self.max_keys.to_be_bytes());
        buf.extend_from_slice(&self.redundant_blocks.to_be_bytes());
        buf.extend_from_slice(&self.max_index_key_len.to_be_bytes());
        buf.resize(HEADER_SIZE as usize, 0);
        buf
    }
}
