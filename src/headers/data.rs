use std::fs::File;

use crate::encoding;
use crate::errbounds;
use crate::error::{Error, Result};

use super::{
    derive_geometry, read_header_bytes, Geometry, Header, DEFAULT_BLOCK_SIZE, DEFAULT_MAX_KEYS,
    DEFAULT_REDUNDANT_BLOCKS, HEADER_SIZE,
};

/// Magic title leading the data file.
pub const DATA_FILE_TITLE: &[u8; 16] = b"Scdb versn 0.001";

/// Header of the data file.
///
/// Only the title and the three sizing fields are persisted; the geometry is
/// recomputed from them whenever the header is built or parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataHeader {
    block_size: u32,
    max_keys: u64,
    redundant_blocks: u16,
    geometry: Geometry,
}

impl DataHeader {
    pub fn new(max_keys: Option<u64>, redundant_blocks: Option<u16>, block_size: Option<u32>) -> Self {
        let max_keys = max_keys.unwrap_or(DEFAULT_MAX_KEYS);
        let redundant_blocks = redundant_blocks.unwrap_or(DEFAULT_REDUNDANT_BLOCKS);
        let block_size = block_size.unwrap_or(DEFAULT_BLOCK_SIZE);

        Self {
            block_size,
            max_keys,
            redundant_blocks,
            geometry: derive_geometry(block_size, max_keys, redundant_blocks),
        }
    }

    /// Parses the header stored at the start of the data file.
    pub fn from_file(file: &mut File) -> Result<Self> {
        let bytes = read_header_bytes(file)?;
        Self::try_from(bytes.as_slice())
    }
}

impl TryFrom<&[u8]> for DataHeader {
    type Error = Error;

    fn try_from(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE as usize {
            return errbounds!("header length is {}, expected {HEADER_SIZE}", data.len());
        }

        let block_size = encoding::u32_from(data, 16)?;
        let max_keys = encoding::u64_from(data, 20)?;
        let redundant_blocks = encoding::u16_from(data, 28)?;

        Ok(Self {
            block_size,
            max_keys,
            redundant_blocks,
            geometry: derive_geometry(block_size, max_keys, redundant_blocks),
        })
    }
}

impl Header for DataHeader {
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
        buf.extend_from_slice(DATA_FILE_TITLE);
        buf.extend_from_slice(&self.block_size.to_be_bytes());
        buf.extend_from_slice(&self.max_keys.to_be_bytes());
        buf.extend_from_slice(&self.redundant_blocks.to_be_bytes());
        buf.resize(HEADER_SIZE as usize, 0);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let header = DataHeader::new(None, None, None);
        assert_eq!(header.max_keys(), DEFAULT_MAX_KEYS);
        assert_eq!(header.redundant_blocks(), DEFAULT_REDUNDANT_BLOCKS);
        assert_eq!(header.block_size(), DEFAULT_BLOCK_SIZE);
    }

    #[test]
    fn test_as_bytes_layout() {
        let header = DataHeader::new(Some(24_000), Some(5), Some(4096));
        let bytes = header.as_bytes();

        assert_eq!(bytes.len(), HEADER_SIZE as usize);
        assert_eq!(&bytes[..16], DATA_FILE_TITLE);
        assert_eq!(&bytes[16..20], &4096u32.to_be_bytes());
        assert_eq!(&bytes[20..28], &24_000u64.to_be_bytes());
        assert_eq!(&bytes[28..30], &5u16.to_be_bytes());
        assert!(bytes[30..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_round_trip() {
        let header = DataHeader::new(Some(24_000), Some(5), Some(8192));
        let parsed = DataHeader::try_from(header.as_bytes().as_slice()).expect("parse");
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_short_slice_rejected() {
        let data = vec![0u8; 99];
        assert!(DataHeader::try_from(data.as_slice()).is_err());
    }
}
