use crate::encoding;
use crate::error::Result;

/// Size of the fixed-width fields of a key-value record: total-size (4),
/// key-size (4), is-deleted (1) and expiry (8).
pub const KEY_VALUE_MIN_SIZE: u32 = 17;

/// Offset of the key bytes within a serialized record, past the two size
/// fields.
pub const OFFSET_FOR_KEY: usize = 8;

/// A single key-value record in the data file's value region.
///
/// Layout: total-size (4) | key-size (4) | key | is-deleted (1) | expiry (8)
/// | value. Once written, a record is only ever mutated by flipping its
/// is-deleted byte; updates append a fresh record instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValueEntry {
    pub size: u32,
    pub key_size: u32,
    pub key: Vec<u8>,
    pub is_deleted: bool,
    pub expiry: u64,
    pub value: Vec<u8>,
}

impl KeyValueEntry {
    /// `expiry` is in seconds since the unix epoch; zero means no expiry.
    pub fn new(key: &[u8], value: &[u8], expiry: u64) -> Self {
        let key_size = key.len() as u32;
        let size = key_size + KEY_VALUE_MIN_SIZE + value.len() as u32;

        Self {
            size,
            key_size,
            key: key.to_vec(),
            is_deleted: false,
            expiry,
            value: value.to_vec(),
        }
    }

    /// Parses the record that starts at `offset` within `data`.
    pub fn from_slice(data: &[u8], offset: usize) -> Result<Self> {
        let size = encoding::u32_from(data, offset)?;
        let key_size = encoding::u32_from(data, offset + 4)?;
        let k = key_size as usize;

        let key = encoding::safe_slice(data, offset + OFFSET_FOR_KEY, offset + OFFSET_FOR_KEY + k)?
            .to_vec();
        let is_deleted = encoding::bool_from(data, offset + 8 + k)?;
        let expiry = encoding::u64_from(data, offset + 9 + k)?;

        let value_size = size
            .checked_sub(KEY_VALUE_MIN_SIZE)
            .and_then(|s| s.checked_sub(key_size))
            .ok_or_else(|| {
                crate::Error::OutOfBounds(format!(
                    "record size {size} too small for a key of {key_size} bytes"
                ))
            })? as usize;
        let value =
            encoding::safe_slice(data, offset + 17 + k, offset + 17 + k + value_size)?.to_vec();

        Ok(Self {
            size,
            key_size,
            key,
            is_deleted,
            expiry,
            value,
        })
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.size as usize);
        buf.extend_from_slice(&self.size.to_be_bytes());
        buf.extend_from_slice(&self.key_size.to_be_bytes());
        buf.extend_from_slice(&self.key);
        buf.push(self.is_deleted as u8);
        buf.extend_from_slice(&self.expiry.to_be_bytes());
        buf.extend_from_slice(&self.value);
        buf
    }

    /// True once the record has outlived its time-to-live. Records written
    /// without one never expire.
    pub fn is_expired(&self) -> bool {
        super::is_expired(self.expiry)
    }
}
