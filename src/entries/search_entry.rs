use crate::encoding;
use crate::error::Result;

/// Size of the fixed-width fields of an inverted-index record: total-size
/// (4), index-key-size (4), is-deleted (1), is-root (1), expiry (8),
/// next-offset (8), previous-offset (8) and kv-address (8).
pub const SEARCH_ENTRY_MIN_SIZE: u32 = 42;

/// A node in a per-prefix doubly-linked cyclic list in the inverted-index
/// file.
///
/// Layout: total-size (4) | index-key-size (4) | index-key | key |
/// is-deleted (1) | is-root (1) | expiry (8) | next-offset (8) |
/// previous-offset (8) | kv-address (8). The list head carries is-root; a
/// single-element list points next and previous at itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchEntry {
    pub size: u32,
    pub index_key_size: u32,
    pub index_key: Vec<u8>,
    pub key: Vec<u8>,
    pub is_deleted: bool,
    pub is_root: bool,
    pub expiry: u64,
    pub next_offset: u64,
    pub previous_offset: u64,
    pub kv_address: u64,
}

impl SearchEntry {
    pub fn new(
        index_key: &[u8],
        key: &[u8],
        expiry: u64,
        is_root: bool,
        kv_address: u64,
        next_offset: u64,
        previous_offset: u64,
    ) -> Self {
        let index_key_size = index_key.len() as u32;
        let size = index_key_size + key.len() as u32 + SEARCH_ENTRY_MIN_SIZE;

        Self {
            size,
            index_key_size,
            index_key: index_key.to_vec(),
            key: key.to_vec(),
            is_deleted: false,
            is_root,
            expiry,
            next_offset,
            previous_offset,
            kv_address,
        }
    }

    /// Parses the record that starts at `offset` within `data`.
    pub fn from_slice(data: &[u8], offset: usize) -> Result<Self> {
        let size = encoding::u32_from(data, offset)?;
        let index_key_size = encoding::u32_from(data, offset + 4)?;
        let ik = index_key_size as usize;

        let index_key = encoding::safe_slice(data, offset + 8, offset + 8 + ik)?.to_vec();

        let key_size = size
            .checked_sub(SEARCH_ENTRY_MIN_SIZE)
            .and_then(|s| s.checked_sub(index_key_size))
            .ok_or_else(|| {
                crate::Error::OutOfBounds(format!(
                    "record size {size} too small for an index key of {index_key_size} bytes"
                ))
            })? as usize;
        let key = encoding::safe_slice(data, offset + 8 + ik, offset + 8 + ik + key_size)?.to_vec();

        let base = offset + 8 + ik + key_size;
        let is_deleted = encoding::bool_from(data, base)?;
        let is_root = encoding::bool_from(data, base + 1)?;
        let expiry = encoding::u64_from(data, base + 2)?;
        let next_offset = encoding::u64_from(data, base + 10)?;
        let previous_offset = encoding::u64_from(data, base + 18)?;
        let kv_address = encoding::u64_from(data, base + 26)?;

        Ok(Self {
            size,
            index_key_size,
            index_key,
            key,
            is_deleted,
            is_root,
            expiry,
            next_offset,
            previous_offset,
            kv_address,
        })
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.size as usize);
        buf.extend_from_slice(&self.size.to_be_bytes());
        buf.extend_from_slice(&self.index_key_size.to_be_bytes());
        buf.extend_from_slice(&self.index_key);
        buf.extend_from_slice(&self.key);
        buf.push(self.is_deleted as u8);
        buf.push(self.is_root as u8);
        buf.extend_from_slice(&self.expiry.to_be_bytes());
        buf.extend_from_slice(&self.next_offset.to_be_bytes());
        buf.extend_from_slice(&self.previous_offset.to_be_bytes());
        buf.extend_from_slice(&self.kv_address.to_be_bytes());
        buf
    }

    pub fn is_expired(&self) -> bool {
        super::is_expired(self.expiry)
    }

    // File offsets of the fields that get patched in place during list
    // surgery, for an entry serialized at `addr`.

    pub fn offset_of_is_deleted(&self, addr: u64) -> u64 {
        addr + 8 + u64::from(self.index_key_size) + self.key.len() as u64
    }

    pub fn offset_of_next(&self, addr: u64) -> u64 {
        self.offset_of_is_deleted(addr) + 10
    }

    pub fn offset_of_previous(&self, addr: u64) -> u64 {
        self.offset_of_is_deleted(addr) + 18
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_new_sizes() {
        let entry = SearchEntry::new(b"fo", b"foo", 0, true, 700, 900, 900);
        assert_eq!(entry.index_key_size, 2);
        assert_eq!(entry.size, 2 + 3 + SEARCH_ENTRY_MIN_SIZE);
        assert!(entry.is_root);
        assert!(!entry.is_deleted);
    }

    #[test]
    fn test_round_trip_at_offset() {
        let entry = SearchEntry::new(b"ba", b"band", 1_700_000_000, false, 1234, 5678, 910);
        let mut data = vec![0x55; 7];
        data.extend_from_slice(&entry.as_bytes());

        let parsed = SearchEntry::from_slice(&data, 7).expect("parse");
        assert_eq!(parsed, entry);
    }

    #[test]
    fn test_as_bytes_layout() {
        let entry = SearchEntry::new(b"f", b"foo", 9, true, 11, 22, 33);
        let bytes = entry.as_bytes();

        assert_eq!(bytes.len(), entry.size as usize);
        assert_eq!(&bytes[..4], &entry.size.to_be_bytes());
        assert_eq!(&bytes[4..8], &1u32.to_be_bytes());
        assert_eq!(&bytes[8..9], b"f");
        assert_eq!(&bytes[9..12], b"foo");
        assert_eq!(bytes[12], 0); // is_deleted
        assert_eq!(bytes[13], 1); // is_root
        assert_eq!(&bytes[14..22], &9u64.to_be_bytes());
        assert_eq!(&bytes[22..30], &22u64.to_be_bytes());
        assert_eq!(&bytes[30..38], &33u64.to_be_bytes());
        assert_eq!(&bytes[38..46], &11u64.to_be_bytes());
    }

    #[test]
    fn test_patch_offsets_match_layout() {
        let entry = SearchEntry::new(b"f", b"foo", 9, true, 11, 22, 33);
        let addr = 4000u64;

        assert_eq!(entry.offset_of_is_deleted(addr), addr + 12);
        assert_eq!(entry.offset_of_next(addr), addr + 22);
        assert_eq!(entry.offset_of_previous(addr), addr + 30);
    }

    #[test]
    fn test_truncated_record_fails() {
        let entry = SearchEntry::new(b"pi", b"pig", 0, true, 1, 2, 3);
        let bytes = entry.as_bytes();

        assert!(matches!(
            SearchEntry::from_slice(&bytes[..bytes.len() - 5], 0),
            Err(Error::OutOfBounds(_))
        ));
    }
}
