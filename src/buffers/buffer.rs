use crate::encoding;
use crate::entries::key_value::{KeyValueEntry, OFFSET_FOR_KEY};
use crate::error::Result;

/// An in-memory window over a contiguous run of the data file.
///
/// `left_offset` is the file offset the window starts at; `right_offset` is
/// the exclusive upper bound, i.e. the left offset of whatever lies
/// immediately to the window's right in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buffer {
    capacity: usize,
    pub data: Vec<u8>,
    pub left_offset: u64,
    pub right_offset: u64,
}

impl Buffer {
    /// Creates a window over `data` as read from `left_offset`, keeping at
    /// most `capacity` bytes of it.
    pub fn new(left_offset: u64, data: &[u8], capacity: usize) -> Self {
        let upper_bound = data.len().min(capacity);
        Self {
            capacity,
            data: data[..upper_bound].to_vec(),
            left_offset,
            right_offset: left_offset + upper_bound as u64,
        }
    }

    /// True if `addr` is the next byte past this window and there is spare
    /// capacity, i.e. an append at `addr` keeps the window contiguous.
    pub fn can_append(&self, addr: u64) -> bool {
        (self.right_offset - self.left_offset) < self.capacity as u64 && addr == self.right_offset
    }

    /// True if `addr` falls inside this window.
    pub fn contains(&self, addr: u64) -> bool {
        self.left_offset <= addr && addr < self.right_offset
    }

    /// True if the whole span `addr..addr + len` falls inside this window.
    pub fn contains_range(&self, addr: u64, len: u64) -> bool {
        self.left_offset <= addr && addr + len <= self.right_offset
    }

    /// Appends `data` at the window's right edge, returning the file address
    /// it now occupies.
    ///
    /// A single append may push the window past its capacity; `can_append`
    /// reports false from then on, which bounds the overshoot to one record.
    pub fn append(&mut self, data: &[u8]) -> u64 {
        self.data.extend_from_slice(data);
        let prev_right_offset = self.right_offset;
        self.right_offset += data.len() as u64;
        prev_right_offset
    }

    /// Overwrites the bytes at file address `addr` with `data`.
    pub fn replace(&mut self, addr: u64, data: &[u8]) -> Result<()> {
        let data_length = data.len() as u64;
        encoding::validate_bounds(
            addr,
            addr + data_length,
            self.left_offset,
            self.right_offset,
            "address out of bounds",
        )?;

        let start = (addr - self.left_offset) as usize;
        self.data[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Returns the bytes at file address `addr` of the given size.
    pub fn read_at(&self, addr: u64, size: usize) -> Result<&[u8]> {
        encoding::validate_bounds(
            addr,
            addr + size as u64,
            self.left_offset,
            self.right_offset,
            "address out of bounds",
        )?;

        let start = (addr - self.left_offset) as usize;
        Ok(&self.data[start..start + size])
    }

    /// Reads the total-size field of the record at `addr`, if the window
    /// covers it.
    pub fn record_size_at(&self, addr: u64) -> Option<u32> {
        if !self.contains_range(addr, 4) {
            return None;
        }
        let start = (addr - self.left_offset) as usize;
        encoding::u32_from(&self.data, start).ok()
    }

    /// Parses the key-value record at `addr` and returns it if its key is
    /// `key`. A different key there means a hash collision, not an error.
    pub fn get_value(&self, addr: u64, key: &[u8]) -> Result<Option<KeyValueEntry>> {
        let offset = (addr - self.left_offset) as usize;
        let entry = KeyValueEntry::from_slice(&self.data, offset)?;

        if entry.key == key {
            Ok(Some(entry))
        } else {
            Ok(None)
        }
    }

    /// Checks whether the record at `addr` is for the given key, comparing
    /// only the key fields. Liveness is deliberately ignored.
    pub fn addr_belongs_to_key(&self, addr: u64, key: &[u8]) -> Result<bool> {
        let offset = (addr - self.left_offset) as usize;
        let key_size = encoding::u32_from(&self.data, offset + 4)?;
        if key_size as usize != key.len() {
            return Ok(false);
        }

        let start = offset + OFFSET_FOR_KEY;
        let key_in_data = encoding::safe_slice(&self.data, start, start + key.len())?;
        Ok(key_in_data == key)
    }

    /// Flips the is-deleted byte of the record at `addr` if the key there is
    /// `key`. Returns false when the record holds a different key.
    pub fn try_delete_kv_entry(&mut self, addr: u64, key: &[u8]) -> Result<bool> {
        if !self.addr_belongs_to_key(addr, key)? {
            return Ok(false);
        }

        let is_deleted_idx = (addr - self.left_offset) as usize + OFFSET_FOR_KEY + key.len();
        self.data[is_deleted_idx] = 1;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn kv_bytes(key: &[u8], value: &[u8], expiry: u64) -> Vec<u8> {
        KeyValueEntry::new(key, value, expiry).as_bytes()
    }

    #[test]
    fn test_new_caps_data_at_capacity() {
        let data = vec![7u8; 100];
        let buf = Buffer::new(50, &data, 64);

        assert_eq!(buf.data.len(), 64);
        assert_eq!(buf.left_offset, 50);
        assert_eq!(buf.right_offset, 114);
    }

    #[test]
    fn test_contains_and_ranges() {
        let buf = Buffer::new(100, &[0u8; 16], 4096);

        assert!(buf.contains(100));
        assert!(buf.contains(115));
        assert!(!buf.contains(116));
        assert!(!buf.contains(99));
        assert!(buf.contains_range(100, 16));
        assert!(!buf.contains_range(100, 17));
    }

    #[test]
    fn test_can_append() {
        let mut buf = Buffer::new(100, &[0u8; 8], 16);
        assert!(buf.can_append(108));
        assert!(!buf.can_append(107));
        assert!(!buf.can_append(109));

        buf.append(&[1u8; 8]);
        // at capacity now
        assert!(!buf.can_append(116));
    }

    #[test]
    fn test_append_returns_address() {
        let mut buf = Buffer::new(200, &[0u8; 8], 4096);
        let addr = buf.append(&[9u8; 4]);

        assert_eq!(addr, 208);
        assert_eq!(buf.right_offset, 212);
        assert_eq!(&buf.data[8..], &[9u8; 4]);
    }

    #[test]
    fn test_replace() {
        let mut buf = Buffer::new(100, &[0u8; 16], 4096);
        buf.replace(104, &[1, 2, 3, 4]).expect("replace");
        assert_eq!(&buf.data[4..8], &[1, 2, 3, 4]);

        assert!(matches!(
            buf.replace(113, &[0u8; 4]),
            Err(Error::OutOfBounds(_))
        ));
    }

    #[test]
    fn test_get_value_matches_key() {
        let bytes = kv_bytes(b"hey", b"English", 0);
        let buf = Buffer::new(300, &bytes, 4096);

        let entry = buf.get_value(300, b"hey").expect("read").expect("some");
        assert_eq!(entry.value, b"English");

        // a colliding key at the same slot resolves to None, not an error
        assert!(buf.get_value(300, b"hez").expect("read").is_none());
    }

    #[test]
    fn test_addr_belongs_to_key() {
        let bytes = kv_bytes(b"foo", b"eng", 0);
        let buf = Buffer::new(512, &bytes, 4096);

        assert!(buf.addr_belongs_to_key(512, b"foo").unwrap());
        assert!(!buf.addr_belongs_to_key(512, b"bar").unwrap());
        // a shorter prefix of the stored key is a different key
        assert!(!buf.addr_belongs_to_key(512, b"fo").unwrap());
    }

    #[test]
    fn test_addr_belongs_to_key_ignores_liveness() {
        let mut entry = KeyValueEntry::new(b"foo", b"eng", 1);
        entry.is_deleted = true;
        let buf = Buffer::new(512, &entry.as_bytes(), 4096);

        // deleted and expired, yet still recognized as this key's record
        assert!(buf.addr_belongs_to_key(512, b"foo").unwrap());
    }

    #[test]
    fn test_try_delete_kv_entry() {
        let bytes = kv_bytes(b"oi", b"Portuguese", 0);
        let mut buf = Buffer::new(700, &bytes, 4096);

        assert!(!buf.try_delete_kv_entry(700, b"io").unwrap());
        let entry = buf.get_value(700, b"oi").unwrap().unwrap();
        assert!(!entry.is_deleted);

        assert!(buf.try_delete_kv_entry(700, b"oi").unwrap());
        let entry = buf.get_value(700, b"oi").unwrap().unwrap();
        assert!(entry.is_deleted);
    }

    #[test]
    fn test_record_size_at() {
        let bytes = kv_bytes(b"hi", b"there", 0);
        let buf = Buffer::new(100, &bytes, 4096);

        assert_eq!(buf.record_size_at(100), Some(bytes.len() as u32));
        assert_eq!(buf.record_size_at(buf.right_offset - 2), None);
    }
}
