//! The prefix inverted index that backs Search.
//!
//! Every stored key fans out into one entry per prefix of it, up to the
//! indexed prefix length. Entries sharing a prefix form a doubly-linked
//! cyclic list rooted at the node an index slot points to; list surgery
//! happens through in-place patches of the next/previous offset fields.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::encoding;
use crate::entries::search_entry::SearchEntry;
use crate::errbounds;
use crate::error::{Error, Result};
use crate::headers::{self, Header, SearchHeader, HEADER_SIZE, INDEX_ENTRY_SIZE};

/// The persistent prefix index over the store's keys.
#[derive(Debug)]
pub struct InvertedIndex {
    file: File,
    file_path: PathBuf,
    pub(crate) max_index_key_len: u32,
    values_start_point: u64,
    file_size: u64,
    header: SearchHeader,
}

impl InvertedIndex {
    /// Opens (creating if necessary) the index file at `file_path`.
    ///
    /// The sizing options only matter when the file is created; for an
    /// existing file the stored header wins.
    pub fn new(
        file_path: &Path,
        max_index_key_len: Option<u32>,
        db_max_keys: Option<u64>,
        db_redundant_blocks: Option<u16>,
    ) -> Result<Self> {
        let file_exists = file_path.exists();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(file_path)?;

        let header = if file_exists {
            SearchHeader::from_file(&mut file)?
        } else {
            let header = SearchHeader::new(db_max_keys, db_redundant_blocks, None, max_index_key_len);
            headers::initialize_file(&mut file, &header)?;
            header
        };

        let file_size = file.metadata()?.len();

        Ok(Self {
            file,
            file_path: file_path.to_path_buf(),
            max_index_key_len: header.max_index_key_len(),
            values_start_point: header.values_start_point(),
            file_size,
            header,
        })
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Records `key` -> `kv_address` under every prefix of the key, up to the
    /// indexed prefix length.
    pub fn add(&mut self, key: &[u8], kv_address: u64, expiry: u64) -> Result<()> {
        let upper_bound = key.len().min(self.max_index_key_len as usize);

        for prefix_len in 1..=upper_bound {
            let prefix = &key[..prefix_len];
            let initial_offset = self.header.index_offset(prefix);

            let mut placed = false;
            for n in 0..self.header.number_of_index_blocks() {
                let slot_addr = self.header.index_offset_in_nth_block(initial_offset, n)?;
                let root_addr = self.read_slot(slot_addr)?;

                if root_addr == 0 {
                    self.append_new_root(prefix, slot_addr, key, kv_address, expiry)?;
                    placed = true;
                    break;
                }

                if self.addr_belongs_to_prefix(root_addr, prefix)? {
                    self.upsert_entry(prefix, root_addr, key, kv_address, expiry)?;
                    placed = true;
                    break;
                }
                // another prefix hashed here; probe the next block
            }

            if !placed {
                return Err(Error::collision_saturation(prefix));
            }
        }

        Ok(())
    }

    /// Returns the kv addresses of every live key containing `term`, in list
    /// order, skipping the first `skip` matches and returning at most
    /// `limit` (zero meaning all of them).
    pub fn search(&mut self, term: &[u8], skip: u64, limit: u64) -> Result<Vec<u64>> {
        let prefix_len = term.len().min(self.max_index_key_len as usize);
        let prefix = &term[..prefix_len];
        let initial_offset = self.header.index_offset(prefix);

        for n in 0..self.header.number_of_index_blocks() {
            let slot_addr = self.header.index_offset_in_nth_block(initial_offset, n)?;
            let root_addr = self.read_slot(slot_addr)?;

            if root_addr == 0 {
                return Ok(Vec::new());
            }

            if self.addr_belongs_to_prefix(root_addr, prefix)? {
                return self.matched_kv_addrs(term, root_addr, skip, limit);
            }
        }

        Ok(Vec::new())
    }

    /// Tombstones `key`'s node in every prefix list it appears in. Nodes stay
    /// linked until compaction rebuilds the index.
    pub fn remove(&mut self, key: &[u8]) -> Result<()> {
        let upper_bound = key.len().min(self.max_index_key_len as usize);

        for prefix_len in 1..=upper_bound {
            let prefix = &key[..prefix_len];
            let initial_offset = self.header.index_offset(prefix);

            for n in 0..self.header.number_of_index_blocks() {
                let slot_addr = self.header.index_offset_in_nth_block(initial_offset, n)?;
                let root_addr = self.read_slot(slot_addr)?;

                if root_addr == 0 {
                    // no list for this prefix at all
                    break;
                }

                if self.addr_belongs_to_prefix(root_addr, prefix)? {
                    self.tombstone_in_list(root_addr, key)?;
                    break;
                }
            }
        }

        Ok(())
    }

    /// Re-initializes the index file, dropping every entry.
    pub fn clear(&mut self) -> Result<()> {
        let header = SearchHeader::new(
            Some(self.header.max_keys()),
            Some(self.header.redundant_blocks()),
            Some(self.header.block_size()),
            Some(self.header.max_index_key_len()),
        );
        self.file_size = headers::initialize_file(&mut self.file, &header)?;
        Ok(())
    }

    /// Reads the 8-byte slot at `addr` in the index band.
    fn read_slot(&mut self, addr: u64) -> Result<u64> {
        encoding::validate_bounds(
            addr,
            addr + INDEX_ENTRY_SIZE,
            HEADER_SIZE,
            self.values_start_point,
            "entry address out of bounds",
        )?;

        let mut buf = [0u8; INDEX_ENTRY_SIZE as usize];
        self.file.seek(SeekFrom::Start(addr))?;
        self.file.read_exact(&mut buf)?;
        Ok(u64::from_be_bytes(buf))
    }

    /// Starts a fresh single-element cyclic list for `prefix` and points the
    /// slot at it.
    fn append_new_root(
        &mut self,
        prefix: &[u8],
        slot_addr: u64,
        key: &[u8],
        kv_address: u64,
        expiry: u64,
    ) -> Result<()> {
        let new_addr = self.file_size;
        let entry = SearchEntry::new(prefix, key, expiry, true, kv_address, new_addr, new_addr);
        let bytes = entry.as_bytes();

        self.write_at(new_addr, &bytes)?;
        self.write_at(slot_addr, &new_addr.to_be_bytes())?;

        self.file_size = new_addr + bytes.len() as u64;
        Ok(())
    }

    /// Checks whether the entry at `addr` indexes the given `prefix`. False
    /// for addresses past the end of the file.
    fn addr_belongs_to_prefix(&mut self, addr: u64, prefix: &[u8]) -> Result<bool> {
        if addr >= self.file_size {
            return Ok(false);
        }

        let mut size_buf = [0u8; 4];
        self.file.seek(SeekFrom::Start(addr + 4))?;
        if !read_exact_or_eof(&mut self.file, &mut size_buf)? {
            return Ok(false);
        }
        if u32::from_be_bytes(size_buf) as usize != prefix.len() {
            return Ok(false);
        }

        let mut key_buf = vec![0u8; prefix.len()];
        self.file.seek(SeekFrom::Start(addr + 8))?;
        if !read_exact_or_eof(&mut self.file, &mut key_buf)? {
            return Ok(false);
        }
        Ok(key_buf == prefix)
    }

    /// Updates the node for `key` in the list rooted at `root_addr`, or hangs
    /// a new tail node off the list when the key is not in it yet.
    fn upsert_entry(
        &mut self,
        prefix: &[u8],
        root_addr: u64,
        key: &[u8],
        kv_address: u64,
        expiry: u64,
    ) -> Result<()> {
        let mut addr = root_addr;

        loop {
            let bytes = self.read_record(addr)?;
            let mut entry = SearchEntry::from_slice(&bytes, 0)?;

            if entry.key == key {
                entry.kv_address = kv_address;
                entry.expiry = expiry;
                // a re-set key comes back to life
                entry.is_deleted = false;
                self.write_at(addr, &entry.as_bytes())?;
                break;
            }

            if entry.next_offset == root_addr {
                // end of the list; append a new tail node
                let new_addr = self.file_size;
                let new_entry =
                    SearchEntry::new(prefix, key, expiry, false, kv_address, root_addr, addr);
                let new_bytes = new_entry.as_bytes();
                self.write_at(new_addr, &new_bytes)?;
                self.file_size = new_addr + new_bytes.len() as u64;

                // splice it in: old tail's next and the root's previous
                self.write_at(entry.offset_of_next(addr), &new_addr.to_be_bytes())?;
                let root_bytes = self.read_record(root_addr)?;
                let root_entry = SearchEntry::from_slice(&root_bytes, 0)?;
                self.write_at(root_entry.offset_of_previous(root_addr), &new_addr.to_be_bytes())?;
                break;
            }

            addr = entry.next_offset;
            if addr == root_addr || addr == 0 {
                // the zero check stops the walk on a partial write
                break;
            }
        }

        Ok(())
    }

    /// Walks the list at `root_addr` collecting the kv addresses of live
    /// entries whose key contains `term`.
    fn matched_kv_addrs(
        &mut self,
        term: &[u8],
        root_addr: u64,
        skip: u64,
        limit: u64,
    ) -> Result<Vec<u64>> {
        let mut matched = Vec::new();
        let mut skipped = 0u64;
        let should_slice = limit > 0;

        let mut addr = root_addr;
        loop {
            let bytes = self.read_record(addr)?;
            let entry = SearchEntry::from_slice(&bytes, 0)?;

            if !entry.is_deleted && !entry.is_expired() && contains(&entry.key, term) {
                if skipped < skip {
                    skipped += 1;
                } else {
                    matched.push(entry.kv_address);
                }

                if should_slice && matched.len() as u64 >= limit {
                    break;
                }
            }

            addr = entry.next_offset;
            if addr == root_addr || addr == 0 {
                break;
            }
        }

        Ok(matched)
    }

    /// Marks the node for `key` in the list at `root_addr` as deleted.
    fn tombstone_in_list(&mut self, root_addr: u64, key: &[u8]) -> Result<()> {
        let mut addr = root_addr;

        loop {
            let bytes = self.read_record(addr)?;
            let entry = SearchEntry::from_slice(&bytes, 0)?;

            if entry.key == key {
                self.write_at(entry.offset_of_is_deleted(addr), &[1])?;
                break;
            }

            addr = entry.next_offset;
            if addr == root_addr || addr == 0 {
                break;
            }
        }

        Ok(())
    }

    /// Reads the whole record at `addr`: size prefix first, then that many
    /// bytes. A record clipped by end of file surfaces as OutOfBounds.
    fn read_record(&mut self, addr: u64) -> Result<Vec<u8>> {
        let mut size_buf = [0u8; 4];
        self.file.seek(SeekFrom::Start(addr))?;
        if !read_exact_or_eof(&mut self.file, &mut size_buf)? {
            return errbounds!("record at {addr} ends before its size prefix");
        }
        let size = u32::from_be_bytes(size_buf) as usize;

        let mut record = Vec::with_capacity(size);
        self.file.seek(SeekFrom::Start(addr))?;
        std::io::Read::by_ref(&mut self.file).take(size as u64).read_to_end(&mut record)?;
        if record.len() < size {
            return errbounds!("record at {addr} is truncated: {} of {size} bytes", record.len());
        }
        Ok(record)
    }

    fn write_at(&mut self, addr: u64, data: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(addr))?;
        self.file.write_all(data)?;
        Ok(())
    }
}

/// Substring check over raw bytes; an empty needle matches everything.
fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}

/// Reads into `buf`, reporting a clean end-of-file as false instead of an
/// error.
fn read_exact_or_eof(file: &mut File, buf: &mut [u8]) -> Result<bool> {
    match file.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}
