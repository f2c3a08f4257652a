use std::collections::{BTreeMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ByteOrder};

use crate::encoding;
use crate::entries::key_value::{KeyValueEntry, OFFSET_FOR_KEY};
use crate::error::{Error, Result};
use crate::headers::{self, DataHeader, Header, HEADER_SIZE, INDEX_ENTRY_SIZE};
use crate::search::InvertedIndex;

use super::buffer::Buffer;

pub const DEFAULT_POOL_CAPACITY: usize = 5;

/// Scratch file compaction writes into before renaming it over the data file.
pub const COMPACTION_SCRATCH_FILE: &str = "tmp__compact.scdb";

/// The single point of IO for the data file.
///
/// Callers address the file by absolute offset; the pool interposes two
/// bounded caches. `kv_buffers` is a FIFO of windows over the values region;
/// because the append path keeps extending the tail window while reads pull
/// in fresh ones, windows over the same region can overlap. Readers therefore
/// scan newest to oldest and stop at the first hit, and writers flip bytes in
/// every matching window as well as on disk, so the newest view always agrees
/// with the file. `index_buffers` caches whole index blocks keyed by their
/// left offset.
#[derive(Debug)]
pub struct BufferPool {
    kv_capacity: usize,
    index_capacity: usize,
    buffer_size: usize,
    key_values_start_point: u64,
    max_keys: u64,
    redundant_blocks: u16,
    kv_buffers: VecDeque<Buffer>,
    index_buffers: BTreeMap<u64, Buffer>,
    pub(crate) file: File,
    file_path: PathBuf,
    pub(crate) file_size: u64,
}

impl BufferPool {
    /// Opens (creating if necessary) the data file at `file_path` behind a
    /// pool of `capacity` buffers.
    ///
    /// The sizing options only matter when the file is created; for an
    /// existing file the stored header wins.
    pub fn new(
        capacity: usize,
        file_path: &Path,
        max_keys: Option<u64>,
        redundant_blocks: Option<u16>,
        buffer_size: Option<u32>,
    ) -> Result<Self> {
        let file_exists = file_path.exists();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(file_path)?;

        let header = if file_exists {
            DataHeader::from_file(&mut file)?
        } else {
            let header = DataHeader::new(max_keys, redundant_blocks, buffer_size);
            headers::initialize_file(&mut file, &header)?;
            header
        };

        // index blocks see far more traffic than value windows
        let index_capacity =
            ((2 * capacity) / 3).clamp(1, header.number_of_index_blocks() as usize);
        let kv_capacity = capacity.saturating_sub(index_capacity);
        let file_size = file.metadata()?.len();

        Ok(Self {
            kv_capacity,
            index_capacity,
            buffer_size: header.block_size() as usize,
            key_values_start_point: header.values_start_point(),
            max_keys: header.max_keys(),
            redundant_blocks: header.redundant_blocks(),
            kv_buffers: VecDeque::with_capacity(kv_capacity),
            index_buffers: BTreeMap::new(),
            file,
            file_path: file_path.to_path_buf(),
            file_size,
        })
    }

    /// Appends `data` to the end of the file, returning the address it was
    /// written at.
    pub fn append(&mut self, data: &[u8]) -> Result<u64> {
        let addr = self.file_size;

        if let Some(buf) = self.kv_buffers.back_mut() {
            if buf.can_append(addr) {
                buf.append(data);
            }
        }

        self.write_at(addr, data)?;
        self.file_size += data.len() as u64;
        Ok(addr)
    }

    /// Overwrites the index slot(s) at `addr` with `data`, both in the cached
    /// block (if any) and on disk.
    ///
    /// Fails with OutOfBounds if the write would touch the header or spill
    /// into the values region.
    pub fn update_index(&mut self, addr: u64, data: &[u8]) -> Result<()> {
        encoding::validate_bounds(
            addr,
            addr + data.len() as u64,
            HEADER_SIZE,
            self.key_values_start_point,
            "index address out of bounds",
        )?;

        let block_left = self.index_block_left(addr);
        if let Some(buf) = self.index_buffers.get_mut(&block_left) {
            buf.replace(addr, data)?;
        }

        self.write_at(addr, data)
    }

    /// Reads the 8-byte index slot at `addr`, pulling the whole surrounding
    /// block into the cache on a miss.
    pub fn read_index(&mut self, addr: u64) -> Result<Vec<u8>> {
        encoding::validate_bounds(
            addr,
            addr + INDEX_ENTRY_SIZE,
            HEADER_SIZE,
            self.key_values_start_point,
            "index address out of bounds",
        )?;

        let block_left = self.index_block_left(addr);
        if let Some(buf) = self.index_buffers.get(&block_left) {
            return Ok(buf.read_at(addr, INDEX_ENTRY_SIZE as usize)?.to_vec());
        }

        if self.index_buffers.len() >= self.index_capacity {
            // lower offsets are the most trafficked; drop the highest one
            self.index_buffers.pop_last();
        }

        let chunk = read_chunk(&mut self.file, block_left, self.buffer_size)?;
        let buf = Buffer::new(block_left, &chunk, self.buffer_size);
        let bytes = buf.read_at(addr, INDEX_ENTRY_SIZE as usize)?.to_vec();
        self.index_buffers.insert(block_left, buf);
        Ok(bytes)
    }

    /// Returns the record at `kv_address` if the key there is `key` and the
    /// record is neither tombstoned nor expired.
    ///
    /// A zero address (an empty index slot) and a colliding key both resolve
    /// to None.
    pub fn get_value(&mut self, kv_address: u64, key: &[u8]) -> Result<Option<KeyValueEntry>> {
        if kv_address == 0 {
            return Ok(None);
        }

        let mut cached: Option<Option<KeyValueEntry>> = None;
        for buf in self.kv_buffers.iter().rev() {
            if buf.contains(kv_address) {
                // answer from the window only when it covers the whole record;
                // a clipped tail is re-read from the file instead
                if let Some(size) = buf.record_size_at(kv_address) {
                    if buf.contains_range(kv_address, u64::from(size)) {
                        cached = Some(buf.get_value(kv_address, key)?);
                    }
                }
                break;
            }
        }

        let entry = match cached {
            Some(entry) => entry,
            None => self.cache_kv_window(kv_address)?.get_value(kv_address, key)?,
        };

        Ok(entry.filter(|e| !e.is_deleted && !e.is_expired()))
    }

    /// Checks whether `kv_address` holds a record for `key`, regardless of
    /// whether that record is tombstoned or expired. Keeping stale records
    /// recognizable prevents a second index slot being claimed for the same
    /// key before compaction runs.
    pub fn addr_belongs_to_key(&mut self, kv_address: u64, key: &[u8]) -> Result<bool> {
        if kv_address >= self.file_size {
            return Ok(false);
        }

        let needed = (OFFSET_FOR_KEY + key.len()) as u64;
        for buf in self.kv_buffers.iter().rev() {
            if buf.contains(kv_address) {
                if buf.contains_range(kv_address, needed) {
                    return buf.addr_belongs_to_key(kv_address, key);
                }
                break;
            }
        }

        let buf = self.cache_kv_window(kv_address)?;
        if !buf.contains_range(kv_address, needed) {
            return Ok(false);
        }
        buf.addr_belongs_to_key(kv_address, key)
    }

    /// Tombstones the record at `kv_address` if the key there is `key`,
    /// flipping the is-deleted byte in every cached window that holds it and
    /// writing it through to the file. Returns false when the record belongs
    /// to a different key.
    pub fn try_delete_kv_entry(&mut self, kv_address: u64, key: &[u8]) -> Result<bool> {
        let needed = (OFFSET_FOR_KEY + key.len() + 1) as u64;

        let mut matched = false;
        for buf in self.kv_buffers.iter_mut().rev() {
            if buf.contains_range(kv_address, needed) && buf.try_delete_kv_entry(kv_address, key)? {
                matched = true;
            }
        }

        if !matched {
            // no cached view of the record; compare the key on disk
            let chunk = read_chunk(&mut self.file, kv_address, OFFSET_FOR_KEY + key.len())?;
            if chunk.len() < OFFSET_FOR_KEY + key.len() {
                return Ok(false);
            }
            let key_size = encoding::u32_from(&chunk, 4)?;
            if key_size as usize != key.len() || &chunk[OFFSET_FOR_KEY..] != key {
                return Ok(false);
            }
        }

        self.write_at(kv_address + (OFFSET_FOR_KEY + key.len()) as u64, &[1])?;
        Ok(true)
    }

    /// Resolves raw kv addresses to live (key, value) pairs, in input order,
    /// silently dropping tombstoned and expired records. Bypasses the caches.
    pub fn read_kv_for_search(&mut self, kv_addresses: &[u64]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut pairs = Vec::with_capacity(kv_addresses.len());

        for &addr in kv_addresses {
            let record = read_record_bytes(&mut self.file, addr)?;
            let entry = KeyValueEntry::from_slice(&record, 0)?;
            if entry.is_deleted || entry.is_expired() {
                continue;
            }
            pairs.push((entry.key, entry.value));
        }

        Ok(pairs)
    }

    /// Re-initializes the file to an empty store and drops every buffer.
    pub fn clear_file(&mut self) -> Result<()> {
        let header = DataHeader::new(
            Some(self.max_keys),
            Some(self.redundant_blocks),
            Some(self.buffer_size as u32),
        );
        self.file_size = headers::initialize_file(&mut self.file, &header)?;
        self.kv_buffers.clear();
        self.index_buffers.clear();
        Ok(())
    }

    /// Rewrites the file without its tombstoned and expired records.
    ///
    /// Live records are copied into a sibling scratch file in index-band
    /// order, each surviving slot is repointed at its record's new address,
    /// and the scratch file is renamed over the original. When a search index
    /// is attached, every surviving key is re-added so its list nodes pick up
    /// the record's new address.
    pub fn compact_file(&mut self, mut search_index: Option<&mut InvertedIndex>) -> Result<()> {
        let tmp_path = self.file_path.with_file_name(COMPACTION_SCRATCH_FILE);
        let mut new_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;

        let new_file_size = match self.copy_live_records(&mut new_file, &mut search_index) {
            Ok(size) => size,
            Err(e) => {
                drop(new_file);
                let _ = std::fs::remove_file(&tmp_path);
                return Err(e);
            }
        };

        std::fs::rename(&tmp_path, &self.file_path)?;
        self.file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.file_path)?;
        self.file_size = new_file_size;
        self.kv_buffers.clear();
        self.index_buffers.clear();
        Ok(())
    }

    fn copy_live_records(
        &mut self,
        new_file: &mut File,
        search_index: &mut Option<&mut InvertedIndex>,
    ) -> Result<u64> {
        let header = DataHeader::new(
            Some(self.max_keys),
            Some(self.redundant_blocks),
            Some(self.buffer_size as u32),
        );
        let mut new_file_size = headers::initialize_file(new_file, &header)?;

        let net_block_size = header.net_block_size() as usize;
        let mut block_left = HEADER_SIZE;

        for _ in 0..header.number_of_index_blocks() {
            let block = read_chunk(&mut self.file, block_left, net_block_size)?;

            for (i, slot) in block.chunks_exact(INDEX_ENTRY_SIZE as usize).enumerate() {
                let kv_address = BigEndian::read_u64(slot);
                if kv_address == 0 {
                    continue;
                }

                let record = read_record_bytes(&mut self.file, kv_address)?;
                let entry = KeyValueEntry::from_slice(&record, 0)?;
                if entry.is_deleted || entry.is_expired() {
                    // the slot in the new file stays zero
                    continue;
                }

                let new_address = new_file_size;
                new_file.seek(SeekFrom::Start(new_address))?;
                new_file.write_all(&record)?;

                let slot_addr = block_left + (i as u64) * INDEX_ENTRY_SIZE;
                new_file.seek(SeekFrom::Start(slot_addr))?;
                new_file.write_all(&new_address.to_be_bytes())?;

                new_file_size += record.len() as u64;

                if let Some(index) = search_index.as_deref_mut() {
                    index.add(&entry.key, new_address, entry.expiry)?;
                }
            }

            block_left += net_block_size as u64;
        }

        Ok(new_file_size)
    }

    /// Drops every cached buffer without touching the file.
    pub(crate) fn drop_buffers(&mut self) {
        self.kv_buffers.clear();
        self.index_buffers.clear();
    }

    /// Left offset of the raw block-sized window holding `addr`.
    fn index_block_left(&self, addr: u64) -> u64 {
        let buffer_size = self.buffer_size as u64;
        HEADER_SIZE + ((addr - HEADER_SIZE) / buffer_size) * buffer_size
    }

    /// Reads one buffer-sized window starting at `addr` and pushes it onto
    /// the kv FIFO, evicting the oldest window when full.
    fn cache_kv_window(&mut self, addr: u64) -> Result<Buffer> {
        let chunk = read_chunk(&mut self.file, addr, self.buffer_size)?;
        let buf = Buffer::new(addr, &chunk, self.buffer_size);

        if self.kv_capacity > 0 {
            if self.kv_buffers.len() >= self.kv_capacity {
                self.kv_buffers.pop_front();
            }
            self.kv_buffers.push_back(buf.clone());
        }

        Ok(buf)
    }

    fn write_at(&mut self, addr: u64, data: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(addr))?;
        self.file.write_all(data)?;
        Ok(())
    }
}

/// Reads up to `size` bytes at `addr`, short only at end of file.
fn read_chunk(file: &mut File, addr: u64, size: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(size);
    file.seek(SeekFrom::Start(addr))?;
    std::io::Read::by_ref(file).take(size as u64).read_to_end(&mut buf)?;
    Ok(buf)
}

/// Reads the whole record at `addr`: its size prefix first, then that many
/// bytes. A record clipped by end of file surfaces as OutOfBounds.
fn read_record_bytes(file: &mut File, addr: u64) -> Result<Vec<u8>> {
    let size_bytes = read_chunk(file, addr, 4)?;
    let size = encoding::u32_from(&size_bytes, 0)? as usize;

    let record = read_chunk(file, addr, size)?;
    if record.len() < size {
        return Err(Error::OutOfBounds(format!(
            "record at {addr} is truncated: {} of {size} bytes",
            record.len()
        )));
    }
    Ok(record)
}
