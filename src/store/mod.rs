//! The public store façade.
//!
//! Every operation funnels through one mutex; the buffer pool and inverted
//! index underneath it are single-threaded by construction. A background
//! compaction task shares the same mutex, so its runs are indistinguishable
//! from a caller invoking [`Store::compact`].

pub mod tasks;

use std::fs;
use std::sync::{Arc, Mutex};

use crate::buffers::BufferPool;
use crate::config::StoreConfig;
use crate::encoding;
use crate::entries::{now_unix_secs, KeyValueEntry};
use crate::error::{Error, Result};
use crate::headers::{DataHeader, Header};
use crate::scheduler::Scheduler;
use crate::search::InvertedIndex;

use tasks::CompactionTask;

/// Name of the data file inside the store directory.
pub const DATA_FILE: &str = "dump.scdb";

/// Name of the inverted-index file inside the store directory.
pub const INDEX_FILE: &str = "index.iscdb";

/// An embedded, file-backed key-value store with optional TTL expiry and
/// optional prefix search.
pub struct Store {
    inner: Arc<Mutex<StoreInner>>,
    scheduler: Option<Scheduler>,
    is_closed: bool,
}

pub(crate) struct StoreInner {
    pool: BufferPool,
    header: DataHeader,
    search_index: Option<InvertedIndex>,
    closed: bool,
}

impl Store {
    /// Opens a store in `dir` with the default configuration.
    pub fn open(dir: &str) -> Result<Self> {
        Self::open_with_config(StoreConfig::new(dir))
    }

    /// Opens a store with the given configuration, creating the directory
    /// and files as needed.
    ///
    /// The periodic compactor needs a tokio runtime; when opened outside of
    /// one it is skipped and compaction is manual-only.
    pub fn open_with_config(config: StoreConfig) -> Result<Self> {
        fs::create_dir_all(&config.dir)?;

        let mut pool = BufferPool::new(
            config.pool_capacity,
            &config.dir.join(DATA_FILE),
            config.max_keys,
            config.redundant_blocks,
            config.block_size,
        )?;
        let header = DataHeader::from_file(&mut pool.file)?;

        let search_index = if config.search_enabled {
            Some(InvertedIndex::new(
                &config.dir.join(INDEX_FILE),
                None,
                config.max_keys,
                config.redundant_blocks,
            )?)
        } else {
            None
        };

        let inner = Arc::new(Mutex::new(StoreInner {
            pool,
            header,
            search_index,
            closed: false,
        }));

        let scheduler = if config.compaction_interval.is_zero() {
            None
        } else {
            match tokio::runtime::Handle::try_current() {
                Ok(_) => {
                    let scheduler = Scheduler::new();
                    scheduler.register(Arc::new(CompactionTask::new(
                        Arc::clone(&inner),
                        config.compaction_interval,
                    )));
                    Some(scheduler)
                }
                Err(_) => {
                    tracing::warn!(
                        dir = %config.dir.display(),
                        "no tokio runtime; periodic compaction is disabled"
                    );
                    None
                }
            }
        };

        tracing::debug!(dir = %config.dir.display(), "store opened");

        Ok(Self {
            inner,
            scheduler,
            is_closed: false,
        })
    }

    /// Inserts or updates the value for `key`. With a `ttl` (in seconds) the
    /// pair expires that many seconds from now; without one it lives until
    /// deleted.
    pub fn set(&self, key: &[u8], value: &[u8], ttl: Option<u64>) -> Result<()> {
        self.inner.lock()?.set(key, value, ttl)
    }

    /// Returns the value for `key`, or None when the key is missing, was
    /// deleted, or has expired.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner.lock()?.get(key)
    }

    /// Removes `key`. Deleting a missing key is not an error.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.inner.lock()?.delete(key)
    }

    /// Removes every key, resetting both files to their empty state.
    pub fn clear(&self) -> Result<()> {
        self.inner.lock()?.clear()
    }

    /// Rewrites the data file without its deleted and expired records.
    ///
    /// This happens in the background at the configured interval; an
    /// explicit call is only needed to reclaim space sooner. It rewrites the
    /// whole file, so it is expensive.
    pub fn compact(&self) -> Result<()> {
        self.inner.lock()?.compact()
    }

    /// Returns the live (key, value) pairs whose key contains `term`,
    /// skipping the first `skip` matches and returning at most `limit`
    /// (zero meaning all of them).
    ///
    /// Fails with [`Error::Unsupported`] unless the store was opened with
    /// search enabled.
    pub fn search(&self, term: &[u8], skip: u64, limit: u64) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.inner.lock()?.search(term, skip, limit)
    }

    /// Stops the background compactor and releases the store's resources.
    /// Idempotent; operations after a close fail.
    pub fn close(&mut self) -> Result<()> {
        if self.is_closed {
            return Ok(());
        }

        // holding the lock first drains any in-flight compaction tick
        let mut inner = self.inner.lock()?;
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.shutdown();
        }
        inner.close();
        drop(inner);

        self.is_closed = true;
        tracing::debug!("store closed");
        Ok(())
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl StoreInner {
    fn set(&mut self, key: &[u8], value: &[u8], ttl: Option<u64>) -> Result<()> {
        self.ensure_open()?;

        let expiry = match ttl {
            Some(ttl) => now_unix_secs() + ttl,
            None => 0,
        };

        let initial_offset = self.header.index_offset(key);

        for n in 0..self.header.number_of_index_blocks() {
            let slot_offset = self.header.index_offset_in_nth_block(initial_offset, n)?;
            let kv_offset = encoding::u64_from(&self.pool.read_index(slot_offset)?, 0)?;

            // an empty slot means insert; a slot already holding this key's
            // record (live or stale) means update
            let is_for_key =
                kv_offset == 0 || self.pool.addr_belongs_to_key(kv_offset, key)?;

            if is_for_key {
                let entry = KeyValueEntry::new(key, value, expiry);
                let kv_address = self.pool.append(&entry.as_bytes())?;
                self.pool.update_index(slot_offset, &kv_address.to_be_bytes())?;

                if let Some(index) = self.search_index.as_mut() {
                    index.add(key, kv_address, expiry)?;
                }
                return Ok(());
            }
        }

        Err(Error::collision_saturation(key))
    }

    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;

        let initial_offset = self.header.index_offset(key);

        for n in 0..self.header.number_of_index_blocks() {
            let slot_offset = self.header.index_offset_in_nth_block(initial_offset, n)?;
            let kv_offset = encoding::u64_from(&self.pool.read_index(slot_offset)?, 0)?;
            if kv_offset == 0 {
                continue;
            }

            // a None here is a hash collision with another key; keep probing
            if let Some(entry) = self.pool.get_value(kv_offset, key)? {
                return Ok(Some(entry.value));
            }
        }

        Ok(None)
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.ensure_open()?;

        let initial_offset = self.header.index_offset(key);

        for n in 0..self.header.number_of_index_blocks() {
            let slot_offset = self.header.index_offset_in_nth_block(initial_offset, n)?;
            let kv_offset = encoding::u64_from(&self.pool.read_index(slot_offset)?, 0)?;
            if kv_offset == 0 {
                continue;
            }

            if self.pool.try_delete_kv_entry(kv_offset, key)? {
                if let Some(index) = self.search_index.as_mut() {
                    index.remove(key)?;
                }
                return Ok(());
            }
        }

        // a missing key is not an error
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.ensure_open()?;

        self.pool.clear_file()?;
        if let Some(index) = self.search_index.as_mut() {
            index.clear()?;
        }
        Ok(())
    }

    pub(crate) fn compact(&mut self) -> Result<()> {
        if self.closed {
            // a straggling timer tick after close is a no-op
            return Ok(());
        }

        self.pool.compact_file(self.search_index.as_mut())
    }

    fn search(&mut self, term: &[u8], skip: u64, limit: u64) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.ensure_open()?;

        let index = self
            .search_index
            .as_mut()
            .ok_or_else(|| Error::Unsupported("search not supported".to_string()))?;

        let kv_addresses = index.search(term, skip, limit)?;
        self.pool.read_kv_for_search(&kv_addresses)
    }

    fn close(&mut self) {
        self.pool.drop_buffers();
        self.closed = true;
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::IO("store is closed".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tmpfs::TempDir;
    use std::time::Duration;

    /// hey..mulimuta in their insertion order
    fn records() -> Vec<(&'static [u8], &'static [u8])> {
        vec![
            (&b"hey"[..], &b"English"[..]),
            (&b"hi"[..], &b"English"[..]),
            (&b"salut"[..], &b"French"[..]),
            (&b"bonjour"[..], &b"French"[..]),
            (&b"hola"[..], &b"Spanish"[..]),
            (&b"oi"[..], &b"Portuguese"[..]),
            (&b"mulimuta"[..], &b"Runyoro"[..]),
        ]
    }

    fn search_records() -> Vec<(&'static [u8], &'static [u8])> {
        vec![
            (&b"foo"[..], &b"eng"[..]),
            (&b"fore"[..], &b"span"[..]),
            (&b"food"[..], &b"lug"[..]),
            (&b"bar"[..], &b"port"[..]),
            (&b"band"[..], &b"nyoro"[..]),
            (&b"pig"[..], &b"dan"[..]),
        ]
    }

    fn test_config(dir: &TempDir) -> StoreConfig {
        // timers are exercised separately; keep unit stores timer-free
        StoreConfig::new(dir.path().to_str().unwrap())
            .max_keys(1000)
            .compaction_interval(Duration::ZERO)
    }

    fn open_store(dir: &TempDir) -> Store {
        Store::open_with_config(test_config(dir)).expect("open store")
    }

    fn open_search_store(dir: &TempDir) -> Store {
        Store::open_with_config(test_config(dir).search_enabled(true)).expect("open store")
    }

    fn data_file_size(dir: &TempDir) -> u64 {
        std::fs::metadata(dir.path().join(DATA_FILE)).unwrap().len()
    }

    #[test]
    fn test_set_and_get() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        for (key, value) in records() {
            store.set(key, value, None).unwrap();
            assert_eq!(store.get(key).unwrap().as_deref(), Some(value));
        }

        assert_eq!(store.get(b"missing").unwrap(), None);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = open_store(&dir);
            for (key, value) in records() {
                store.set(key, value, None).unwrap();
            }
            store.close().unwrap();
        }

        let store = open_store(&dir);
        assert_eq!(store.get(b"hey").unwrap().as_deref(), Some(&b"English"[..]));
        assert_eq!(
            store.get(b"mulimuta").unwrap().as_deref(),
            Some(&b"Runyoro"[..])
        );
    }

    #[test]
    fn test_ttl_expiry() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let all = records();
        for (key, value) in &all[..3] {
            store.set(key, value, None).unwrap();
        }
        for (key, value) in &all[3..] {
            store.set(key, value, Some(1)).unwrap();
        }

        std::thread::sleep(Duration::from_secs(2));

        for (key, _) in &all[3..] {
            assert_eq!(store.get(key).unwrap(), None);
        }
        for (key, value) in &all[..3] {
            assert_eq!(store.get(key).unwrap().as_deref(), Some(*value));
        }
    }

    #[test]
    fn test_update_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        for (key, value) in records() {
            store.set(key, value, None).unwrap();
        }
        store.set(b"hey", b"Jane", None).unwrap();
        store.set(b"hola", b"Santos", None).unwrap();

        assert_eq!(store.get(b"hey").unwrap().as_deref(), Some(&b"Jane"[..]));
        assert_eq!(store.get(b"hola").unwrap().as_deref(), Some(&b"Santos"[..]));
        assert_eq!(store.get(b"salut").unwrap().as_deref(), Some(&b"French"[..]));
    }

    #[test]
    fn test_compact_shrinks_file_and_keeps_live_keys() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let all = records();
        for (key, value) in &all[..3] {
            store.set(key, value, None).unwrap();
        }
        for (key, value) in &all[3..] {
            store.set(key, value, Some(1)).unwrap();
        }
        store.delete(b"salut").unwrap();

        let size_before = data_file_size(&dir);
        std::thread::sleep(Duration::from_secs(3));
        store.compact().unwrap();

        assert!(data_file_size(&dir) < size_before);
        for (key, value) in &all[..2] {
            assert_eq!(store.get(key).unwrap().as_deref(), Some(*value));
        }
        assert_eq!(store.get(b"salut").unwrap(), None);
        for (key, _) in &all[3..] {
            assert_eq!(store.get(key).unwrap(), None);
        }
    }

    #[test]
    fn test_updates_leave_one_record_after_compact() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let empty_size = data_file_size(&dir);
        store.set(b"hey", b"English", None).unwrap();
        store.set(b"hey", b"Jane", None).unwrap();
        store.set(b"hey", b"Doe", None).unwrap();

        store.compact().unwrap();

        let record_len = KeyValueEntry::new(b"hey", b"Doe", 0).as_bytes().len() as u64;
        assert_eq!(data_file_size(&dir), empty_size + record_len);
        assert_eq!(store.get(b"hey").unwrap().as_deref(), Some(&b"Doe"[..]));
    }

    #[test]
    fn test_delete_then_set_again() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.set(b"oi", b"Portuguese", None).unwrap();
        store.delete(b"oi").unwrap();
        assert_eq!(store.get(b"oi").unwrap(), None);

        // deleting a missing key is fine
        store.delete(b"oi").unwrap();
        store.delete(b"never-there").unwrap();

        store.set(b"oi", b"Brazilian", None).unwrap();
        assert_eq!(store.get(b"oi").unwrap().as_deref(), Some(&b"Brazilian"[..]));
    }

    #[test]
    fn test_clear() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let empty_size = data_file_size(&dir);
        for (key, value) in records() {
            store.set(key, value, None).unwrap();
        }
        assert!(data_file_size(&dir) > empty_size);

        store.clear().unwrap();

        for (key, _) in records() {
            assert_eq!(store.get(key).unwrap(), None);
        }
        assert_eq!(data_file_size(&dir), empty_size);
    }

    #[test]
    fn test_search() {
        let dir = TempDir::new().unwrap();
        let store = open_search_store(&dir);

        for (key, value) in search_records() {
            store.set(key, value, None).unwrap();
        }

        assert_eq!(
            store.search(b"fo", 0, 0).unwrap(),
            vec![
                (b"foo".to_vec(), b"eng".to_vec()),
                (b"fore".to_vec(), b"span".to_vec()),
                (b"food".to_vec(), b"lug".to_vec()),
            ]
        );
        assert_eq!(
            store.search(b"foo", 0, 0).unwrap(),
            vec![
                (b"foo".to_vec(), b"eng".to_vec()),
                (b"food".to_vec(), b"lug".to_vec()),
            ]
        );
        assert_eq!(
            store.search(b"fo", 1, 2).unwrap(),
            vec![
                (b"fore".to_vec(), b"span".to_vec()),
                (b"food".to_vec(), b"lug".to_vec()),
            ]
        );
        assert_eq!(store.search(b"pigg", 0, 0).unwrap(), Vec::new());
        assert_eq!(store.search(b"ba", 0, 0).unwrap().len(), 2);
    }

    #[test]
    fn test_search_disabled() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.set(b"foo", b"eng", None).unwrap();
        assert!(matches!(
            store.search(b"f", 0, 0),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn test_search_tracks_deletes_and_updates() {
        let dir = TempDir::new().unwrap();
        let store = open_search_store(&dir);

        store.set(b"foo", b"eng", None).unwrap();
        store.set(b"food", b"lug", None).unwrap();

        store.delete(b"foo").unwrap();
        assert_eq!(
            store.search(b"fo", 0, 0).unwrap(),
            vec![(b"food".to_vec(), b"lug".to_vec())]
        );

        store.set(b"foo", b"english", None).unwrap();
        assert_eq!(
            store.search(b"foo", 0, 0).unwrap(),
            vec![
                (b"foo".to_vec(), b"english".to_vec()),
                (b"food".to_vec(), b"lug".to_vec()),
            ]
        );
    }

    #[test]
    fn test_search_omits_expired_keys() {
        let dir = TempDir::new().unwrap();
        let store = open_search_store(&dir);

        store.set(b"bar", b"port", Some(1)).unwrap();
        store.set(b"band", b"nyoro", None).unwrap();

        std::thread::sleep(Duration::from_secs(2));

        assert_eq!(
            store.search(b"ba", 0, 0).unwrap(),
            vec![(b"band".to_vec(), b"nyoro".to_vec())]
        );
    }

    #[test]
    fn test_search_survives_compaction() {
        let dir = TempDir::new().unwrap();
        let store = open_search_store(&dir);

        store.set(b"foo", b"eng", None).unwrap();
        store.set(b"food", b"lug", None).unwrap();
        store.delete(b"food").unwrap();

        store.compact().unwrap();

        assert_eq!(
            store.search(b"fo", 0, 0).unwrap(),
            vec![(b"foo".to_vec(), b"eng".to_vec())]
        );
        assert_eq!(store.get(b"foo").unwrap().as_deref(), Some(&b"eng"[..]));
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);

        store.set(b"hey", b"English", None).unwrap();
        store.close().unwrap();
        store.close().unwrap();

        assert!(matches!(store.get(b"hey"), Err(Error::IO(_))));
        assert!(matches!(store.set(b"hi", b"x", None), Err(Error::IO(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_background_compaction_reclaims_space() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir).compaction_interval(Duration::from_secs(1));
        let store = Store::open_with_config(config).expect("open store");

        store.set(b"hey", b"English", None).unwrap();
        store.set(b"salut", b"French", None).unwrap();
        store.delete(b"salut").unwrap();
        let size_before = data_file_size(&dir);

        tokio::time::sleep(Duration::from_millis(2500)).await;

        assert!(data_file_size(&dir) < size_before);
        assert_eq!(store.get(b"hey").unwrap().as_deref(), Some(&b"English"[..]));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_close_stops_background_compaction() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir).compaction_interval(Duration::from_millis(50));
        let mut store = Store::open_with_config(config).expect("open store");

        store.set(b"hey", b"English", None).unwrap();
        store.close().unwrap();

        // no straggling tick may touch the closed store
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(matches!(store.get(b"hey"), Err(Error::IO(_))));
    }
}
