use std::path::PathBuf;
use std::time::Duration;

use crate::buffers::DEFAULT_POOL_CAPACITY;

/// Configuration for a [`Store`](crate::Store).
///
/// The sizing fields (`max_keys`, `redundant_blocks`, `block_size`) are only
/// honored when the files are first created; on reopen the headers stored on
/// disk win and these are ignored.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding the data file and, when search is enabled, the
    /// index file. Created if missing.
    pub dir: PathBuf,

    /// Maximum number of keys the store can hold (default: 1,000,000)
    pub max_keys: Option<u64>,

    /// Extra index blocks that absorb hash collisions as the store fills up
    /// (default: 1)
    pub redundant_blocks: Option<u16>,

    /// Size of one index block and of one cache buffer (default: 4096)
    pub block_size: Option<u32>,

    /// Total number of buffers in the cache pool (default: 5)
    pub pool_capacity: usize,

    /// How often the background compactor runs; zero disables it
    /// (default: 1h)
    pub compaction_interval: Duration,

    /// Maintain the inverted index that backs prefix search (default: false)
    pub search_enabled: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./emberdb"),
            max_keys: None,
            redundant_blocks: None,
            block_size: None,
            pool_capacity: DEFAULT_POOL_CAPACITY,
            compaction_interval: Duration::from_secs(3600),
            search_enabled: false,
        }
    }
}

impl StoreConfig {
    /// Create a new config with the given directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Set the maximum number of keys
    pub fn max_keys(mut self, max_keys: u64) -> Self {
        self.max_keys = Some(max_keys);
        self
    }

    /// Set the number of redundant index blocks
    pub fn redundant_blocks(mut self, redundant_blocks: u16) -> Self {
        self.redundant_blocks = Some(redundant_blocks);
        self
    }

    /// Set the index-block and cache-buffer size
    pub fn block_size(mut self, block_size: u32) -> Self {
        self.block_size = Some(block_size);
        self
    }

    /// Set the cache pool capacity
    pub fn pool_capacity(mut self, pool_capacity: usize) -> Self {
        self.pool_capacity = pool_capacity;
        self
    }

    /// Set the background compaction interval; zero disables the compactor
    pub fn compaction_interval(mut self, interval: Duration) -> Self {
        self.compaction_interval = interval;
        self
    }

    /// Enable prefix search over keys
    pub fn search_enabled(mut self, enabled: bool) -> Self {
        self.search_enabled = enabled;
        self
    }
}
