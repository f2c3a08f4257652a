pub mod buffers;
pub mod config;
pub mod encoding;
pub mod entries;
pub mod error;
pub mod hasher;
pub mod headers;
pub mod scheduler;
pub mod search;
pub mod store;
pub mod tmpfs;

pub use config::StoreConfig;
pub use error::{Error, Result};
pub use store::Store;
