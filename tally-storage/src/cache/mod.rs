//! Tuple-keyed caches over one temporary LMDB volume.
//!
//! # Layout
//!
//! - [`StorageEngine`] opens the volume inside the run's working directory
//!   and is the only owner of the LMDB environment.
//! - [`CacheRegistry`] hands out named stores, each backed by an LMDB named
//!   database, and tears the volume down at the end of the run.
//! - [`CompositeKeyStore`] maps [`CacheKey`] tuples to values. Keys are
//!   encoded so that byte order matches tuple order, which turns "all entries
//!   under these leading segments" into a single LMDB range scan.
//! - [`ValueCodec`] turns values into bytes. Values whose plain encoding
//!   would not fit in a page are stored zlib-compressed.
//!
//! # Thread Safety
//!
//! Everything here is `Send + Sync`. LMDB serializes writers and lets readers
//! run concurrently; two writers on the same key race and the last commit
//! wins.

pub mod codec;
pub mod engine;
pub mod key;
pub mod registry;
pub mod scan;
pub mod store;

pub use codec::{CacheValue, ValueCodec, ValueEncoding};
pub use engine::{StorageEngine, ENGINE_LOG_TARGET};
pub use key::{CacheKey, MAX_ENCODED_KEY_LEN};
pub use registry::CacheRegistry;
pub use scan::{Entries, EntryScan, KeyScan, Keys, ValueScan, Values};
pub use store::{CompositeKeyStore, Entry};
