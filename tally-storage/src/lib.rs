//! TALLY Storage - Scratch caches for batch runs
//!
//! A [`CacheRegistry`] owns one temporary LMDB volume per run. Components ask
//! it for named [`CompositeKeyStore`]s, keyed by tuples of string segments,
//! and the whole volume is deleted when the registry stops.
//!
//! ```ignore
//! let temp = TempRoot::new()?;
//! let registry = CacheRegistry::new(&temp, EngineConfig::scratch())?;
//! let measures = MeasureCache::new(&registry)?;
//!
//! measures.put(&file, &Measure::new("ncloc").with_value(120.0))?;
//! for measure in measures.by_resource(&file)?.iter() {
//!     println!("{:?}", measure?);
//! }
//!
//! registry.stop()?;
//! ```

pub mod cache;
pub mod measure_cache;
pub mod temp_folder;

pub use cache::{
    CacheKey, CacheRegistry, CacheValue, CompositeKeyStore, Entries, Entry, EntryScan, KeyScan,
    Keys, StorageEngine, ValueCodec, ValueEncoding, ValueScan, Values, ENGINE_LOG_TARGET,
    MAX_ENCODED_KEY_LEN,
};
pub use measure_cache::{MeasureCache, MEASURES_CACHE};
pub use temp_folder::{TempFolder, TempRoot};
