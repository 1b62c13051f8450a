//! TALLY Core - Entity Types
//!
//! Pure data structures with no I/O. The storage crate depends on this.
//! Resources and measures are the only entities the cache interprets; every
//! other field of the surrounding analysis model stays opaque to it.

pub mod config;
pub mod entities;
pub mod error;

pub use config::EngineConfig;
pub use entities::{Characteristic, Measure, Qualifier, Resource, RuleKey};
pub use error::{
    CodecError, ConfigError, EngineError, KeyError, RegistryError, TallyError, TallyResult,
    ValidationError,
};
