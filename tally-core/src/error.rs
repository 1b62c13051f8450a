//! Error types for TALLY operations

use thiserror::Error;

/// Storage engine errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("Failed to start caches: {reason}")]
    InitFailed { reason: String },

    #[error("Caches are not initialized or already stopped")]
    Closed,

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Engine lock poisoned")]
    LockPoisoned,
}

/// Cache registry errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Cache is already created: {name}")]
    DuplicateCache { name: String },
}

/// Composite key errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("Cache key must have at least one segment")]
    Empty,

    #[error("Encoded cache key is {len} bytes, engine limit is {max}")]
    TooLong { len: usize, max: usize },

    #[error("Malformed cache key: {reason}")]
    Malformed { reason: String },
}

/// Value encoding errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Serialization failed: {reason}")]
    Serialize { reason: String },

    #[error("Compression failed: {reason}")]
    Compress { reason: String },

    #[error("Deserialization failed: {reason}")]
    Deserialize { reason: String },

    #[error("Unknown value frame tag: {tag:#04x}")]
    UnknownFrame { tag: u8 },

    #[error("Stored value is empty")]
    EmptyFrame,
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },
}

/// Master error type for all TALLY errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TallyError {
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl TallyError {
    /// True when the operation failed because the engine is no longer open.
    pub fn is_engine_closed(&self) -> bool {
        matches!(self, TallyError::Engine(EngineError::Closed))
    }
}

/// Result type alias for TALLY operations.
pub type TallyResult<T> = Result<T, TallyError>;

// =============================================================================
// TESTS
// =============================================================================
