//! Configuration types

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Storage engine configuration.
///
/// Missing fields in a TOML document fall back to [`EngineConfig::scratch`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Largest stored value (frame tag included) kept uncompressed.
    pub page_size: usize,
    /// Upper bound of the memory map backing the volume.
    pub map_size_bytes: usize,
    /// Maximum number of named caches in one volume.
    pub max_caches: u32,
    /// Entries fetched per read transaction while scanning.
    pub scan_batch_size: usize,
    /// zlib level (0-9) for compressed frames.
    pub compression_level: u32,
}

impl EngineConfig {
    /// Defaults for a per-run scratch volume.
    pub fn scratch() -> Self {
        Self {
            page_size: 8192,
            map_size_bytes: 1024 * 1024 * 1024,
            max_caches: 32,
            scan_batch_size: 256,
            compression_level: 6,
        }
    }

    /// Parse a TOML document, then validate it.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size < 512 || !self.page_size.is_power_of_two() {
            return Err(invalid(
                "page_size",
                self.page_size,
                "must be a power of two of at least 512",
            ));
        }
        if self.map_size_bytes < self.page_size {
            return Err(invalid(
                "map_size_bytes",
                self.map_size_bytes,
                "must be at least one page",
            ));
        }
        if self.max_caches == 0 {
            return Err(invalid("max_caches", self.max_caches, "must be positive"));
        }
        if self.scan_batch_size == 0 {
            return Err(invalid(
                "scan_batch_size",
                self.scan_batch_size,
                "must be positive",
            ));
        }
        if self.compression_level > 9 {
            return Err(invalid(
                "compression_level",
                self.compression_level,
                "must be between 0 and 9",
            ));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::scratch()
    }
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scratch_is_valid() {
        assert!(EngineConfig::scratch().validate().is_ok());
        assert_eq!(EngineConfig::default(), EngineConfig::scratch());
    }

    #[test]
    fn test_from_toml_partial_override() {
        let config = EngineConfig::from_toml_str("page_size = 4096\nscan_batch_size = 8\n")
            .expect("config should parse");
        assert_eq!(config.page_size, 4096);
        assert_eq!(config.scan_batch_size, 8);
        assert_eq!(config.max_caches, EngineConfig::scratch().max_caches);
    }

    #[test]
    fn test_from_toml_rejects_garbage() {
        let err = EngineConfig::from_toml_str("page_size = \"big\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let cases = [
            EngineConfig {
                page_size: 1000,
                ..EngineConfig::scratch()
            },
            EngineConfig {
                page_size: 256,
                ..EngineConfig::scratch()
            },
            EngineConfig {
                map_size_bytes: 1024,
                ..EngineConfig::scratch()
            },
            EngineConfig {
                max_caches: 0,
                ..EngineConfig::scratch()
            },
            EngineConfig {
                scan_batch_size: 0,
                ..EngineConfig::scratch()
            },
            EngineConfig {
                compression_level: 10,
                ..EngineConfig::scratch()
            },
        ];
        for config in cases {
            assert!(
                matches!(config.validate(), Err(ConfigError::InvalidValue { .. })),
                "{:?} should be rejected",
                config
            );
        }
    }
}
