//! TALLY Test Utilities
//!
//! Shared test infrastructure for the TALLY workspace:
//! - Proptest generators for keys and measure entities
//! - Fixtures for configs, resources and measures
//! - A scratch registry harness that cleans up after itself
//! - Assertions for TALLY error variants

pub use tally_core::{
    Characteristic, CodecError, ConfigError, EngineConfig, EngineError, KeyError, Measure,
    Qualifier, RegistryError, Resource, RuleKey, TallyError, TallyResult, ValidationError,
};
pub use tally_storage::{
    CacheKey, CacheRegistry, CompositeKeyStore, MeasureCache, TempFolder, TempRoot,
};

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for keys and measure entities.

    use super::*;
    use proptest::prelude::*;

    /// A key segment. Includes NUL and the `0xFF`/`0x01` escape neighbours
    /// so encoding edge cases come up often.
    pub fn arb_segment() -> impl Strategy<Value = String> {
        prop_oneof![
            3 => "[a-z0-9:._-]{0,8}",
            1 => "[a\\x00\\x01\u{ff}]{0,4}",
        ]
    }

    /// A key of one to four segments.
    pub fn arb_key() -> impl Strategy<Value = CacheKey> {
        prop::collection::vec(arb_segment(), 1..=4).prop_filter_map("non-empty key", |segments| {
            CacheKey::new(segments).ok()
        })
    }

    pub fn arb_qualifier() -> impl Strategy<Value = Qualifier> {
        prop_oneof![
            Just(Qualifier::Project),
            Just(Qualifier::Module),
            Just(Qualifier::Directory),
            Just(Qualifier::File),
            Just(Qualifier::UnitTest),
        ]
    }

    /// An indexed resource, i.e. one that can own measures.
    pub fn arb_resource() -> impl Strategy<Value = Resource> {
        ("[A-Za-z0-9/._]{1,24}", "R[0-9]{1,4}", arb_qualifier()).prop_map(
            |(key, effective_key, qualifier)| {
                Resource::new(key, qualifier).with_effective_key(effective_key)
            },
        )
    }

    pub fn arb_rule_key() -> impl Strategy<Value = RuleKey> {
        ("[a-z]{2,8}", "[A-Za-z0-9]{1,12}").prop_map(|(repo, rule)| RuleKey::of(repo, rule))
    }

    pub fn arb_characteristic() -> impl Strategy<Value = Characteristic> {
        "[A-Z_]{3,16}".prop_map(Characteristic::new)
    }

    /// A measure bound to a metric. Values are finite so equality holds
    /// after a round trip.
    pub fn arb_measure() -> impl Strategy<Value = Measure> {
        (
            "[a-z_]{1,16}",
            prop::option::of(-1.0e9f64..1.0e9),
            prop::option::of(".{0,64}"),
            prop::option::of(arb_characteristic()),
            prop::option::of(any::<i32>()),
            prop::option::of(arb_rule_key()),
        )
            .prop_map(|(metric, value, data, characteristic, person_id, rule)| Measure {
                metric_key: Some(metric),
                value,
                data,
                characteristic,
                person_id,
                rule,
            })
    }

    /// A measure whose payload is far larger than a default page.
    pub fn arb_large_measure() -> impl Strategy<Value = Measure> {
        (arb_measure(), 8_192usize..40_000).prop_map(|(measure, len)| {
            let data: String = "0=1;".chars().cycle().take(len).collect();
            measure.with_data(data)
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common scenarios.

    use super::*;

    /// Scratch config with a small map so tests stay light on disk.
    pub fn test_config() -> EngineConfig {
        EngineConfig {
            map_size_bytes: 10 * 1024 * 1024,
            ..EngineConfig::scratch()
        }
    }

    /// Same as [`test_config`] but forcing multi-batch scans.
    pub fn small_batch_config(scan_batch_size: usize) -> EngineConfig {
        EngineConfig {
            scan_batch_size,
            ..test_config()
        }
    }

    /// An indexed file resource whose effective key equals `key`.
    pub fn indexed_file(key: &str) -> Resource {
        Resource::new(key, Qualifier::File).with_effective_key(key)
    }

    pub fn unindexed_file(key: &str) -> Resource {
        Resource::new(key, Qualifier::File)
    }

    pub fn measure(metric: &str, value: f64) -> Measure {
        Measure::new(metric).with_value(value)
    }

    pub fn rule_measure(metric: &str, repository: &str, rule: &str) -> Measure {
        Measure::new(metric).for_rule(RuleKey::of(repository, rule))
    }

    pub fn key(segments: &[&str]) -> CacheKey {
        CacheKey::new(segments.iter().copied()).unwrap_or_else(|e| panic!("bad test key: {}", e))
    }
}

// ============================================================================
// REGISTRY HARNESS
// ============================================================================

/// A registry on its own temp root.
///
/// Field order matters: the registry is dropped (and stopped) before the
/// root directory goes away.
pub struct TestRegistry {
    pub registry: CacheRegistry,
    pub root: TempRoot,
}

impl TestRegistry {
    #[track_caller]
    pub fn new() -> Self {
        Self::with_config(fixtures::test_config())
    }

    #[track_caller]
    pub fn with_config(config: EngineConfig) -> Self {
        let root = TempRoot::new().unwrap_or_else(|e| panic!("temp root: {}", e));
        let registry = CacheRegistry::new(&root, config)
            .unwrap_or_else(|e| panic!("registry creation should succeed: {}", e));
        Self { registry, root }
    }

    #[track_caller]
    pub fn measures(&self) -> MeasureCache {
        MeasureCache::new(&self.registry).unwrap_or_else(|e| panic!("measures cache: {}", e))
    }
}

impl Default for TestRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Route `tracing` output to the test writer. `RUST_LOG` picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for TALLY error variants.

    use super::*;

    #[track_caller]
    pub fn assert_engine_closed<T: std::fmt::Debug>(result: &TallyResult<T>) {
        match result {
            Err(TallyError::Engine(EngineError::Closed)) => {}
            other => panic!("Expected EngineClosed, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_duplicate_cache<T: std::fmt::Debug>(result: &TallyResult<T>, name: &str) {
        match result {
            Err(TallyError::Registry(RegistryError::DuplicateCache { name: n })) => {
                assert_eq!(n, name, "Wrong cache name in DuplicateCache error");
            }
            other => panic!("Expected DuplicateCache({}), got: {:?}", name, other),
        }
    }

    #[track_caller]
    pub fn assert_missing_field<T: std::fmt::Debug>(result: &TallyResult<T>, field: &str) {
        match result {
            Err(TallyError::Validation(ValidationError::RequiredFieldMissing { field: f })) => {
                assert_eq!(f, field, "Wrong field in RequiredFieldMissing error");
            }
            other => panic!("Expected RequiredFieldMissing({}), got: {:?}", field, other),
        }
    }
}
