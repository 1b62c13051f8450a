//! Cache of all measures computed during a batch run.
//!
//! Shared by every module analysed in the run. Measures are keyed by
//!
//! ```text
//! (resource effective key, metric key, discriminator)
//! ```
//!
//! so "everything for a resource" and "everything for a resource and metric"
//! are both prefix scans.

use tally_core::{Measure, Resource, TallyResult, ValidationError};

use crate::cache::{CacheKey, CacheRegistry, CompositeKeyStore, EntryScan, ValueScan};

/// Name of the backing cache.
pub const MEASURES_CACHE: &str = "measures";

/// Resource- and metric-centric view over the `measures` cache.
#[derive(Debug, Clone)]
pub struct MeasureCache {
    cache: CompositeKeyStore<Measure>,
}

impl MeasureCache {
    pub fn new(registry: &CacheRegistry) -> TallyResult<Self> {
        Ok(Self {
            cache: registry.create_cache(MEASURES_CACHE)?,
        })
    }

    pub fn entries(&self) -> EntryScan<Measure> {
        self.cache.entries()
    }

    /// All measures of `resource`, ordered by metric key then discriminator.
    pub fn by_resource(&self, resource: &Resource) -> TallyResult<ValueScan<Measure>> {
        let prefix = CacheKey::single(effective_key(resource)?);
        Ok(self.cache.values(&prefix))
    }

    /// All measures of `resource` for one metric.
    pub fn by_metric(
        &self,
        resource: &Resource,
        metric_key: &str,
    ) -> TallyResult<ValueScan<Measure>> {
        let prefix = CacheKey::single(effective_key(resource)?).child(metric_key);
        Ok(self.cache.values(&prefix))
    }

    /// Store `measure` for `resource`, replacing a measure with the same key.
    ///
    /// # Errors
    ///
    /// `ValidationError::RequiredFieldMissing` if the resource has no
    /// effective key or the measure no metric key.
    pub fn put(&self, resource: &Resource, measure: &Measure) -> TallyResult<&Self> {
        let key = Self::key_of(resource, measure)?;
        self.cache.put(&key, measure)?;
        Ok(self)
    }

    pub fn contains(&self, resource: &Resource, measure: &Measure) -> TallyResult<bool> {
        let key = Self::key_of(resource, measure)?;
        self.cache.contains_key(&key)
    }

    /// Full key under which `measure` is stored for `resource`.
    pub fn key_of(resource: &Resource, measure: &Measure) -> TallyResult<CacheKey> {
        let resource_key = effective_key(resource)?;
        let metric_key = measure
            .metric_key()
            .ok_or_else(|| missing("measure.metric_key"))?;

        Ok(CacheKey::single(resource_key)
            .child(metric_key)
            .child(Self::discriminator(measure)))
    }

    /// Third key segment, distinguishing measures of the same metric.
    ///
    /// Layout: `metric|characteristic|person[|rule]`. Absent parts are left
    /// empty but keep their separator; the rule part only exists for
    /// rule-scoped measures. Other components depend on this exact shape.
    pub fn discriminator(measure: &Measure) -> String {
        let mut key = String::new();
        if let Some(metric_key) = &measure.metric_key {
            key.push_str(metric_key);
        }
        key.push('|');
        if let Some(characteristic) = &measure.characteristic {
            key.push_str(characteristic.key());
        }
        key.push('|');
        if let Some(person_id) = measure.person_id {
            key.push_str(&person_id.to_string());
        }
        if let Some(rule) = &measure.rule {
            key.push('|');
            key.push_str(&rule.to_string());
        }
        key
    }
}

fn effective_key(resource: &Resource) -> TallyResult<&str> {
    resource
        .effective_key()
        .ok_or_else(|| missing("resource.effective_key").into())
}

fn missing(field: &str) -> ValidationError {
    ValidationError::RequiredFieldMissing {
        field: field.to_string(),
    }
}
