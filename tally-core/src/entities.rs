//! Analysis entities seen by the measure cache.
//!
//! The cache only reads identity fields: a resource's effective key, and a
//! measure's metric key, characteristic, person and rule. Everything else is
//! carried as payload.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// RESOURCES
// ============================================================================

/// Kind of analysed resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Qualifier {
    Project,
    Module,
    Directory,
    File,
    UnitTest,
}

impl Qualifier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Qualifier::Project => "TRK",
            Qualifier::Module => "BRC",
            Qualifier::Directory => "DIR",
            Qualifier::File => "FIL",
            Qualifier::UnitTest => "UTS",
        }
    }
}

impl fmt::Display for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A resource (project, module, directory, file) being analysed.
///
/// `effective_key` is assigned once the resource has been indexed within its
/// project. Until then it is `None` and the resource cannot own measures.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resource {
    pub key: String,
    pub effective_key: Option<String>,
    pub qualifier: Qualifier,
}

impl Resource {
    pub fn new(key: impl Into<String>, qualifier: Qualifier) -> Self {
        Self {
            key: key.into(),
            effective_key: None,
            qualifier,
        }
    }

    /// Set the project-qualified key under which the resource was indexed.
    pub fn with_effective_key(mut self, effective_key: impl Into<String>) -> Self {
        self.effective_key = Some(effective_key.into());
        self
    }

    pub fn effective_key(&self) -> Option<&str> {
        self.effective_key.as_deref()
    }
}

// ============================================================================
// RULES & CHARACTERISTICS
// ============================================================================

/// Rule identity, rendered as `repository:rule` (e.g. `squid:S100`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuleKey {
    pub repository: String,
    pub rule: String,
}

impl RuleKey {
    pub fn of(repository: impl Into<String>, rule: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            rule: rule.into(),
        }
    }

    /// Parse `repository:rule`. The rule part may itself contain colons.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        match s.split_once(':') {
            Some((repository, rule)) if !repository.is_empty() && !rule.is_empty() => {
                Ok(Self::of(repository, rule))
            }
            _ => Err(ValidationError::InvalidValue {
                field: "rule_key".to_string(),
                reason: format!("expected <repository>:<rule>, got {:?}", s),
            }),
        }
    }
}

impl fmt::Display for RuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.rule)
    }
}

impl FromStr for RuleKey {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Technical-debt characteristic a measure can be attached to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Characteristic {
    pub key: String,
    pub name: Option<String>,
}

impl Characteristic {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

// ============================================================================
// MEASURES
// ============================================================================

/// A computed metric value for a resource.
///
/// A measure is rule-scoped when `rule` is set. `data` holds free-form
/// payloads (distributions, line hit maps, JSON blobs) and is what makes
/// measures routinely larger than a storage page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measure {
    pub metric_key: Option<String>,
    pub value: Option<f64>,
    pub data: Option<String>,
    pub characteristic: Option<Characteristic>,
    pub person_id: Option<i32>,
    pub rule: Option<RuleKey>,
}

impl Measure {
    pub fn new(metric_key: impl Into<String>) -> Self {
        Self {
            metric_key: Some(metric_key.into()),
            value: None,
            data: None,
            characteristic: None,
            person_id: None,
            rule: None,
        }
    }

    /// A measure that is not yet bound to a metric.
    pub fn unbound() -> Self {
        Self {
            metric_key: None,
            value: None,
            data: None,
            characteristic: None,
            person_id: None,
            rule: None,
        }
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn with_characteristic(mut self, characteristic: Characteristic) -> Self {
        self.characteristic = Some(characteristic);
        self
    }

    pub fn with_person_id(mut self, person_id: i32) -> Self {
        self.person_id = Some(person_id);
        self
    }

    /// Scope the measure to a single rule.
    pub fn for_rule(mut self, rule: RuleKey) -> Self {
        self.rule = Some(rule);
        self
    }

    pub fn metric_key(&self) -> Option<&str> {
        self.metric_key.as_deref()
    }

    pub fn is_rule_scoped(&self) -> bool {
        self.rule.is_some()
    }
}
