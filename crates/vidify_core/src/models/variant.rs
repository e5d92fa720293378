//! Named variants: partial overrides applied on top of the base pipeline.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::definition::StageConfiguration;

/// Partial override for one stage.
///
/// `configuration` is deep-merged into the stage configuration and
/// `enabled`, when present, replaces the stage's enablement flag.
///
/// When deserializing, configuration keys may also be written directly
/// on the override instead of under a `configuration` table; both forms
/// end up in `configuration`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawStageOverride")]
pub struct StageOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "StageConfiguration::is_empty")]
    pub configuration: StageConfiguration,
}

#[derive(Deserialize)]
struct RawStageOverride {
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    configuration: StageConfiguration,
    #[serde(flatten)]
    inline: StageConfiguration,
}

impl From<RawStageOverride> for StageOverride {
    fn from(raw: RawStageOverride) -> Self {
        let mut configuration = raw.configuration;
        for (key, value) in raw.inline {
            configuration.insert(key, value);
        }
        Self {
            enabled: raw.enabled,
            configuration,
        }
    }
}

impl StageOverride {
    /// An override that only flips the enabled flag.
    pub fn enabled(enabled: bool) -> Self {
        Self {
            enabled: Some(enabled),
            configuration: StageConfiguration::new(),
        }
    }

    /// An override that only touches configuration. Non-object values are ignored.
    pub fn configure(configuration: serde_json::Value) -> Self {
        let mut ov = Self::default();
        if let serde_json::Value::Object(map) = configuration {
            ov.configuration = map;
        }
        ov
    }

    /// Add configuration to this override (builder pattern).
    pub fn with_configuration(mut self, configuration: serde_json::Value) -> Self {
        if let serde_json::Value::Object(map) = configuration {
            self.configuration.extend(map);
        }
        self
    }
}

/// A named set of stage overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Stage name → override.
    #[serde(default)]
    pub overrides: BTreeMap<String, StageOverride>,
}

impl Variant {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            overrides: BTreeMap::new(),
        }
    }

    /// Add a stage override (builder pattern).
    pub fn with_override(mut self, stage: impl Into<String>, ov: StageOverride) -> Self {
        self.overrides.insert(stage.into(), ov);
        self
    }
}

/// Registry of variants keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariantRegistry {
    variants: BTreeMap<String, Variant>,
}

impl VariantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, variant: Variant) {
        self.variants.insert(name.into(), variant);
    }

    /// Add a variant (builder pattern).
    pub fn with_variant(mut self, name: impl Into<String>, variant: Variant) -> Self {
        self.insert(name, variant);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Variant> {
        self.variants.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.variants.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.variants.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Variant)> {
        self.variants.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }
}
