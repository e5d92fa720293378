//! Configuration resolution.
//!
//! `ConfigResolver` turns a base `PipelineDefinition` plus at most one
//! named variant into the `EffectiveConfig` that governs a single job.

mod merge;

pub use merge::{deep_merge, merge_configuration};

use thiserror::Error;

use crate::models::{EffectiveConfig, PipelineDefinition, VariantRegistry};

/// Errors raised while resolving a job's configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Unknown variant '{0}'")]
    UnknownVariant(String),

    #[error("Variant '{variant}' overrides unknown stage '{stage}'")]
    UnknownStage { variant: String, stage: String },
}

/// Result type for resolution.
pub type ResolveResult<T> = Result<T, ResolveError>;

/// Merges a base definition with a variant's overrides.
///
/// The resolver owns its variant registry; the base definition is passed
/// per call and only ever read.
#[derive(Debug, Clone, Default)]
pub struct ConfigResolver {
    variants: VariantRegistry,
}

impl ConfigResolver {
    pub fn new(variants: VariantRegistry) -> Self {
        Self { variants }
    }

    pub fn variants(&self) -> &VariantRegistry {
        &self.variants
    }

    /// Resolve the effective configuration for one job.
    ///
    /// Starts from a deep copy of `base`; when `variant` is given, each of
    /// its stage overrides is deep-merged into the matching stage and any
    /// `enabled` override replaces the stage's flag. The result shares no
    /// data with `base` or the registry.
    pub fn resolve(
        &self,
        base: &PipelineDefinition,
        variant: Option<&str>,
    ) -> ResolveResult<EffectiveConfig> {
        let mut pipeline = base.clone();

        let Some(name) = variant else {
            return Ok(EffectiveConfig::new(None, pipeline));
        };

        let overrides = self
            .variants
            .get(name)
            .ok_or_else(|| ResolveError::UnknownVariant(name.to_string()))?;

        for (stage_name, ov) in &overrides.overrides {
            let stage = pipeline
                .stages
                .iter_mut()
                .find(|s| &s.name == stage_name)
                .ok_or_else(|| ResolveError::UnknownStage {
                    variant: name.to_string(),
                    stage: stage_name.clone(),
                })?;

            merge_configuration(&mut stage.configuration, &ov.configuration);
            if let Some(enabled) = ov.enabled {
                stage.enabled = enabled;
            }
        }

        tracing::debug!(variant = name, "Resolved effective configuration");
        Ok(EffectiveConfig::new(Some(name.to_string()), pipeline))
    }
}
