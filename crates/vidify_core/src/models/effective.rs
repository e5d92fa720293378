//! The per-job, fully resolved pipeline configuration.

use serde::{Deserialize, Serialize};

use super::definition::{HookRefs, PipelineDefinition, StageDefinition};

/// Fully resolved pipeline governing exactly one job.
///
/// Same shape as a `PipelineDefinition`, with every variant override
/// already applied. It owns all of its data, so later changes to the base
/// definition or to the variant registry never reach an existing value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectiveConfig {
    /// Variant that was applied, if any.
    pub variant: Option<String>,
    /// Resolved pipeline.
    pub pipeline: PipelineDefinition,
}

impl EffectiveConfig {
    pub(crate) fn new(variant: Option<String>, pipeline: PipelineDefinition) -> Self {
        Self { variant, pipeline }
    }

    /// All stages, enabled or not, in declaration order.
    pub fn stages(&self) -> &[StageDefinition] {
        &self.pipeline.stages
    }

    pub fn stage(&self, name: &str) -> Option<&StageDefinition> {
        self.pipeline.stage(name)
    }

    /// Whether the named stage exists and is enabled.
    pub fn is_enabled(&self, name: &str) -> bool {
        self.stage(name).is_some_and(|s| s.enabled)
    }

    pub fn hooks(&self) -> &HookRefs {
        &self.pipeline.hooks
    }

    pub fn version(&self) -> &str {
        &self.pipeline.version
    }
}
