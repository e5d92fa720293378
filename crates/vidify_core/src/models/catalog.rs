//! Pipeline catalog: a base definition plus its named variants.
//!
//! Catalogs are loaded from TOML files of the form:
//!
//! ```toml
//! version = "1.0.0"
//!
//! [[stages]]
//! name = "validation"
//! order = 0
//! configuration = { allowed_formats = ["mp4", "mov"] }
//!
//! [[stages]]
//! name = "transcoding"
//! order = 1
//! depends_on = ["validation"]
//!
//! [hooks]
//! after_validation = "approval-gate"
//!
//! [variants.quick-preview.overrides.transcoding]
//! resolutions = [{ name = "360p", width = 640, height = 360, bitrate = "800k" }]
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::definition::{DefinitionError, HookRefs, PipelineDefinition, StageDefinition};
use super::variant::VariantRegistry;

/// Errors raised while loading a catalog.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to read pipeline catalog {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse pipeline catalog: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid pipeline definition: {0}")]
    Invalid(#[from] DefinitionError),

    #[error("Variant '{variant}' overrides unknown stage '{stage}'")]
    VariantStage { variant: String, stage: String },
}

/// On-disk layout of a catalog file.
#[derive(Debug, Serialize, Deserialize)]
struct CatalogFile {
    #[serde(default = "default_version")]
    version: String,
    stages: Vec<StageDefinition>,
    #[serde(default)]
    hooks: HookRefs,
    #[serde(default)]
    variants: VariantRegistry,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

/// A validated base definition with its variant registry.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineCatalog {
    definition: PipelineDefinition,
    variants: VariantRegistry,
}

impl PipelineCatalog {
    /// Build a catalog, validating the definition and every variant.
    pub fn new(
        definition: PipelineDefinition,
        variants: VariantRegistry,
    ) -> Result<Self, CatalogError> {
        definition.validate()?;

        for (name, variant) in variants.iter() {
            if let Some(stage) = variant
                .overrides
                .keys()
                .find(|stage| definition.stage(stage).is_none())
            {
                return Err(CatalogError::VariantStage {
                    variant: name.to_string(),
                    stage: stage.clone(),
                });
            }
        }

        Ok(Self {
            definition,
            variants,
        })
    }

    /// Parse a catalog from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = toml::from_str(content)?;
        let definition = PipelineDefinition {
            version: file.version,
            stages: file.stages,
            hooks: file.hooks,
        };
        Self::new(definition, file.variants)
    }

    /// Load a catalog from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let catalog = Self::from_toml_str(&content)?;
        tracing::info!(
            path = %path.display(),
            stages = catalog.definition.stages.len(),
            variants = catalog.variants.len(),
            "Loaded pipeline catalog"
        );
        Ok(catalog)
    }

    pub fn definition(&self) -> &PipelineDefinition {
        &self.definition
    }

    pub fn variants(&self) -> &VariantRegistry {
        &self.variants
    }

    /// Split into the definition and the registry.
    pub fn into_parts(self) -> (PipelineDefinition, VariantRegistry) {
        (self.definition, self.variants)
    }
}
