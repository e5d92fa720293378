//! Data models for the Vidify pipeline.
//!
//! - Stage and pipeline definitions (the immutable base workflow)
//! - Variants (named partial overrides)
//! - Effective configuration (the resolved, per-job pipeline)
//! - Pipeline catalogs and the built-in standard catalog

mod catalog;
mod definition;
mod effective;
mod standard;
mod variant;

pub use catalog::{CatalogError, PipelineCatalog};
pub use definition::{
    DefinitionError, HookPoint, HookRefs, PipelineDefinition, StageConfiguration, StageDefinition,
};
pub use effective::EffectiveConfig;
pub use standard::{standard_catalog, standard_definition, standard_variants};
pub use variant::{StageOverride, Variant, VariantRegistry};
