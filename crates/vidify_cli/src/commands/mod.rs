//! Subcommand implementations.

pub mod config;
pub mod resolve;
pub mod run;
pub mod stages;

use std::path::Path;

use anyhow::{Context as _, Result};

use vidify_core::config::{ConfigManager, Settings};
use vidify_core::models::{standard_catalog, PipelineCatalog};

/// Load settings, falling back to defaults when the file does not exist.
pub fn load_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Ok(Settings::default());
    }
    let mut manager = ConfigManager::new(path);
    manager
        .load()
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    Ok(manager.into_settings())
}

/// Catalog from `--pipeline`, else from settings, else the built-in one.
pub fn load_catalog(pipeline: Option<&Path>, settings: &Settings) -> Result<PipelineCatalog> {
    let path = pipeline
        .map(Path::to_path_buf)
        .or_else(|| settings.paths.pipeline_catalog());

    match path {
        Some(path) => PipelineCatalog::load(&path)
            .with_context(|| format!("Failed to load pipeline catalog {}", path.display())),
        None => Ok(standard_catalog()),
    }
}
