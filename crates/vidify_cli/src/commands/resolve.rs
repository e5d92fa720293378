//! `vidify resolve`: print an effective configuration.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Args;

use vidify_core::config::Settings;
use vidify_core::resolver::ConfigResolver;

use super::load_catalog;

#[derive(Args)]
pub struct ResolveCommand {
    /// Pipeline catalog file (defaults to the configured or built-in catalog)
    #[arg(long)]
    pipeline: Option<PathBuf>,

    /// Variant to apply
    #[arg(short, long)]
    variant: Option<String>,
}

impl ResolveCommand {
    pub fn execute(&self, settings: &Settings) -> Result<()> {
        let catalog = load_catalog(self.pipeline.as_deref(), settings)?;
        let (definition, variants) = catalog.into_parts();

        let effective = ConfigResolver::new(variants)
            .resolve(&definition, self.variant.as_deref())?;

        let json = serde_json::to_string_pretty(&effective)
            .context("Failed to serialize effective configuration")?;
        println!("{json}");
        Ok(())
    }
}
