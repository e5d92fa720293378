//! `vidify stages`: list the stages a job would run.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use vidify_core::config::Settings;
use vidify_core::orchestrator::StageRegistry;
use vidify_core::resolver::ConfigResolver;

use super::load_catalog;

#[derive(Args)]
pub struct StagesCommand {
    /// Pipeline catalog file (defaults to the configured or built-in catalog)
    #[arg(long)]
    pipeline: Option<PathBuf>,

    /// Variant to apply
    #[arg(short, long)]
    variant: Option<String>,
}

impl StagesCommand {
    pub fn execute(&self, settings: &Settings) -> Result<()> {
        let catalog = load_catalog(self.pipeline.as_deref(), settings)?;
        let (definition, variants) = catalog.into_parts();

        let registry = StageRegistry::new(&definition)?;
        let effective = ConfigResolver::new(variants)
            .resolve(&definition, self.variant.as_deref())?;
        let stages = registry.ordered_stages(&effective)?;

        println!(
            "Pipeline {} (variant: {})",
            effective.version(),
            self.variant.as_deref().unwrap_or("none")
        );
        for stage in &stages {
            let deps: Vec<&str> = stage.depends_on.iter().map(String::as_str).collect();
            let deps = if deps.is_empty() {
                String::new()
            } else {
                format!("  [after {}]", deps.join(", "))
            };
            println!(
                "{:>3}  {:<14} {}{}",
                stage.order, stage.name, stage.description, deps
            );
        }

        let skipped: Vec<&str> = effective
            .stages()
            .iter()
            .filter(|s| !s.enabled)
            .map(|s| s.name.as_str())
            .collect();
        if !skipped.is_empty() {
            println!("Disabled: {}", skipped.join(", "));
        }
        Ok(())
    }
}
