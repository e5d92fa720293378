//! `vidify config`: settings file management.

use std::path::Path;

use anyhow::{bail, Result};
use clap::Subcommand;

use vidify_core::config::ConfigManager;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Write the default settings file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the settings currently in effect
    Show,
}

impl ConfigCommand {
    pub fn execute(&self, path: &Path) -> Result<()> {
        match self {
            ConfigCommand::Init { force } => init(path, *force),
            ConfigCommand::Show => show(path),
        }
    }
}

fn init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "Settings file {} already exists (use --force to overwrite)",
            path.display()
        );
    }

    let manager = ConfigManager::new(path);
    manager.save()?;
    println!("Wrote default settings to {}", path.display());
    Ok(())
}

fn show(path: &Path) -> Result<()> {
    let settings = super::load_settings(path)?;
    println!("{settings:#?}");
    Ok(())
}
