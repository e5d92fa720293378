//! Config manager for loading, saving, and atomic updates.
//!
//! Key features:
//! - Atomic writes (write to temp file, then rename)
//! - Section-level updates (only modified section is changed)
//! - Validation on load (unknown sections trigger a clean rewrite)
//! - Preserves comments and formatting with toml_edit

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use toml_edit::{DocumentMut, Item};

use super::settings::{ConfigSection, Settings};

/// Errors that can occur during config operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Failed to parse config for editing: {0}")]
    EditParseError(#[from] toml_edit::TomlError),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Result type for config operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Manages application configuration.
///
/// Handles loading, saving, and atomic section-level updates.
pub struct ConfigManager {
    /// Path to the config file.
    config_path: PathBuf,
    /// Current settings loaded in memory.
    settings: Settings,
}

impl ConfigManager {
    /// Create a new config manager with the given config file path.
    ///
    /// Does not load the config - call `load()` or `load_or_create()` after.
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            settings: Settings::default(),
        }
    }

    /// Get the config file path.
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Get a reference to the current settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Get a mutable reference to the current settings.
    ///
    /// Note: Changes made here are only in memory until `save()` or
    /// `update_section()` is called.
    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    /// Consume the manager, keeping the settings.
    pub fn into_settings(self) -> Settings {
        self.settings
    }

    /// Load config from file.
    ///
    /// Returns error if file doesn't exist.
    pub fn load(&mut self) -> ConfigResult<()> {
        if !self.config_path.exists() {
            return Err(ConfigError::NotFound(self.config_path.clone()));
        }

        let content = fs::read_to_string(&self.config_path)?;
        self.settings = parse_and_validate(&content)?;
        tracing::debug!(path = %self.config_path.display(), "Loaded settings");
        Ok(())
    }

    /// Load config from file, creating with defaults if it doesn't exist.
    ///
    /// Unknown top-level sections are dropped and the file rewritten.
    pub fn load_or_create(&mut self) -> ConfigResult<()> {
        if self.config_path.exists() {
            let content = fs::read_to_string(&self.config_path)?;
            let (settings, has_unknown) = parse_validate_and_clean(&content)?;
            self.settings = settings;

            if has_unknown {
                tracing::warn!(
                    path = %self.config_path.display(),
                    "Removing unknown sections from settings file"
                );
                self.save()?;
            }
        } else {
            tracing::info!(
                path = %self.config_path.display(),
                "Creating default settings file"
            );
            self.settings = Settings::default();
            self.save()?;
        }
        Ok(())
    }

    /// Save the entire config atomically.
    ///
    /// Writes to a temp file first, then renames to ensure atomic write.
    pub fn save(&self) -> ConfigResult<()> {
        let content = self.generate_config_with_comments()?;
        self.atomic_write(&content)?;
        Ok(())
    }

    /// Update a specific section atomically.
    ///
    /// This re-reads the file from disk, updates only the specified section,
    /// and writes back atomically. Other sections keep their on-disk
    /// content and comments.
    pub fn update_section(&mut self, section: ConfigSection) -> ConfigResult<()> {
        self.settings.validate().map_err(ConfigError::Invalid)?;

        let current_content = if self.config_path.exists() {
            fs::read_to_string(&self.config_path)?
        } else {
            String::new()
        };

        let mut doc: DocumentMut = if current_content.is_empty() {
            DocumentMut::new()
        } else {
            current_content.parse()?
        };

        let section_table = self.section_table(section)?;
        let table_name = section.table_name();
        let prefix = doc
            .get(table_name)
            .and_then(Item::as_table)
            .and_then(|t| t.decor().prefix())
            .and_then(|p| p.as_str())
            .map(str::to_string);

        doc[table_name] = Item::Table(section_table);
        if let (Some(prefix), Some(table)) = (prefix, doc[table_name].as_table_mut()) {
            table.decor_mut().set_prefix(prefix);
        }

        self.atomic_write(&doc.to_string())?;
        Ok(())
    }

    /// Serialize one section as a standalone TOML table.
    fn section_table(&self, section: ConfigSection) -> ConfigResult<toml_edit::Table> {
        let section_toml = match section {
            ConfigSection::Paths => toml::to_string_pretty(&self.settings.paths)?,
            ConfigSection::Logging => toml::to_string_pretty(&self.settings.logging)?,
            ConfigSection::Dispatch => toml::to_string_pretty(&self.settings.dispatch)?,
            ConfigSection::Retry => toml::to_string_pretty(&self.settings.retry)?,
            ConfigSection::Notifications => toml::to_string_pretty(&self.settings.notifications)?,
        };
        let section_doc: DocumentMut = section_toml.parse()?;
        Ok(section_doc.as_table().clone())
    }

    /// Generate config content with helpful comments.
    fn generate_config_with_comments(&self) -> ConfigResult<String> {
        let mut doc: DocumentMut = toml::to_string_pretty(&self.settings)?.parse()?;

        for (i, section) in ConfigSection::ALL.iter().enumerate() {
            if let Some(table) = doc
                .get_mut(section.table_name())
                .and_then(Item::as_table_mut)
            {
                let mut prefix = String::new();
                if i == 0 {
                    prefix.push_str("# Vidify Pipeline Configuration\n");
                    prefix.push_str(
                        "# This file is auto-generated. Comments may be preserved on section updates.\n",
                    );
                }
                prefix.push_str(&format!("\n# {}\n", section.description()));
                table.decor_mut().set_prefix(prefix);
            }
        }

        Ok(doc.to_string())
    }

    /// Write content to config file atomically.
    ///
    /// Writes to a temp file first, then renames.
    fn atomic_write(&self, content: &str) -> io::Result<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write to temp file in same directory (for atomic rename)
        let temp_path = self.config_path.with_extension("toml.tmp");

        {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
        }

        fs::rename(&temp_path, &self.config_path)?;

        Ok(())
    }
}

/// Parse and validate config content.
fn parse_and_validate(content: &str) -> ConfigResult<Settings> {
    let settings: Settings = toml::from_str(content)?;
    settings.validate().map_err(ConfigError::Invalid)?;
    Ok(settings)
}

/// Parse and validate, reporting whether unknown sections were present.
fn parse_validate_and_clean(content: &str) -> ConfigResult<(Settings, bool)> {
    let doc: DocumentMut = content.parse()?;
    let settings = parse_and_validate(content)?;

    let has_unknown = doc.iter().any(|(key, _)| {
        !ConfigSection::ALL
            .iter()
            .any(|section| section.table_name() == key)
    });

    Ok((settings, has_unknown))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn load_or_create_creates_default() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(".config").join("settings.toml");

        let mut manager = ConfigManager::new(&config_path);
        manager.load_or_create().unwrap();

        assert!(config_path.exists());
        let content = fs::read_to_string(&config_path).unwrap();
        assert!(content.contains("[paths]"));
        assert!(content.contains("[dispatch]"));
        assert!(content.contains("# Stage retry policy"));
    }

    #[test]
    fn load_or_create_preserves_existing() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("settings.toml");

        fs::write(&config_path, "[dispatch]\nmax_concurrency = 3\n").unwrap();

        let mut manager = ConfigManager::new(&config_path);
        manager.load_or_create().unwrap();

        assert_eq!(manager.settings().dispatch.max_concurrency, 3);
        // File left alone when nothing unknown was found.
        let content = fs::read_to_string(&config_path).unwrap();
        assert_eq!(content, "[dispatch]\nmax_concurrency = 3\n");
    }

    #[test]
    fn unknown_sections_are_removed() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("settings.toml");

        fs::write(&config_path, "[legacy]\nfoo = 1\n\n[retry]\nmax_retries = 1\n").unwrap();

        let mut manager = ConfigManager::new(&config_path);
        manager.load_or_create().unwrap();

        let content = fs::read_to_string(&config_path).unwrap();
        assert!(!content.contains("[legacy]"));
        assert!(content.contains("max_retries = 1"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("settings.toml");
        fs::write(&config_path, "[retry]\nbackoff_factor = 0\n").unwrap();

        let mut manager = ConfigManager::new(&config_path);
        assert!(matches!(manager.load(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn load_missing_file_fails() {
        let dir = tempdir().unwrap();
        let mut manager = ConfigManager::new(dir.path().join("absent.toml"));
        assert!(matches!(manager.load(), Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn update_section_only_changes_target() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("settings.toml");

        let mut manager = ConfigManager::new(&config_path);
        manager.load_or_create().unwrap();

        manager.settings_mut().retry.max_retries = 5;
        manager.update_section(ConfigSection::Retry).unwrap();

        let content = fs::read_to_string(&config_path).unwrap();
        assert!(content.contains("max_retries = 5"));
        assert!(content.contains("[notifications]"));
        assert!(content.contains("# Stage retry policy"));

        let mut reloaded = ConfigManager::new(&config_path);
        reloaded.load().unwrap();
        assert_eq!(reloaded.settings().retry.max_retries, 5);
    }

    #[test]
    fn atomic_write_creates_no_temp_on_success() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("settings.toml");

        let mut manager = ConfigManager::new(&config_path);
        manager.load_or_create().unwrap();

        let temp_path = config_path.with_extension("toml.tmp");
        assert!(!temp_path.exists());
    }
}
