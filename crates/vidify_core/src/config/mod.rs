//! Configuration management for the Vidify pipeline.
//!
//! This module provides:
//! - TOML-based configuration with logical sections
//! - Atomic file writes (write to temp, then rename)
//! - Section-level updates (only changed section is modified)
//! - Validation on load with automatic defaults
//!
//! # Example
//!
//! ```no_run
//! use vidify_core::config::{ConfigManager, ConfigSection};
//!
//! // Create manager and load (or create default) config
//! let mut config = ConfigManager::new(".config/vidify.toml");
//! config.load_or_create().unwrap();
//!
//! println!("Max concurrency: {}", config.settings().dispatch.max_concurrency);
//!
//! // Modify a setting
//! config.settings_mut().retry.max_retries = 3;
//!
//! // Save just the retry section atomically
//! config.update_section(ConfigSection::Retry).unwrap();
//! ```

mod manager;
mod settings;

pub use manager::{ConfigError, ConfigManager, ConfigResult};
pub use settings::{
    ConfigSection, DispatchSettings, LoggingSettings, NotificationSettings, PathSettings,
    RetrySettings, Settings,
};
