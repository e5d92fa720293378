//! Settings struct with TOML-based sections.
//!
//! Settings are organized into logical sections that map to TOML tables.
//! Each section can be updated independently for atomic section-level updates.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dispatch::FunctionRouter;
use crate::logging::{LogConfig, LogLevel};
use crate::orchestrator::{NotificationTopics, RetryPolicy};

/// Root settings structure containing all configuration sections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Path-related settings.
    #[serde(default)]
    pub paths: PathSettings,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingSettings,

    /// External dispatch limits and routing.
    #[serde(default)]
    pub dispatch: DispatchSettings,

    /// Stage retry policy.
    #[serde(default)]
    pub retry: RetrySettings,

    /// Notification topics.
    #[serde(default)]
    pub notifications: NotificationSettings,
}

impl Settings {
    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), String> {
        if self.dispatch.max_concurrency == 0 {
            return Err("dispatch.max_concurrency must be at least 1".to_string());
        }
        if self.dispatch.stage_timeout_secs == 0 {
            return Err("dispatch.stage_timeout_secs must be at least 1".to_string());
        }
        if self.retry.backoff_factor == 0 {
            return Err("retry.backoff_factor must be at least 1".to_string());
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err("retry.max_delay_ms must not be below retry.base_delay_ms".to_string());
        }
        Ok(())
    }
}

/// Path configuration for the catalog, logs, and the job archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathSettings {
    /// Pipeline catalog file. Empty uses the built-in catalog.
    #[serde(default)]
    pub pipeline_catalog: String,

    /// Folder for log files.
    #[serde(default = "default_logs_folder")]
    pub logs_folder: String,

    /// Archive of finished jobs. Empty keeps the archive in memory.
    #[serde(default)]
    pub archive_file: String,
}

fn default_logs_folder() -> String {
    ".logs".to_string()
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            pipeline_catalog: String::new(),
            logs_folder: default_logs_folder(),
            archive_file: String::new(),
        }
    }
}

impl PathSettings {
    /// Catalog path, if one is configured.
    pub fn pipeline_catalog(&self) -> Option<PathBuf> {
        non_empty_path(&self.pipeline_catalog)
    }

    /// Archive path, if one is configured.
    pub fn archive_file(&self) -> Option<PathBuf> {
        non_empty_path(&self.archive_file)
    }

    /// Folder for per-job log files.
    pub fn job_logs_folder(&self) -> PathBuf {
        PathBuf::from(&self.logs_folder).join("jobs")
    }
}

fn non_empty_path(value: &str) -> Option<PathBuf> {
    if value.trim().is_empty() {
        None
    } else {
        Some(PathBuf::from(value))
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Default level when RUST_LOG is not set.
    #[serde(default)]
    pub level: LogLevel,

    /// Use compact job logs.
    #[serde(default = "default_true")]
    pub compact: bool,

    /// Number of lines replayed when a job fails.
    #[serde(default = "default_error_tail")]
    pub error_tail: u32,

    /// Show timestamps in job logs.
    #[serde(default = "default_true")]
    pub show_timestamps: bool,

    /// Write one log file per job into `<logs_folder>/jobs`.
    #[serde(default)]
    pub job_log_files: bool,
}

fn default_true() -> bool {
    true
}

fn default_error_tail() -> u32 {
    20
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            compact: true,
            error_tail: default_error_tail(),
            show_timestamps: true,
            job_log_files: false,
        }
    }
}

impl LoggingSettings {
    /// Per-job logger configuration.
    pub fn job_log_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            compact: self.compact,
            error_tail: self.error_tail as usize,
            show_timestamps: self.show_timestamps,
        }
    }
}

/// Dispatch limits and function routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchSettings {
    /// Maximum concurrent external invocations across all jobs.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Timeout per stage invocation, in seconds.
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,

    /// Function for stages without a route.
    #[serde(default = "default_function")]
    pub default_function: String,

    /// Stage name → external function name.
    #[serde(default = "default_functions")]
    pub functions: BTreeMap<String, String>,
}

fn default_max_concurrency() -> usize {
    10
}

fn default_stage_timeout_secs() -> u64 {
    900
}

fn default_function() -> String {
    FunctionRouter::default().fallback().to_string()
}

fn default_functions() -> BTreeMap<String, String> {
    ["validation", "analysis", "transcoding", "thumbnail"]
        .into_iter()
        .map(|stage| {
            let router = FunctionRouter::default();
            (stage.to_string(), router.function_for(stage).to_string())
        })
        .collect()
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            stage_timeout_secs: default_stage_timeout_secs(),
            default_function: default_function(),
            functions: default_functions(),
        }
    }
}

impl DispatchSettings {
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }

    pub fn router(&self) -> FunctionRouter {
        FunctionRouter::new(self.functions.clone(), self.default_function.clone())
    }
}

/// Retry policy for failed stage attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Multiplier applied per further retry.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: u32,

    /// Upper bound on any single delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Per-stage retry counts replacing `max_retries` (`[retry.stages]`).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub stages: BTreeMap<String, u32>,
}

fn default_max_retries() -> u32 {
    2
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_backoff_factor() -> u32 {
    2
}

fn default_max_delay_ms() -> u64 {
    60_000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            backoff_factor: default_backoff_factor(),
            max_delay_ms: default_max_delay_ms(),
            stages: BTreeMap::new(),
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        let policy = RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.base_delay_ms),
            self.backoff_factor,
            Duration::from_millis(self.max_delay_ms),
        );
        self.stages
            .iter()
            .fold(policy, |policy, (stage, retries)| {
                policy.with_stage_retries(stage.as_str(), *retries)
            })
    }
}

/// Topics the pipeline publishes lifecycle events to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationSettings {
    #[serde(default = "default_started_topic")]
    pub started_topic: String,

    #[serde(default = "default_completed_topic")]
    pub completed_topic: String,

    #[serde(default = "default_failed_topic")]
    pub failed_topic: String,
}

fn default_started_topic() -> String {
    "vidify-processing-started".to_string()
}

fn default_completed_topic() -> String {
    "vidify-processing-completed".to_string()
}

fn default_failed_topic() -> String {
    "vidify-processing-failed".to_string()
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            started_topic: default_started_topic(),
            completed_topic: default_completed_topic(),
            failed_topic: default_failed_topic(),
        }
    }
}

impl NotificationSettings {
    pub fn topics(&self) -> NotificationTopics {
        NotificationTopics {
            started: self.started_topic.clone(),
            completed: self.completed_topic.clone(),
            failed: self.failed_topic.clone(),
        }
    }
}

/// Names of config sections for targeted updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigSection {
    Paths,
    Logging,
    Dispatch,
    Retry,
    Notifications,
}

impl ConfigSection {
    /// All sections in file order.
    pub const ALL: [ConfigSection; 5] = [
        ConfigSection::Paths,
        ConfigSection::Logging,
        ConfigSection::Dispatch,
        ConfigSection::Retry,
        ConfigSection::Notifications,
    ];

    /// Get the TOML table name for this section.
    pub fn table_name(&self) -> &'static str {
        match self {
            ConfigSection::Paths => "paths",
            ConfigSection::Logging => "logging",
            ConfigSection::Dispatch => "dispatch",
            ConfigSection::Retry => "retry",
            ConfigSection::Notifications => "notifications",
        }
    }

    /// Comment written above the section.
    pub fn description(&self) -> &'static str {
        match self {
            ConfigSection::Paths => "Pipeline catalog, logs and job archive locations",
            ConfigSection::Logging => "Logging configuration",
            ConfigSection::Dispatch => "External compute limits and function routing",
            ConfigSection::Retry => "Stage retry policy (validation never retries)",
            ConfigSection::Notifications => "Lifecycle notification topics",
        }
    }
}
