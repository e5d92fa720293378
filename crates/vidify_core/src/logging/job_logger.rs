//! Per-job logger with file and tracing output.
//!
//! Each job gets its own logger that:
//! - Writes to a dedicated log file (when a log folder is configured)
//! - Mirrors every message to `tracing` with the job id attached
//! - Supports compact mode, where detail lines only reach the tail buffer
//! - Maintains a tail buffer that is replayed when the job fails

use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use parking_lot::Mutex;

use super::types::{LogConfig, LogLevel, MessagePrefix};

/// Per-job logger.
pub struct JobLogger {
    /// Job name for identification (normally the job id).
    job_name: String,
    /// Path to log file, if writing to one.
    log_path: Option<PathBuf>,
    /// File writer (buffered).
    file_writer: Mutex<Option<BufWriter<File>>>,
    /// Logging configuration.
    config: LogConfig,
    /// Tail buffer for recent lines.
    tail_buffer: Mutex<VecDeque<String>>,
}

impl JobLogger {
    /// Create a logger writing to `<log_dir>/<job_name>.log`.
    pub fn new(
        job_name: impl Into<String>,
        log_dir: impl AsRef<Path>,
        config: LogConfig,
    ) -> std::io::Result<Self> {
        let job_name = job_name.into();
        let log_dir = log_dir.as_ref();

        fs::create_dir_all(log_dir)?;

        let log_path = log_dir.join(format!("{}.log", sanitize_filename(&job_name)));
        let file = File::create(&log_path)?;

        Ok(Self {
            job_name,
            log_path: Some(log_path),
            file_writer: Mutex::new(Some(BufWriter::new(file))),
            tail_buffer: Mutex::new(VecDeque::with_capacity(config.error_tail)),
            config,
        })
    }

    /// Create a logger without a log file.
    pub fn in_memory(job_name: impl Into<String>, config: LogConfig) -> Self {
        Self {
            job_name: job_name.into(),
            log_path: None,
            file_writer: Mutex::new(None),
            tail_buffer: Mutex::new(VecDeque::with_capacity(config.error_tail)),
            config,
        }
    }

    /// Start building a logger.
    pub fn builder(job_name: impl Into<String>) -> JobLoggerBuilder {
        JobLoggerBuilder::new(job_name)
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    /// Get the log file path.
    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    /// Log a message at the specified level.
    pub fn log(&self, level: LogLevel, message: &str) {
        if level < self.config.level {
            return;
        }

        self.mirror(level, message);
        self.remember(message);
        let formatted = self.format_message(message);
        self.write_line(&formatted);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    pub fn warn(&self, message: &str) {
        let msg = MessagePrefix::Warning.format(message);
        self.log(LogLevel::Warn, &msg);
    }

    pub fn error(&self, message: &str) {
        let msg = MessagePrefix::Error.format(message);
        self.log(LogLevel::Error, &msg);
    }

    /// Log a stage marker.
    pub fn phase(&self, stage: &str) {
        let msg = MessagePrefix::Phase.format(stage);
        self.log(LogLevel::Info, &msg);
    }

    /// Log an outgoing invocation.
    pub fn dispatch(&self, message: &str) {
        let msg = MessagePrefix::Dispatch.format(message);
        self.log(LogLevel::Info, &msg);
    }

    /// Log a lifecycle hook event.
    pub fn hook(&self, message: &str) {
        let msg = MessagePrefix::Hook.format(message);
        self.log(LogLevel::Info, &msg);
    }

    pub fn success(&self, message: &str) {
        let msg = MessagePrefix::Success.format(message);
        self.log(LogLevel::Info, &msg);
    }

    /// Log a detail line (stage output, configuration dumps).
    ///
    /// In compact mode, these are only added to the tail buffer.
    pub fn detail(&self, line: &str) {
        self.remember(line);

        if self.config.compact {
            return;
        }

        tracing::debug!(job = %self.job_name, "{}", line);
        self.write_line(&self.format_message(line));
    }

    /// Replay the tail buffer (typically after a failure).
    pub fn show_tail(&self, header: &str) {
        let lines = self.get_tail();
        if lines.is_empty() {
            return;
        }

        self.write_line(&self.format_message(&format!("[{}/tail]", header)));
        for line in &lines {
            tracing::info!(job = %self.job_name, "{}", line);
            self.write_line(&self.format_message(line));
        }
    }

    pub fn clear_tail(&self) {
        self.tail_buffer.lock().clear();
    }

    /// Get the current tail buffer contents.
    pub fn get_tail(&self) -> Vec<String> {
        self.tail_buffer.lock().iter().cloned().collect()
    }

    /// Flush the log file.
    pub fn flush(&self) {
        if let Some(ref mut writer) = *self.file_writer.lock() {
            let _ = writer.flush();
        }
    }

    /// Close the logger and release the file.
    pub fn close(&self) {
        self.flush();
        *self.file_writer.lock() = None;
    }

    fn remember(&self, line: &str) {
        if self.config.error_tail == 0 {
            return;
        }
        let mut buffer = self.tail_buffer.lock();
        if buffer.len() >= self.config.error_tail {
            buffer.pop_front();
        }
        buffer.push_back(line.to_string());
    }

    fn mirror(&self, level: LogLevel, message: &str) {
        let job = self.job_name.as_str();
        match level {
            LogLevel::Trace => tracing::trace!(job, "{}", message),
            LogLevel::Debug => tracing::debug!(job, "{}", message),
            LogLevel::Info => tracing::info!(job, "{}", message),
            LogLevel::Warn => tracing::warn!(job, "{}", message),
            LogLevel::Error => tracing::error!(job, "{}", message),
        }
    }

    /// Format a message with timestamp (if enabled).
    fn format_message(&self, message: &str) -> String {
        if self.config.show_timestamps {
            let timestamp = Local::now().format("%H:%M:%S");
            format!("[{}] {}", timestamp, message)
        } else {
            message.to_string()
        }
    }

    fn write_line(&self, formatted: &str) {
        if let Some(ref mut writer) = *self.file_writer.lock() {
            let _ = writeln!(writer, "{}", formatted);
        }
    }
}

impl Drop for JobLogger {
    fn drop(&mut self) {
        self.close();
    }
}

/// Sanitize a string to be safe for use as a filename.
fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect()
}

/// Builder for creating a `JobLogger` with fluent API.
pub struct JobLoggerBuilder {
    job_name: String,
    log_dir: Option<PathBuf>,
    config: LogConfig,
}

impl JobLoggerBuilder {
    pub fn new(job_name: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            log_dir: None,
            config: LogConfig::default(),
        }
    }

    /// Write the log file into this directory.
    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    /// Set the logging configuration.
    pub fn config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the log level.
    pub fn level(mut self, level: LogLevel) -> Self {
        self.config.level = level;
        self
    }

    /// Enable or disable compact mode.
    pub fn compact(mut self, compact: bool) -> Self {
        self.config.compact = compact;
        self
    }

    /// Build the logger. Without a log folder the logger is in-memory.
    pub fn build(self) -> std::io::Result<JobLogger> {
        match self.log_dir {
            Some(dir) => JobLogger::new(self.job_name, dir, self.config),
            None => Ok(JobLogger::in_memory(self.job_name, self.config)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_log_file() {
        let dir = tempdir().unwrap();
        let logger = JobLogger::new("job_1", dir.path(), LogConfig::default()).unwrap();

        let path = logger.log_path().unwrap();
        assert!(path.exists());
        assert!(path.to_string_lossy().contains("job_1.log"));
    }

    #[test]
    fn writes_to_file() {
        let dir = tempdir().unwrap();
        let logger = JobLogger::new("job_1", dir.path(), LogConfig::default()).unwrap();

        logger.phase("validation");
        logger.info("Test message");
        logger.flush();

        let content = fs::read_to_string(logger.log_path().unwrap()).unwrap();
        assert!(content.contains("=== validation ==="));
        assert!(content.contains("Test message"));
    }

    #[test]
    fn level_filters_messages() {
        let logger = JobLogger::builder("job_1")
            .level(LogLevel::Warn)
            .build()
            .unwrap();

        logger.info("hidden");
        logger.warn("shown");
        assert_eq!(logger.get_tail(), vec!["[WARNING] shown".to_string()]);
    }

    #[test]
    fn compact_mode_keeps_details_out_of_file() {
        let dir = tempdir().unwrap();
        let logger = JobLogger::builder("job_1")
            .log_dir(dir.path())
            .compact(true)
            .build()
            .unwrap();

        logger.detail("{\"frames\": 5}");
        logger.flush();

        let content = fs::read_to_string(logger.log_path().unwrap()).unwrap();
        assert!(!content.contains("frames"));
        assert_eq!(logger.get_tail().len(), 1);
    }

    #[test]
    fn tail_buffer_maintains_limit() {
        let config = LogConfig {
            error_tail: 5,
            ..LogConfig::default()
        };
        let logger = JobLogger::in_memory("job_1", config);

        for i in 0..10 {
            logger.detail(&format!("Line {}", i));
        }

        let tail = logger.get_tail();
        assert_eq!(tail.len(), 5);
        assert_eq!(tail[0], "Line 5");
        assert_eq!(tail[4], "Line 9");
    }

    #[test]
    fn show_tail_replays_into_file() {
        let dir = tempdir().unwrap();
        let logger = JobLogger::new("job_1", dir.path(), LogConfig::default()).unwrap();

        logger.detail("stage output line");
        logger.show_tail("transcoding");
        logger.flush();

        let content = fs::read_to_string(logger.log_path().unwrap()).unwrap();
        assert!(content.contains("[transcoding/tail]"));
        assert!(content.contains("stage output line"));
    }

    #[test]
    fn sanitizes_filename() {
        assert_eq!(sanitize_filename("normal_name"), "normal_name");
        assert_eq!(sanitize_filename("has/slash"), "has_slash");
        assert_eq!(sanitize_filename("has:colon"), "has_colon");
        assert_eq!(sanitize_filename("a<b>c"), "a_b_c");
    }
}
