//! Logging infrastructure for the Vidify pipeline.
//!
//! This module provides:
//! - Global `tracing` setup with optional daily-rolling log files
//! - Per-job loggers with an optional log file and a `tracing` mirror
//! - Compact mode that keeps detail lines out of the main output
//! - Tail buffer replayed when a job fails
//!
//! # Example
//!
//! ```no_run
//! use vidify_core::logging::{JobLogger, LogConfig};
//!
//! let logger = JobLogger::builder("job-123")
//!     .log_dir("/var/log/vidify/jobs")
//!     .config(LogConfig::default())
//!     .build()
//!     .unwrap();
//!
//! logger.phase("transcoding");
//! logger.dispatch("vidify-video-transcoder (attempt 1)");
//! logger.success("transcoding completed");
//! ```

mod job_logger;
mod types;

use std::path::Path;

pub use job_logger::{JobLogger, JobLoggerBuilder};
pub use types::{LogConfig, LogLevel, MessagePrefix};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// File name prefix for the rolling application log.
const LOG_FILE_PREFIX: &str = "vidify.log";

/// Initialize global tracing subscriber for application-wide logging.
///
/// This sets up a subscriber that:
/// - Respects RUST_LOG environment variable
/// - Falls back to the provided default level
/// - Outputs to stderr with timestamps
/// - Also writes to a daily-rolling file when `log_dir` is given
///
/// Keep the returned guard alive for the lifetime of the program so the
/// file writer flushes. Should be called once at application startup.
pub fn init_tracing(default_level: LogLevel, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.as_str()));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

/// Initialize tracing for tests (only logs warnings and above).
#[cfg(test)]
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_test_writer()
        .try_init();
}
