//! Vidify Core - pipeline logic for the Vidify video processing service
//!
//! This crate resolves pipeline configuration, sequences stages, and bounds
//! external dispatch. It has no CLI dependencies and can be embedded in any
//! Tokio application.

pub mod config;
pub mod dispatch;
pub mod jobs;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod resolver;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
