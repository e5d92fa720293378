//! External collaborators: submission authorization and catalog publishing.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::jobs::{Job, JobId};

/// Capability check consulted before a job is created.
pub trait SubmissionAuthorizer: Send + Sync {
    /// `Err(reason)` rejects the submission.
    fn authorize(&self, video_ref: &str, variant: Option<&str>) -> Result<(), String>;
}

/// Authorizer that accepts every submission.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl SubmissionAuthorizer for AllowAll {
    fn authorize(&self, _video_ref: &str, _variant: Option<&str>) -> Result<(), String> {
        Ok(())
    }
}

/// Metadata handed to the content catalog when a job succeeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub job_id: JobId,
    pub video_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    /// Stage name → stage output.
    pub outputs: Map<String, Value>,
}

impl CatalogEntry {
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id,
            video_ref: job.video_ref.clone(),
            variant: job.variant.clone(),
            outputs: job.prior_outputs(),
        }
    }
}

/// Error from the content catalog.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Catalog publish failed: {0}")]
pub struct PublishError(pub String);

/// Receives metadata for finished videos.
#[async_trait]
pub trait CatalogPublisher: Send + Sync {
    async fn publish(&self, entry: &CatalogEntry) -> Result<(), PublishError>;
}

/// Publisher that drops every entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardPublisher;

#[async_trait]
impl CatalogPublisher for DiscardPublisher {
    async fn publish(&self, _entry: &CatalogEntry) -> Result<(), PublishError> {
        Ok(())
    }
}
