//! External stage compute seam.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::jobs::JobId;
use crate::models::StageConfiguration;
use crate::orchestrator::ComputeResult;

/// One invocation of a stage's external computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRequest {
    pub job_id: JobId,
    pub stage: String,
    /// 1-based attempt number.
    pub attempt: u32,
    /// External function the invocation is routed to.
    pub function: String,
    pub video_ref: String,
    pub configuration: StageConfiguration,
    /// Outputs of the stages that already succeeded, by stage name.
    pub prior_outputs: Map<String, Value>,
}

/// External computation for stages (serverless functions, workers, ...).
///
/// Implementations may be invoked concurrently for different jobs. The
/// orchestrator bounds concurrency and applies timeouts; a call that is
/// timed out is dropped.
#[async_trait]
pub trait StageCompute: Send + Sync {
    async fn invoke(&self, request: StageRequest) -> ComputeResult<Value>;
}

#[async_trait]
impl<T: StageCompute + ?Sized> StageCompute for Arc<T> {
    async fn invoke(&self, request: StageRequest) -> ComputeResult<Value> {
        (**self).invoke(request).await
    }
}

/// Maps stage names to external function names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionRouter {
    routes: BTreeMap<String, String>,
    fallback: String,
}

impl FunctionRouter {
    pub fn new(routes: BTreeMap<String, String>, fallback: impl Into<String>) -> Self {
        Self {
            routes,
            fallback: fallback.into(),
        }
    }

    /// Function for a stage; unrouted stages go to the fallback.
    pub fn function_for(&self, stage: &str) -> &str {
        self.routes.get(stage).unwrap_or(&self.fallback)
    }

    pub fn fallback(&self) -> &str {
        &self.fallback
    }
}

impl Default for FunctionRouter {
    fn default() -> Self {
        let routes = [
            ("validation", "vidify-video-validator"),
            ("analysis", "vidify-video-analyzer"),
            ("transcoding", "vidify-video-transcoder"),
            ("thumbnail", "vidify-thumbnail-generator"),
        ]
        .into_iter()
        .map(|(stage, function)| (stage.to_string(), function.to_string()))
        .collect();
        Self::new(routes, "vidify-processing-coordinator")
    }
}
