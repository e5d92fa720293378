//! `vidify run`: drive jobs through the pipeline with a dry-run backend.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context as _, Result};
use async_trait::async_trait;
use clap::Args;
use serde_json::{json, Value};

use vidify_core::config::Settings;
use vidify_core::dispatch::{StageCompute, StageRequest};
use vidify_core::jobs::Job;
use vidify_core::orchestrator::{ComputeResult, PipelineOrchestrator, SubmitRequest};

use super::load_catalog;

#[derive(Args)]
pub struct RunCommand {
    /// Video references to process
    #[arg(value_name = "VIDEO_REF", required = true)]
    videos: Vec<String>,

    /// Pipeline catalog file (defaults to the configured or built-in catalog)
    #[arg(long)]
    pipeline: Option<PathBuf>,

    /// Variant to apply to every job
    #[arg(short, long)]
    variant: Option<String>,

    /// Override the dispatch ceiling from settings
    #[arg(long)]
    max_concurrency: Option<usize>,

    /// Simulated latency of each stage call (milliseconds)
    #[arg(long, default_value = "0")]
    latency_ms: u64,
}

/// Backend that answers every stage call with its own request.
struct EchoCompute {
    latency: Duration,
}

#[async_trait]
impl StageCompute for EchoCompute {
    async fn invoke(&self, request: StageRequest) -> ComputeResult<Value> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(json!({
            "function": request.function,
            "video_ref": request.video_ref,
            "attempt": request.attempt,
            "configuration": request.configuration,
        }))
    }
}

impl RunCommand {
    pub async fn execute(self, mut settings: Settings) -> Result<()> {
        if let Some(max) = self.max_concurrency {
            settings.dispatch.max_concurrency = max;
        }

        let catalog = load_catalog(self.pipeline.as_deref(), &settings)?;
        let orchestrator = PipelineOrchestrator::builder()
            .settings(&settings)
            .catalog(catalog)
            .compute(EchoCompute {
                latency: Duration::from_millis(self.latency_ms),
            })
            .build()
            .context("Failed to build orchestrator")?;

        let mut ids = Vec::with_capacity(self.videos.len());
        for video in &self.videos {
            let mut request = SubmitRequest::new(video.as_str());
            if let Some(variant) = &self.variant {
                request = request.variant(variant.as_str());
            }
            let id = orchestrator
                .submit(request)
                .with_context(|| format!("Failed to submit {video}"))?;
            tracing::info!(job_id = %id, video = %video, "Submitted");
            ids.push(id);
        }

        let mut jobs: Vec<Job> = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(job) = orchestrator.wait(id).await {
                jobs.push(job);
            }
        }

        println!("{}", serde_json::to_string_pretty(&jobs)?);
        tracing::info!(
            jobs = jobs.len(),
            peak_in_flight = orchestrator.peak_in_flight(),
            "All jobs finished"
        );

        let unsuccessful = jobs
            .iter()
            .filter(|job| job.state != vidify_core::jobs::JobState::Succeeded)
            .count();
        if unsuccessful > 0 {
            bail!("{unsuccessful} job(s) did not succeed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vidify_core::jobs::JobId;

    #[tokio::test]
    async fn echo_returns_request() {
        let compute = EchoCompute {
            latency: Duration::ZERO,
        };
        let output = compute
            .invoke(StageRequest {
                job_id: JobId::new(),
                stage: "validation".into(),
                attempt: 1,
                function: "vidify-video-validator".into(),
                video_ref: "videos/a.mp4".into(),
                configuration: Default::default(),
                prior_outputs: Default::default(),
            })
            .await
            .unwrap();

        assert_eq!(output["function"], "vidify-video-validator");
        assert_eq!(output["video_ref"], "videos/a.mp4");
    }
}
