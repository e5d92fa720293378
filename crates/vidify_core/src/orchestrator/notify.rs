//! Lifecycle notifications.
//!
//! Every job publishes one `Started` event when it enters its first stage
//! and exactly one completion notification when it reaches a terminal
//! state.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::jobs::{Job, JobId, JobState};

/// Terminal outcome of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Failed,
    Cancelled,
}

/// `{jobId, outcome, failedStage?, reason?}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionNotification {
    pub job_id: JobId,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CompletionNotification {
    /// Build the notification for a terminal job; `None` otherwise.
    pub fn from_job(job: &Job) -> Option<Self> {
        let (outcome, failed_stage, reason) = match &job.state {
            JobState::Succeeded => (Outcome::Succeeded, None, None),
            JobState::Failed { stage, reason } => {
                (Outcome::Failed, Some(stage.clone()), Some(reason.clone()))
            }
            JobState::Cancelled { reason } => (Outcome::Cancelled, None, reason.clone()),
            JobState::Pending | JobState::Running { .. } => return None,
        };
        Some(Self {
            job_id: job.id,
            outcome,
            failed_stage,
            reason,
        })
    }
}

/// Event published on a notification topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    Started {
        job_id: JobId,
        video_ref: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        variant: Option<String>,
        stages: Vec<String>,
    },
    Completed(CompletionNotification),
}

impl PipelineEvent {
    pub fn started(job: &Job) -> Self {
        Self::Started {
            job_id: job.id,
            video_ref: job.video_ref.clone(),
            variant: job.variant.clone(),
            stages: job.stages.clone(),
        }
    }

    pub fn job_id(&self) -> JobId {
        match self {
            Self::Started { job_id, .. } => *job_id,
            Self::Completed(n) => n.job_id,
        }
    }
}

/// Topic names for the started/completed/failed channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationTopics {
    pub started: String,
    pub completed: String,
    pub failed: String,
}

impl NotificationTopics {
    /// Topic an event is published on. Cancelled jobs go to `completed`.
    pub fn topic_for(&self, event: &PipelineEvent) -> &str {
        match event {
            PipelineEvent::Started { .. } => &self.started,
            PipelineEvent::Completed(n) if n.outcome == Outcome::Failed => &self.failed,
            PipelineEvent::Completed(_) => &self.completed,
        }
    }
}

impl Default for NotificationTopics {
    fn default() -> Self {
        Self {
            started: "vidify-processing-started".to_string(),
            completed: "vidify-processing-completed".to_string(),
            failed: "vidify-processing-failed".to_string(),
        }
    }
}

/// Errors publishing a notification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("Notification channel closed")]
    Closed,

    #[error("Failed to publish to '{topic}': {message}")]
    Publish { topic: String, message: String },
}

/// Destination for lifecycle events.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, topic: &str, event: &PipelineEvent) -> Result<(), NotifyError>;
}

/// Sends events over an in-process channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<(String, PipelineEvent)>,
}

impl ChannelNotifier {
    /// Create a notifier and the receiver its events arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(String, PipelineEvent)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn publish(&self, topic: &str, event: &PipelineEvent) -> Result<(), NotifyError> {
        self.tx
            .send((topic.to_string(), event.clone()))
            .map_err(|_| NotifyError::Closed)
    }
}

/// Logs events through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn publish(&self, topic: &str, event: &PipelineEvent) -> Result<(), NotifyError> {
        let payload = serde_json::to_string(event).map_err(|e| NotifyError::Publish {
            topic: topic.to_string(),
            message: e.to_string(),
        })?;
        tracing::info!(topic, job_id = %event.job_id(), %payload, "Pipeline event");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{standard_definition, EffectiveConfig};
    use std::sync::Arc;

    fn job(state: JobState) -> Job {
        let mut job = Job::new(
            "video.mp4",
            Arc::new(EffectiveConfig::new(None, standard_definition())),
            vec!["validation".into()],
        );
        job.state = state;
        job
    }

    #[test]
    fn notification_only_for_terminal_jobs() {
        assert!(CompletionNotification::from_job(&job(JobState::Pending)).is_none());

        let failed = CompletionNotification::from_job(&job(JobState::Failed {
            stage: "validation".into(),
            reason: "bad header".into(),
        }))
        .unwrap();
        assert_eq!(failed.outcome, Outcome::Failed);
        assert_eq!(failed.failed_stage.as_deref(), Some("validation"));
    }

    #[test]
    fn topics_route_by_outcome() {
        let topics = NotificationTopics::default();
        let succeeded = CompletionNotification::from_job(&job(JobState::Succeeded)).unwrap();
        let cancelled =
            CompletionNotification::from_job(&job(JobState::Cancelled { reason: None })).unwrap();
        let failed = CompletionNotification::from_job(&job(JobState::Failed {
            stage: "transcoding".into(),
            reason: "timeout".into(),
        }))
        .unwrap();

        assert_eq!(
            topics.topic_for(&PipelineEvent::Completed(succeeded)),
            "vidify-processing-completed"
        );
        assert_eq!(
            topics.topic_for(&PipelineEvent::Completed(cancelled)),
            "vidify-processing-completed"
        );
        assert_eq!(
            topics.topic_for(&PipelineEvent::Completed(failed)),
            "vidify-processing-failed"
        );
        assert_eq!(
            topics.topic_for(&PipelineEvent::started(&job(JobState::Pending))),
            "vidify-processing-started"
        );
    }

    #[tokio::test]
    async fn channel_notifier_delivers() {
        let (notifier, mut rx) = ChannelNotifier::new();
        let event = PipelineEvent::started(&job(JobState::Pending));
        notifier.publish("topic", &event).await.unwrap();

        let (topic, received) = rx.recv().await.unwrap();
        assert_eq!(topic, "topic");
        assert_eq!(received, event);
    }
}
