//! Job records and their status views.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::models::EffectiveConfig;

/// Unique job identifier, generated at submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Overall state of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    /// Submitted, before-processing hook not yet passed.
    Pending,
    /// Working on the stage at `stage_index` of the job's stage list.
    Running { stage_index: usize },
    Succeeded,
    Failed { stage: String, reason: String },
    Cancelled {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl JobState {
    /// No further transitions happen from a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed { .. } | JobState::Cancelled { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running { .. } => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed { .. } => "failed",
            JobState::Cancelled { .. } => "cancelled",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Running { stage_index } => write!(f, "running({stage_index})"),
            JobState::Failed { stage, reason } => write!(f, "failed({stage}): {reason}"),
            JobState::Cancelled { reason: Some(reason) } => write!(f, "cancelled: {reason}"),
            other => f.write_str(other.name()),
        }
    }
}

/// Status of the current attempt at a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    /// Waiting for dispatch (first attempt or a pending retry).
    #[default]
    Scheduled,
    InFlight,
    Succeeded,
    Failed,
}

/// Per-stage outcome record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StageResult {
    pub status: AttemptStatus,
    /// Number of attempts dispatched so far.
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Most recent error, kept across retries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl StageResult {
    /// Retries used: every attempt after the first.
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// One video processing job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub video_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    /// Resolved configuration, fixed at submission.
    pub effective_config: Arc<EffectiveConfig>,
    /// Enabled stage names in execution order.
    pub stages: Vec<String>,
    pub current_stage_index: usize,
    pub stage_results: BTreeMap<String, StageResult>,
    pub state: JobState,
    pub submitted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a pending job.
    pub fn new(
        video_ref: impl Into<String>,
        effective_config: Arc<EffectiveConfig>,
        stages: Vec<String>,
    ) -> Self {
        Self {
            id: JobId::new(),
            video_ref: video_ref.into(),
            variant: effective_config.variant.clone(),
            effective_config,
            stages,
            current_stage_index: 0,
            stage_results: BTreeMap::new(),
            state: JobState::Pending,
            submitted_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Name of the stage the job is currently on, if running.
    pub fn current_stage(&self) -> Option<&str> {
        match self.state {
            JobState::Running { stage_index } => self.stages.get(stage_index).map(String::as_str),
            _ => None,
        }
    }

    pub fn stage_result(&self, stage: &str) -> Option<&StageResult> {
        self.stage_results.get(stage)
    }

    /// Outputs of the stages that have succeeded, keyed by stage name.
    pub fn prior_outputs(&self) -> Map<String, Value> {
        self.stage_results
            .iter()
            .filter(|(_, r)| r.status == AttemptStatus::Succeeded)
            .map(|(name, r)| (name.clone(), r.output.clone().unwrap_or(Value::Null)))
            .collect()
    }

    /// External status view.
    pub fn status(&self) -> JobStatus {
        JobStatus {
            job_id: self.id,
            overall_state: self.state.clone(),
            current_stage: self.current_stage().map(str::to_string),
            stage_results: self.stage_results.clone(),
        }
    }
}

/// The status answer: `{jobId, overallState, currentStage, stageResults}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: JobId,
    pub overall_state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<String>,
    pub stage_results: BTreeMap<String, StageResult>,
}
