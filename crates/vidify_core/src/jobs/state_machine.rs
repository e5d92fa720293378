//! Per-job state machine.
//!
//! ```text
//! Pending ──start──▶ Running(0) ──▶ Running(1) ──▶ … ──▶ Succeeded
//!    │                   │ retries exhausted
//!    │                   ▼
//!    │              Failed(stage, reason)
//!    └──────cancel──────▶ Cancelled
//! ```
//!
//! Within `Running(i)` the stage record cycles
//! `Scheduled → InFlight → {Succeeded | Scheduled (retry) | Failed}`.
//! Terminal states accept no further transitions.

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;

use super::types::{AttemptStatus, Job, JobId, JobState, StageResult};

/// Rejected transition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Job {job_id} is already {state}; no further transitions")]
    Terminal { job_id: JobId, state: String },

    #[error("Job {job_id} cannot {action} while {state}")]
    Invalid {
        job_id: JobId,
        action: &'static str,
        state: String,
    },
}

/// Result type for transitions.
pub type TransitionResult<T> = Result<T, TransitionError>;

/// What happens after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// The stage will be dispatched again as attempt `next_attempt`.
    Retry { next_attempt: u32 },
    /// The job is now `Failed`.
    Exhausted,
}

/// The only writer of a `Job` record.
#[derive(Debug, Clone)]
pub struct JobStateMachine {
    job: Job,
}

impl JobStateMachine {
    pub fn new(job: Job) -> Self {
        Self { job }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn into_job(self) -> Job {
        self.job
    }

    pub fn state(&self) -> &JobState {
        &self.job.state
    }

    /// Stage currently being worked on, with its index.
    pub fn current_stage(&self) -> Option<(usize, &str)> {
        match self.job.state {
            JobState::Running { stage_index } => self
                .job
                .stages
                .get(stage_index)
                .map(|s| (stage_index, s.as_str())),
            _ => None,
        }
    }

    /// `Pending → Running(0)`, or straight to `Succeeded` with no stages.
    pub fn start(&mut self) -> TransitionResult<&JobState> {
        self.guard_open()?;
        if self.job.state != JobState::Pending {
            return Err(self.invalid("start"));
        }
        self.enter_stage(0);
        Ok(&self.job.state)
    }

    /// Mark the current stage's next attempt in flight; returns the attempt number.
    pub fn begin_attempt(&mut self) -> TransitionResult<u32> {
        let stage = self.running_stage("begin an attempt")?;
        let record = self.job.stage_results.entry(stage).or_default();
        if record.status != AttemptStatus::Scheduled {
            let state = format!("{:?}", record.status);
            return Err(TransitionError::Invalid {
                job_id: self.job.id,
                action: "begin an attempt",
                state,
            });
        }
        record.status = AttemptStatus::InFlight;
        record.attempts += 1;
        record.started_at = Some(Utc::now());
        record.finished_at = None;
        Ok(record.attempts)
    }

    /// The in-flight attempt succeeded; advance to the next stage.
    pub fn stage_succeeded(&mut self, output: Value) -> TransitionResult<&JobState> {
        let stage = self.running_stage("complete a stage")?;
        let index = self.job.current_stage_index;
        let record = self.in_flight_record(&stage, "complete a stage")?;
        record.status = AttemptStatus::Succeeded;
        record.output = Some(output);
        record.error = None;
        record.finished_at = Some(Utc::now());

        self.enter_stage(index + 1);
        Ok(&self.job.state)
    }

    /// The in-flight attempt failed.
    ///
    /// Retries while `retryable` and fewer than `max_retries` retries have
    /// been used; otherwise the job fails at this stage.
    pub fn stage_failed(
        &mut self,
        reason: impl Into<String>,
        retryable: bool,
        max_retries: u32,
    ) -> TransitionResult<FailureOutcome> {
        let stage = self.running_stage("fail a stage")?;
        let reason = reason.into();
        let record = self.in_flight_record(&stage, "fail a stage")?;
        record.error = Some(reason.clone());
        record.finished_at = Some(Utc::now());

        if retryable && record.attempts <= max_retries {
            record.status = AttemptStatus::Scheduled;
            return Ok(FailureOutcome::Retry {
                next_attempt: record.attempts + 1,
            });
        }

        record.status = AttemptStatus::Failed;
        self.job.state = JobState::Failed { stage, reason };
        self.job.finished_at = Some(Utc::now());
        Ok(FailureOutcome::Exhausted)
    }

    /// Move to `Cancelled`. An in-flight attempt is recorded as failed.
    pub fn cancel(&mut self, reason: Option<String>) -> TransitionResult<&JobState> {
        self.guard_open()?;
        if let Some((_, stage)) = self.current_stage() {
            let stage = stage.to_string();
            if let Some(record) = self.job.stage_results.get_mut(&stage) {
                if record.status == AttemptStatus::InFlight {
                    record.status = AttemptStatus::Failed;
                    record.error = Some("cancelled while in flight".to_string());
                    record.finished_at = Some(Utc::now());
                }
            }
        }
        self.job.state = JobState::Cancelled { reason };
        self.job.finished_at = Some(Utc::now());
        Ok(&self.job.state)
    }

    fn enter_stage(&mut self, index: usize) {
        self.job.current_stage_index = index;
        match self.job.stages.get(index) {
            Some(stage) => {
                self.job
                    .stage_results
                    .insert(stage.clone(), StageResult::default());
                self.job.state = JobState::Running { stage_index: index };
            }
            None => {
                self.job.state = JobState::Succeeded;
                self.job.finished_at = Some(Utc::now());
            }
        }
    }

    fn guard_open(&self) -> TransitionResult<()> {
        if self.job.state.is_terminal() {
            return Err(TransitionError::Terminal {
                job_id: self.job.id,
                state: self.job.state.name().to_string(),
            });
        }
        Ok(())
    }

    fn running_stage(&self, action: &'static str) -> TransitionResult<String> {
        self.guard_open()?;
        self.current_stage()
            .map(|(_, stage)| stage.to_string())
            .ok_or_else(|| self.invalid(action))
    }

    fn in_flight_record(
        &mut self,
        stage: &str,
        action: &'static str,
    ) -> TransitionResult<&mut StageResult> {
        let job_id = self.job.id;
        match self.job.stage_results.get_mut(stage) {
            Some(record) if record.status == AttemptStatus::InFlight => Ok(record),
            Some(record) => Err(TransitionError::Invalid {
                job_id,
                action,
                state: format!("{:?}", record.status),
            }),
            None => Err(TransitionError::Invalid {
                job_id,
                action,
                state: "unscheduled".to_string(),
            }),
        }
    }

    fn invalid(&self, action: &'static str) -> TransitionError {
        TransitionError::Invalid {
            job_id: self.job.id,
            action,
            state: self.job.state.name().to_string(),
        }
    }
}
