//! Per-job driver that walks the stage sequence.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::collaborators::{CatalogEntry, CatalogPublisher};
use super::errors::{ComputeResult, HookError, HookResult, StageError};
use super::hooks::{HookDecision, JobHooks};
use super::notify::{CompletionNotification, NotificationTopics, Notifier, PipelineEvent};
use super::retry::RetryPolicy;
use crate::dispatch::{DispatchLimiter, FunctionRouter, StageCompute, StageRequest};
use crate::jobs::{FailureOutcome, Job, JobId, JobState, JobStateMachine, JobStore, TransitionError};
use crate::logging::{JobLogger, LogConfig};
use crate::models::HookPoint;

/// State shared by the orchestrator and every job driver.
pub(crate) struct Shared {
    pub compute: Arc<dyn StageCompute>,
    pub limiter: DispatchLimiter,
    pub retry: RetryPolicy,
    pub router: FunctionRouter,
    pub notifier: Arc<dyn Notifier>,
    pub topics: NotificationTopics,
    pub publisher: Arc<dyn CatalogPublisher>,
    pub store: Mutex<JobStore>,
    pub cancel_tokens: Mutex<HashMap<JobId, CancellationToken>>,
    /// Folder for per-job log files; `None` keeps job logs in memory.
    pub job_logs: Option<PathBuf>,
    pub log_config: LogConfig,
}

/// Drives one job from `Pending` to a terminal state.
///
/// The driver owns the job's state machine and is its only writer; every
/// transition is published as a snapshot on the job's watch channel.
pub(crate) struct JobDriver {
    machine: JobStateMachine,
    snapshots: watch::Sender<Job>,
    cancel: CancellationToken,
    hooks: JobHooks,
    shared: Arc<Shared>,
    logger: JobLogger,
}

impl JobDriver {
    pub(crate) fn new(
        job: Job,
        snapshots: watch::Sender<Job>,
        cancel: CancellationToken,
        hooks: JobHooks,
        shared: Arc<Shared>,
    ) -> Self {
        let name = job.id.to_string();
        let mut builder = JobLogger::builder(&name).config(shared.log_config.clone());
        if let Some(dir) = &shared.job_logs {
            builder = builder.log_dir(dir);
        }
        let logger = builder.build().unwrap_or_else(|e| {
            tracing::warn!(job_id = %name, "Failed to open job log file: {}", e);
            JobLogger::in_memory(&name, shared.log_config.clone())
        });

        Self {
            machine: JobStateMachine::new(job),
            snapshots,
            cancel,
            hooks,
            shared,
            logger,
        }
    }

    /// Run the job to completion.
    pub(crate) async fn run(mut self) {
        self.drive().await;
        self.finish().await;
    }

    async fn drive(&mut self) {
        if !self.prepare().await {
            return;
        }

        while let Some(stage) = self.machine.current_stage().map(|(_, s)| s.to_string()) {
            if self.cancel.is_cancelled() {
                self.cancel_job(None);
                return;
            }
            self.attempt(&stage).await;
        }
    }

    /// Before-processing hook and `Pending → Running(0)`.
    ///
    /// Returns false when the job ended before its first stage.
    async fn prepare(&mut self) -> bool {
        self.publish();
        self.logger.info(&format!(
            "Job for '{}' (variant: {})",
            self.machine.job().video_ref,
            self.machine.job().variant.as_deref().unwrap_or("none")
        ));

        if self.cancel.is_cancelled() {
            self.cancel_job(None);
            return false;
        }

        self.logger.hook("before-processing");
        let hooks = self.hooks.clone();
        let job = self.machine.job().clone();
        let decision = self
            .run_hook(HookPoint::BeforeProcessing, async move {
                hooks.before_processing(&job).await
            })
            .await;
        match decision {
            None => {
                self.cancel_job(None);
                return false;
            }
            Some(Ok(HookDecision::Continue)) => {}
            Some(Ok(HookDecision::Abort(reason))) => {
                self.cancel_job(Some(reason));
                return false;
            }
            Some(Err(e)) => {
                self.cancel_job(Some(format!("before-processing hook failed: {e}")));
                return false;
            }
        }

        if self.cancel.is_cancelled() {
            self.cancel_job(None);
            return false;
        }

        if let Err(e) = self.machine.start() {
            self.transition_failed(e);
            return false;
        }
        self.publish();

        if matches!(self.machine.state(), JobState::Running { .. }) {
            let event = PipelineEvent::started(self.machine.job());
            self.notify(event).await;
        }
        true
    }

    /// One attempt at the current stage.
    async fn attempt(&mut self, stage: &str) {
        let attempt = match self.machine.begin_attempt() {
            Ok(attempt) => attempt,
            Err(e) => return self.transition_failed(e),
        };
        self.publish();

        let function = self.shared.router.function_for(stage).to_string();
        if attempt == 1 {
            self.logger.phase(stage);
        }
        self.logger
            .dispatch(&format!("{} (attempt {})", function, attempt));
        tracing::debug!(job_id = %self.machine.job().id, stage, attempt, %function, "Dispatching stage");

        let request = self.request(stage, attempt, function);
        let Some(result) = self.dispatch(request).await else {
            self.logger.warn(&format!("Cancelled while {} was in flight", stage));
            self.cancel_job(None);
            return;
        };
        let Some(result) = self.run_after_hook(stage, result).await else {
            self.logger.warn(&format!("Cancelled while the hook after {} was running", stage));
            self.cancel_job(None);
            return;
        };

        // A result that lands after cancellation is discarded.
        if self.cancel.is_cancelled() {
            self.cancel_job(None);
            return;
        }

        match result {
            Ok(output) => {
                self.logger.detail(&output.to_string());
                self.logger.success(&format!("{} completed", stage));
                if let Err(e) = self.machine.stage_succeeded(output) {
                    return self.transition_failed(e);
                }
                self.publish();
            }
            Err(err) => self.handle_failure(stage, attempt, err).await,
        }
    }

    async fn handle_failure(&mut self, stage: &str, attempt: u32, err: StageError) {
        let retryable = err.is_retryable();
        let max_retries = self.shared.retry.max_retries_for(stage);
        self.logger.error(&format!(
            "{} attempt {} failed: {}",
            stage, attempt, err
        ));

        match self.machine.stage_failed(err.to_string(), retryable, max_retries) {
            Ok(FailureOutcome::Retry { next_attempt }) => {
                self.publish();
                let delay = self.shared.retry.backoff(attempt);
                self.logger.warn(&format!(
                    "Retrying {} as attempt {} in {:?}",
                    stage, next_attempt, delay
                ));
                let cancelled = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => true,
                    _ = tokio::time::sleep(delay) => false,
                };
                if cancelled {
                    self.cancel_job(None);
                }
            }
            Ok(FailureOutcome::Exhausted) => {
                self.publish();
                self.logger.show_tail(stage);
            }
            Err(e) => self.transition_failed(e),
        }
    }

    fn request(&self, stage: &str, attempt: u32, function: String) -> StageRequest {
        let job = self.machine.job();
        StageRequest {
            job_id: job.id,
            stage: stage.to_string(),
            attempt,
            function,
            video_ref: job.video_ref.clone(),
            configuration: job
                .effective_config
                .stage(stage)
                .map(|s| s.configuration.clone())
                .unwrap_or_default(),
            prior_outputs: job.prior_outputs(),
        }
    }

    /// Acquire a slot and invoke the stage.
    ///
    /// Returns `None` when the job is cancelled first. The invocation runs
    /// on its own task holding the slot, so a cancelled job leaves the
    /// external call to finish (or time out) and its result is dropped.
    async fn dispatch(&self, request: StageRequest) -> Option<ComputeResult<Value>> {
        let slot = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return None,
            slot = self.shared.limiter.acquire() => slot,
        };
        let slot = match slot {
            Ok(slot) => slot,
            Err(e) => return Some(Err(e.into())),
        };

        let compute = Arc::clone(&self.shared.compute);
        let timeout = self.shared.limiter.stage_timeout();
        let invocation =
            tokio::spawn(async move { slot.run_with_timeout(timeout, compute.invoke(request)).await });

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            joined = invocation => Some(match joined {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => Err(e.into()),
                Err(e) => Err(StageError::failure(format!("stage invocation task failed: {e}"))),
            }),
        }
    }

    /// Run the hook that follows `stage`, if any. A hook failure becomes
    /// the stage's failure.
    ///
    /// Returns `None` when the job is cancelled while the hook runs.
    async fn run_after_hook(
        &self,
        stage: &str,
        result: ComputeResult<Value>,
    ) -> Option<ComputeResult<Value>> {
        let output = match result {
            Ok(output) => output,
            Err(e) => return Some(Err(e)),
        };
        let Some(point) = HookPoint::after_stage(stage) else {
            return Some(Ok(output));
        };

        self.logger.hook(point.as_str());
        let hooks = self.hooks.clone();
        let job = self.machine.job().clone();
        let seen = output.clone();
        let outcome = self
            .run_hook(point, async move { hooks.after_stage(point, &job, &seen).await })
            .await?;
        Some(match outcome {
            Ok(()) => Ok(output),
            Err(e) => Err(StageError::hook(point, e)),
        })
    }

    /// Run a hook on its own task, raced against cancellation.
    ///
    /// Returns `None` when the job is cancelled first; the hook task is
    /// aborted. A panicking hook is reported as a hook failure.
    async fn run_hook<T, F>(&self, point: HookPoint, hook: F) -> Option<HookResult<T>>
    where
        T: Send + 'static,
        F: Future<Output = HookResult<T>> + Send + 'static,
    {
        let mut task = tokio::spawn(hook);
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                task.abort();
                None
            }
            joined = &mut task => Some(joined.unwrap_or_else(|e| Err(hook_panicked(point, e)))),
        }
    }

    /// Terminal bookkeeping: catalog, after-completion, notification, archive.
    async fn finish(&mut self) {
        let job = self.machine.job().clone();
        let job_id = job.id;
        self.shared.cancel_tokens.lock().remove(&job_id);

        let Some(notification) = CompletionNotification::from_job(&job) else {
            tracing::error!(%job_id, state = %job.state, "Job driver stopped before a terminal state");
            return;
        };

        match &job.state {
            JobState::Succeeded => {
                self.logger.success("Job completed successfully");
                let entry = CatalogEntry::from_job(&job);
                if let Err(e) = self.shared.publisher.publish(&entry).await {
                    self.logger.warn(&e.to_string());
                }
            }
            JobState::Failed { stage, reason } => {
                self.logger
                    .error(&format!("Job failed at {}: {}", stage, reason));
            }
            _ => self.logger.warn(&format!("Job {}", job.state)),
        }

        self.logger.hook("after-completion");
        let hooks = self.hooks.clone();
        let (finished, sent) = (job.clone(), notification.clone());
        let errors = tokio::spawn(async move { hooks.after_completion(&finished, &sent).await })
            .await
            .unwrap_or_else(|e| vec![hook_panicked(HookPoint::AfterCompletion, e)]);
        for e in errors {
            self.logger
                .warn(&format!("after-completion hook failed: {}", e));
        }

        self.notify(PipelineEvent::Completed(notification)).await;
        self.logger.close();

        let pending = self.shared.store.lock().archive(job.clone());
        if let Some(pending) = pending {
            match tokio::task::spawn_blocking(move || pending.write()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(%job_id, "Failed to persist job archive: {}", e),
                Err(e) => tracing::warn!(%job_id, "Archive writer task failed: {}", e),
            }
        }
        self.snapshots.send_replace(job);
    }

    async fn notify(&self, event: PipelineEvent) {
        let topic = self.shared.topics.topic_for(&event);
        if let Err(e) = self.shared.notifier.publish(topic, &event).await {
            tracing::warn!(job_id = %event.job_id(), topic, "Failed to publish notification: {}", e);
        }
    }

    fn cancel_job(&mut self, reason: Option<String>) {
        match self.machine.cancel(reason) {
            Ok(state) => {
                let message = state.to_string();
                self.logger.warn(&format!("Job {}", message));
                self.publish();
            }
            Err(e) => tracing::debug!("Ignoring cancellation: {}", e),
        }
    }

    fn transition_failed(&mut self, err: TransitionError) {
        tracing::error!(job_id = %self.machine.job().id, "Illegal job transition: {}", err);
        self.cancel_job(Some(err.to_string()));
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.machine.job().clone());
    }
}

fn hook_panicked(point: HookPoint, err: tokio::task::JoinError) -> HookError {
    HookError::failed(format!("{point} hook did not finish: {err}"))
}
