//! Lifecycle hooks.
//!
//! A `LifecycleObserver` has one method per lifecycle point. Every method
//! has a no-op default, so observers only implement what they need.
//!
//! Hooks for a job come from two places: handler references in the
//! pipeline definition (and the submission), which name observers
//! registered on the orchestrator, and an optional observer passed with
//! the submission. At each point they run in that order.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::errors::{HookError, HookResult};
use super::notify::CompletionNotification;
use crate::jobs::Job;
use crate::models::HookPoint;

/// Answer of the before-processing hook.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum HookDecision {
    #[default]
    Continue,
    /// Cancel the job before any stage runs.
    Abort(String),
}

/// Stage-lifecycle observer.
#[async_trait]
pub trait LifecycleObserver: Send + Sync {
    /// Runs before the first stage. May abort the job.
    async fn before_processing(&self, _job: &Job) -> HookResult<HookDecision> {
        Ok(HookDecision::Continue)
    }

    /// Runs after validation succeeds, before the job advances.
    async fn after_validation(&self, _job: &Job, _output: &Value) -> HookResult<()> {
        Ok(())
    }

    /// Runs after analysis succeeds, before the job advances.
    async fn after_analysis(&self, _job: &Job, _output: &Value) -> HookResult<()> {
        Ok(())
    }

    /// Runs after transcoding succeeds, before the job advances.
    async fn after_transcoding(&self, _job: &Job, _output: &Value) -> HookResult<()> {
        Ok(())
    }

    /// Runs once the job is terminal.
    async fn after_completion(
        &self,
        _job: &Job,
        _notification: &CompletionNotification,
    ) -> HookResult<()> {
        Ok(())
    }
}

/// Observer that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

#[async_trait]
impl LifecycleObserver for NoopObserver {}

/// Observer that logs every lifecycle point.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingObserver;

#[async_trait]
impl LifecycleObserver for LoggingObserver {
    async fn before_processing(&self, job: &Job) -> HookResult<HookDecision> {
        tracing::info!(job_id = %job.id, video = %job.video_ref, "before-processing");
        Ok(HookDecision::Continue)
    }

    async fn after_validation(&self, job: &Job, _output: &Value) -> HookResult<()> {
        tracing::info!(job_id = %job.id, "after-validation");
        Ok(())
    }

    async fn after_analysis(&self, job: &Job, _output: &Value) -> HookResult<()> {
        tracing::info!(job_id = %job.id, "after-analysis");
        Ok(())
    }

    async fn after_transcoding(&self, job: &Job, _output: &Value) -> HookResult<()> {
        tracing::info!(job_id = %job.id, "after-transcoding");
        Ok(())
    }

    async fn after_completion(
        &self,
        job: &Job,
        notification: &CompletionNotification,
    ) -> HookResult<()> {
        tracing::info!(job_id = %job.id, outcome = ?notification.outcome, "after-completion");
        Ok(())
    }
}

/// Decides whether a job may continue past a gated stage.
#[async_trait]
pub trait ApprovalPolicy: Send + Sync {
    /// `Err(reason)` rejects the stage result.
    async fn review(&self, job: &Job, point: HookPoint, output: &Value) -> Result<(), String>;
}

/// Observer consulting an external approval policy after validation and
/// after analysis.
///
/// A rejection is a hook failure, so the gated stage is retried and the
/// job eventually fails if approval never comes.
pub struct ApprovalGate<P> {
    policy: P,
}

impl<P: ApprovalPolicy> ApprovalGate<P> {
    pub fn new(policy: P) -> Self {
        Self { policy }
    }

    async fn review(&self, job: &Job, point: HookPoint, output: &Value) -> HookResult<()> {
        self.policy
            .review(job, point, output)
            .await
            .map_err(HookError::rejected)
    }
}

#[async_trait]
impl<P: ApprovalPolicy> LifecycleObserver for ApprovalGate<P> {
    async fn after_validation(&self, job: &Job, output: &Value) -> HookResult<()> {
        self.review(job, HookPoint::AfterValidation, output).await
    }

    async fn after_analysis(&self, job: &Job, output: &Value) -> HookResult<()> {
        self.review(job, HookPoint::AfterAnalysis, output).await
    }
}

/// Named observers that definition hook references resolve against.
#[derive(Clone, Default)]
pub struct HookRegistry {
    handlers: BTreeMap<String, Arc<dyn LifecycleObserver>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, observer: Arc<dyn LifecycleObserver>) {
        self.handlers.insert(name.into(), observer);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn LifecycleObserver>> {
        self.handlers.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// The hooks bound to one job.
#[derive(Clone, Default)]
pub struct JobHooks {
    /// Handlers bound to a single point, in run order.
    bound: Vec<(HookPoint, Arc<dyn LifecycleObserver>)>,
    /// Observers that see every point.
    observers: Vec<Arc<dyn LifecycleObserver>>,
}

impl JobHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a handler to one lifecycle point.
    pub fn bind(&mut self, point: HookPoint, handler: Arc<dyn LifecycleObserver>) {
        self.bound.push((point, handler));
    }

    /// Add an observer for every lifecycle point.
    pub fn observe(&mut self, observer: Arc<dyn LifecycleObserver>) {
        self.observers.push(observer);
    }

    pub fn is_empty(&self) -> bool {
        self.bound.is_empty() && self.observers.is_empty()
    }

    fn at(&self, point: HookPoint) -> impl Iterator<Item = &Arc<dyn LifecycleObserver>> {
        self.bound
            .iter()
            .filter(move |(p, _)| *p == point)
            .map(|(_, h)| h)
            .chain(self.observers.iter())
    }

    /// Run the before-processing hooks; the first abort wins.
    pub async fn before_processing(&self, job: &Job) -> HookResult<HookDecision> {
        for observer in self.at(HookPoint::BeforeProcessing) {
            if let HookDecision::Abort(reason) = observer.before_processing(job).await? {
                return Ok(HookDecision::Abort(reason));
            }
        }
        Ok(HookDecision::Continue)
    }

    /// Run the hooks that follow a stage; the first failure stops the chain.
    pub async fn after_stage(&self, point: HookPoint, job: &Job, output: &Value) -> HookResult<()> {
        for observer in self.at(point) {
            match point {
                HookPoint::AfterValidation => observer.after_validation(job, output).await?,
                HookPoint::AfterAnalysis => observer.after_analysis(job, output).await?,
                HookPoint::AfterTranscoding => observer.after_transcoding(job, output).await?,
                HookPoint::BeforeProcessing | HookPoint::AfterCompletion => {}
            }
        }
        Ok(())
    }

    /// Run every after-completion hook, collecting failures.
    pub async fn after_completion(
        &self,
        job: &Job,
        notification: &CompletionNotification,
    ) -> Vec<HookError> {
        let mut errors = Vec::new();
        for observer in self.at(HookPoint::AfterCompletion) {
            if let Err(e) = observer.after_completion(job, notification).await {
                errors.push(e);
            }
        }
        errors
    }
}

impl fmt::Debug for JobHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHooks")
            .field("bound", &self.bound.iter().map(|(p, _)| *p).collect::<Vec<_>>())
            .field("observers", &self.observers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{standard_definition, EffectiveConfig};
    use parking_lot::Mutex;
    use serde_json::json;

    fn job() -> Job {
        Job::new(
            "video.mp4",
            Arc::new(EffectiveConfig::new(None, standard_definition())),
            vec!["validation".into()],
        )
    }

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl LifecycleObserver for Recorder {
        async fn after_validation(&self, _job: &Job, _output: &Value) -> HookResult<()> {
            self.calls.lock().push("after-validation");
            Ok(())
        }

        async fn after_analysis(&self, _job: &Job, _output: &Value) -> HookResult<()> {
            self.calls.lock().push("after-analysis");
            Ok(())
        }
    }

    struct Aborter;

    #[async_trait]
    impl LifecycleObserver for Aborter {
        async fn before_processing(&self, _job: &Job) -> HookResult<HookDecision> {
            Ok(HookDecision::Abort("quota exceeded".into()))
        }
    }

    struct RejectAnalysis;

    #[async_trait]
    impl ApprovalPolicy for RejectAnalysis {
        async fn review(&self, _job: &Job, point: HookPoint, _output: &Value) -> Result<(), String> {
            if point == HookPoint::AfterAnalysis {
                Err("flagged content".into())
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn bound_handler_only_sees_its_point() {
        let recorder = Arc::new(Recorder::default());
        let mut hooks = JobHooks::new();
        hooks.bind(HookPoint::AfterAnalysis, recorder.clone());

        hooks
            .after_stage(HookPoint::AfterValidation, &job(), &json!({}))
            .await
            .unwrap();
        hooks
            .after_stage(HookPoint::AfterAnalysis, &job(), &json!({}))
            .await
            .unwrap();

        assert_eq!(*recorder.calls.lock(), vec!["after-analysis"]);
    }

    #[tokio::test]
    async fn observer_sees_every_point() {
        let recorder = Arc::new(Recorder::default());
        let mut hooks = JobHooks::new();
        hooks.observe(recorder.clone());

        for point in [HookPoint::AfterValidation, HookPoint::AfterAnalysis] {
            hooks.after_stage(point, &job(), &json!({})).await.unwrap();
        }
        assert_eq!(recorder.calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn abort_wins() {
        let mut hooks = JobHooks::new();
        hooks.observe(Arc::new(NoopObserver));
        hooks.observe(Arc::new(Aborter));

        assert_eq!(
            hooks.before_processing(&job()).await.unwrap(),
            HookDecision::Abort("quota exceeded".into())
        );
    }

    #[tokio::test]
    async fn approval_gate_rejects() {
        let gate = ApprovalGate::new(RejectAnalysis);
        assert!(gate.after_validation(&job(), &json!({})).await.is_ok());
        assert_eq!(
            gate.after_analysis(&job(), &json!({})).await,
            Err(HookError::rejected("flagged content"))
        );
    }

    #[test]
    fn registry_lookup() {
        let mut registry = HookRegistry::new();
        registry.register("audit", Arc::new(LoggingObserver));
        assert!(registry.get("audit").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["audit"]);
    }
}
